use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Backup producer invocation failed: {0}")]
    ProducerInvocation(String),

    #[error("Artifact verification failed: {0}")]
    ArtifactVerification(String),

    #[error("Failed to delete {}: {source}", path.display())]
    Deletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
