/// Backup executor.
///
/// Runs one backup attempt for a configuration:
/// 1. Open and validate the stored master credential
/// 2. Ask the Backup Producer for an archive at a `.part` staging path
/// 3. Verify the archive landed on disk and rename it to its timestamped name
/// 4. Record the outcome and advance `last_execution`
///
/// Every attempt that runs ends in exactly one persisted log entry. Errors
/// never escape to the caller, so one failing configuration cannot stall a
/// batch. `last_execution` only moves on verified success; a failed attempt
/// is retried on the next due tick.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::crypto::vault::CredentialVault;
use crate::error::{BackupError, Result};
use crate::host::BackupProducer;
use crate::policy::BackupConfiguration;
use crate::retention::artifact::{ArtifactName, ARTIFACT_EXTENSION};
use crate::state::models::ExecutionLogEntry;
use crate::state::{repository, Database};

/// Archive format requested from the producer. Must agree with the
/// artifact file extension.
pub const ARCHIVE_FORMAT: &str = ARTIFACT_EXTENSION;

/// Suffix of the in-progress file the producer writes to.
pub const STAGING_SUFFIX: &str = "part";

pub const DEFAULT_PRODUCER_TIMEOUT: Duration = Duration::from_secs(120);

/// Executor settings shared by every configuration.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Identifier of the service/database being backed up.
    pub service_id: String,
    /// Upper bound on one producer invocation.
    pub producer_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            service_id: "odoo".to_string(),
            producer_timeout: DEFAULT_PRODUCER_TIMEOUT,
        }
    }
}

pub struct BackupExecutor {
    db: Database,
    vault: Arc<CredentialVault>,
    producer: Arc<dyn BackupProducer>,
    options: ExecutorOptions,
}

/// Human-readable size in megabytes, e.g. `"12.34 MB"`.
pub fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

async fn discard_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!(path = %dest.display(), "Removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dest.display(), error = %e, "Could not remove partial artifact"),
    }
}

impl BackupExecutor {
    pub fn new(
        db: Database,
        vault: Arc<CredentialVault>,
        producer: Arc<dyn BackupProducer>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            db,
            vault,
            producer,
            options,
        }
    }

    /// Run a backup for `config` now. Returns `None` if the configuration is
    /// disabled, otherwise the persisted log entry.
    pub async fn execute(&self, config: &BackupConfiguration) -> Option<ExecutionLogEntry> {
        self.execute_at(config, Utc::now()).await
    }

    /// Like [`execute`](Self::execute) with an explicit clock reading.
    pub async fn execute_at(
        &self,
        config: &BackupConfiguration,
        now: DateTime<Utc>,
    ) -> Option<ExecutionLogEntry> {
        if !config.enabled {
            debug!(config_id = %config.id, "Configuration disabled, skipping backup");
            return None;
        }

        info!(config_id = %config.id, target = %config.target_directory.display(), "Starting backup");

        let entry = match self.attempt(config, now).await {
            Ok(entry) => {
                info!(
                    config_id = %config.id,
                    path = entry.artifact_path.as_deref().unwrap_or_default(),
                    size = entry.artifact_size.as_deref().unwrap_or_default(),
                    "Backup complete"
                );
                entry
            }
            Err(e) => {
                error!(config_id = %config.id, error = %e, "Backup failed");
                ExecutionLogEntry::error(config.id, e.to_string())
            }
        };

        if let Err(e) = repository::insert_log(self.db.pool(), &entry).await {
            error!(config_id = %config.id, error = %e, "Failed to record backup log entry");
        }

        Some(entry)
    }

    async fn attempt(&self, config: &BackupConfiguration, now: DateTime<Utc>) -> Result<ExecutionLogEntry> {
        let token = config
            .encrypted_credential
            .as_deref()
            .ok_or_else(|| BackupError::InvalidCredential("no master credential configured".into()))?;

        let credential = self
            .vault
            .decrypt(token)
            .await
            .map_err(|e| BackupError::InvalidCredential(e.to_string()))?;
        self.vault.validate_credential(&credential).await?;

        let name = ArtifactName::new(&self.options.service_id, now.naive_utc());
        let dest = config.target_directory.join(name.file_name());
        // The producer writes under a name retention never parses; only a
        // verified archive is renamed into place.
        let staging = config
            .target_directory
            .join(format!("{}.{STAGING_SUFFIX}", name.file_name()));

        let invocation = tokio::time::timeout(
            self.options.producer_timeout,
            self.producer
                .invoke(&credential, &self.options.service_id, ARCHIVE_FORMAT, &staging),
        )
        .await;

        let outcome = match invocation {
            Err(_) => Err(BackupError::ProducerInvocation(format!(
                "{} did not finish within {}s",
                self.producer.name(),
                self.options.producer_timeout.as_secs()
            ))),
            Ok(Err(e @ (BackupError::ProducerInvocation(_) | BackupError::InvalidCredential(_)))) => {
                Err(e)
            }
            Ok(Err(e)) => Err(BackupError::ProducerInvocation(e.to_string())),
            Ok(Ok(outcome)) if !outcome.success => {
                Err(BackupError::ProducerInvocation(outcome.error_detail))
            }
            Ok(Ok(_)) => Ok(()),
        };
        if let Err(e) = outcome {
            discard_partial(&staging).await;
            return Err(e);
        }

        let size = match tokio::fs::metadata(&staging).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                discard_partial(&staging).await;
                return Err(BackupError::ArtifactVerification(format!(
                    "{} reported success but {} does not exist",
                    self.producer.name(),
                    staging.display()
                )));
            }
        };
        if let Err(e) = tokio::fs::rename(&staging, &dest).await {
            discard_partial(&staging).await;
            return Err(BackupError::ArtifactVerification(format!(
                "could not move {} into place: {e}",
                staging.display()
            )));
        }

        repository::set_last_execution(self.db.pool(), config.id, now).await?;

        Ok(ExecutionLogEntry::success(config.id, "Backup generated successfully")
            .with_artifact(dest.display().to_string(), format_size(size)))
    }
}
