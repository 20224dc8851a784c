/// Configuration management: the only write path for backup
/// configurations and the only place a master credential is sealed.
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::crypto::sensitive::Credential;
use crate::crypto::vault::CredentialVault;
use crate::error::{BackupError, Result};
use crate::policy::{validate_target_directory, BackupConfiguration, ConfigurationDraft};
use crate::state::{repository, Database};

pub struct ConfigurationService {
    db: Database,
    vault: Arc<CredentialVault>,
}

impl ConfigurationService {
    pub fn new(db: Database, vault: Arc<CredentialVault>) -> Self {
        Self { db, vault }
    }

    /// Check the credential with the host and seal it.
    async fn seal_credential(&self, credential: &Credential) -> Result<String> {
        self.vault.validate_credential(credential).await?;
        self.vault.encrypt(credential).await
    }

    pub async fn create(
        &self,
        draft: ConfigurationDraft,
        credential: Option<&Credential>,
    ) -> Result<BackupConfiguration> {
        draft.validate_policy()?;
        validate_target_directory(&draft.target_directory)?;

        let encrypted_credential = match credential {
            Some(credential) => Some(self.seal_credential(credential).await?),
            None => None,
        };

        let now = Utc::now();
        let config = BackupConfiguration {
            id: Uuid::now_v7(),
            target_directory: draft.target_directory,
            enabled: draft.enabled,
            schedule: draft.schedule,
            last_execution: None,
            retention: draft.retention,
            encrypted_credential,
            created_at: now,
            updated_at: now,
        };
        repository::insert_configuration(self.db.pool(), &config).await?;

        info!(config_id = %config.id, target = %config.target_directory.display(), "Created backup configuration");
        Ok(config)
    }

    /// Replace the editable fields of configuration `id`. The target
    /// directory is rechecked only if it changed; the stored credential is
    /// kept unless a new one is supplied.
    pub async fn update(
        &self,
        id: Uuid,
        draft: ConfigurationDraft,
        credential: Option<&Credential>,
    ) -> Result<BackupConfiguration> {
        let mut config = self.get(id).await?;

        draft.validate_policy()?;
        if draft.target_directory != config.target_directory {
            validate_target_directory(&draft.target_directory)?;
        }
        if let Some(credential) = credential {
            config.encrypted_credential = Some(self.seal_credential(credential).await?);
        }

        config.target_directory = draft.target_directory;
        config.enabled = draft.enabled;
        config.schedule = draft.schedule;
        config.retention = draft.retention;
        config.updated_at = Utc::now();

        if !repository::update_configuration(self.db.pool(), &config).await? {
            return Err(BackupError::NotFound(format!("backup configuration {id}")));
        }

        info!(config_id = %id, "Updated backup configuration");
        Ok(config)
    }

    pub async fn get(&self, id: Uuid) -> Result<BackupConfiguration> {
        repository::get_configuration(self.db.pool(), id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("backup configuration {id}")))
    }

    pub async fn list(&self) -> Result<Vec<BackupConfiguration>> {
        repository::list_configurations(self.db.pool()).await
    }

    /// Delete configuration `id`. Its log entries stay, detached.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !repository::delete_configuration(self.db.pool(), id).await? {
            return Err(BackupError::NotFound(format!("backup configuration {id}")));
        }
        info!(config_id = %id, "Deleted backup configuration");
        Ok(())
    }
}
