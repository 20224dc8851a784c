/// Credential vault: seals the master credential at rest.
///
/// One symmetric key serves every configuration. It is created lazily on
/// first use, stored base64-encoded in the parameter store under
/// [`VAULT_KEY_PARAM`], and cached for the life of the process.
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::crypto::aead;
use crate::crypto::sensitive::{Credential, VaultKey};
use crate::error::{BackupError, Result};
use crate::host::CredentialValidator;
use crate::state::ParamStore;

/// Parameter store key holding the vault key.
pub const VAULT_KEY_PARAM: &str = "gfs_backup.vault_key";

pub struct CredentialVault {
    store: Arc<dyn ParamStore>,
    validator: Arc<dyn CredentialValidator>,
    key: Mutex<Option<VaultKey>>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn ParamStore>, validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            store,
            validator,
            key: Mutex::new(None),
        }
    }

    fn decode_key(encoded: &str) -> Result<VaultKey> {
        let raw = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| BackupError::Decryption(format!("stored vault key is not base64: {e}")))?;
        VaultKey::from_slice(&raw)
            .ok_or_else(|| BackupError::Decryption("stored vault key is not 32 bytes".into()))
    }

    /// Return the vault key, creating and persisting it on first use.
    ///
    /// The lock is held across the whole read-or-create sequence, so
    /// concurrent first callers all end up with the same key.
    pub async fn get_or_create_key(&self) -> Result<VaultKey> {
        let mut cached = self.key.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.store.get_param(VAULT_KEY_PARAM).await? {
            Some(encoded) => Self::decode_key(&encoded)?,
            None => {
                let fresh = aead::generate_key();
                let encoded = URL_SAFE.encode(fresh.as_bytes());
                if self.store.insert_param_if_absent(VAULT_KEY_PARAM, &encoded).await? {
                    info!(param = VAULT_KEY_PARAM, "Generated new vault key");
                    fresh
                } else {
                    // Another process stored one between our read and write.
                    warn!(param = VAULT_KEY_PARAM, "Vault key appeared concurrently, using stored key");
                    let stored = self.store.get_param(VAULT_KEY_PARAM).await?.ok_or_else(|| {
                        BackupError::Decryption("vault key vanished after insert conflict".into())
                    })?;
                    Self::decode_key(&stored)?
                }
            }
        };

        *cached = Some(key.clone());
        Ok(key)
    }

    /// Seal a plaintext credential into a storable token.
    pub async fn encrypt(&self, credential: &Credential) -> Result<String> {
        let key = self.get_or_create_key().await?;
        aead::seal(&key, credential.expose().as_bytes())
    }

    /// Open a token produced by [`encrypt`](Self::encrypt).
    pub async fn decrypt(&self, token: &str) -> Result<Credential> {
        let key = self.get_or_create_key().await?;
        let bytes = aead::open(&key, token)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| BackupError::Decryption("credential is not valid UTF-8".into()))?;
        Ok(Credential::new(text))
    }

    /// Ask the host platform whether `credential` is the master credential.
    pub async fn validate_credential(&self, credential: &Credential) -> Result<()> {
        if credential.is_empty() {
            return Err(BackupError::InvalidCredential("credential is empty".into()));
        }
        self.validator
            .check_credential(credential)
            .await
            .map_err(|e| match e {
                BackupError::InvalidCredential(_) => e,
                other => BackupError::InvalidCredential(other.to_string()),
            })
    }
}
