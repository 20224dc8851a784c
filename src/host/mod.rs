/// Host-platform collaborators.
///
/// The host service owns two things this crate only calls into:
/// - The Backup Producer, which writes a full archive to a given path
/// - The credential check for the master password
///
/// Both sit behind traits so the executor can be driven by fakes in tests.
pub mod http;

use std::path::Path;

use async_trait::async_trait;

use tracing::debug;

use crate::crypto::sensitive::Credential;
use crate::error::Result;

/// Outcome reported by the Backup Producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOutcome {
    pub success: bool,
    /// Error text from the producer when `success` is false.
    pub error_detail: String,
}

impl ProducerOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_detail: String::new(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error_detail: detail.into(),
        }
    }
}

/// Produces a backup archive of the host service.
#[async_trait]
pub trait BackupProducer: Send + Sync {
    /// Human-readable name of this producer.
    fn name(&self) -> &str;

    /// Write an archive of `service_id` in `format` to `dest`.
    ///
    /// `Err` means the call itself could not be made or completed, or
    /// `Err(InvalidCredential)` when the host refused the master
    /// credential. Any other producer-side refusal is an `Ok` outcome with
    /// `success == false`.
    async fn invoke(
        &self,
        credential: &Credential,
        service_id: &str,
        format: &str,
        dest: &Path,
    ) -> Result<ProducerOutcome>;
}

/// Checks a plaintext master credential with the host platform.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// `Ok(())` if the host accepts the credential.
    async fn check_credential(&self, credential: &Credential) -> Result<()>;
}

/// Validator for hosts without a standalone credential check. Accepts any
/// non-empty credential; the host's verdict arrives with the first backup
/// request, which reports a refused password as `InvalidCredential`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredCredentialCheck;

#[async_trait]
impl CredentialValidator for DeferredCredentialCheck {
    async fn check_credential(&self, _credential: &Credential) -> Result<()> {
        debug!("No credential check endpoint configured, deferring to the backup request");
        Ok(())
    }
}
