/// HTTP implementations of the host collaborators.
///
/// The host exposes its database manager on a local port (typically
/// `http://localhost:8069`). Backups are requested with a multipart POST to
/// `/web/database/backup`; the response body is the archive itself and is
/// streamed straight to the destination file.
///
/// The database manager has no side-effect-free "check master password"
/// route, so the backup request itself is the authoritative credential
/// check: a refused password comes back as `BackupError::InvalidCredential`.
/// A standalone [`HttpCredentialValidator`] is only used when a host-side
/// check endpoint is configured.
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

use super::{BackupProducer, CredentialValidator, ProducerOutcome};
use crate::crypto::sensitive::Credential;
use crate::error::{BackupError, Result};

const BACKUP_PATH: &str = "/web/database/backup";

/// Longest error body carried into a log message.
const MAX_ERROR_BODY: usize = 512;

fn producer_err(e: impl std::fmt::Display) -> BackupError {
    BackupError::ProducerInvocation(e.to_string())
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn is_credential_refusal(status: StatusCode, body: &str) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) || body.contains("Access Denied")
}

/// Backup producer backed by the host's database manager endpoint.
pub struct HttpBackupProducer {
    client: Client,
    base_url: String,
}

impl HttpBackupProducer {
    /// `timeout` bounds the whole request, including the archive download.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(producer_err)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BackupProducer for HttpBackupProducer {
    fn name(&self) -> &str {
        "host database manager"
    }

    async fn invoke(
        &self,
        credential: &Credential,
        service_id: &str,
        format: &str,
        dest: &Path,
    ) -> Result<ProducerOutcome> {
        let form = multipart::Form::new()
            .text("master_pwd", credential.expose().to_string())
            .text("name", service_id.to_string())
            .text("backup_format", format.to_string());

        let resp = self
            .client
            .post(format!("{}{BACKUP_PATH}", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(producer_err)?;

        let status = resp.status();
        // The manager answers errors with an HTML page, sometimes under 200.
        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if !status.is_success() || is_html {
            let body = resp.text().await.unwrap_or_default();
            if is_credential_refusal(status, &body) {
                return Err(BackupError::InvalidCredential(
                    "the master credential was rejected by the host".into(),
                ));
            }
            return Ok(ProducerOutcome::failed(format!(
                "HTTP {status}: {}",
                truncate(body.trim())
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(producer_err)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(ProducerOutcome::ok())
    }
}

/// Credential check against a host endpoint that answers 2xx for a valid
/// master password and 401/403 otherwise. The endpoint must actually
/// evaluate `master_pwd`; see the module docs.
pub struct HttpCredentialValidator {
    client: Client,
    url: String,
}

impl HttpCredentialValidator {
    pub fn new(base_url: &str, check_path: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackupError::InvalidCredential(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), check_path),
        })
    }
}

#[async_trait]
impl CredentialValidator for HttpCredentialValidator {
    async fn check_credential(&self, credential: &Credential) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .form(&[("master_pwd", credential.expose())])
            .send()
            .await
            .map_err(|e| BackupError::InvalidCredential(format!("credential check unreachable: {e}")))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackupError::InvalidCredential(
                "the master credential was rejected by the host".into(),
            )),
            s => Err(BackupError::InvalidCredential(format!(
                "credential check failed with HTTP {s}"
            ))),
        }
    }
}
