/// Process settings.
///
/// Sources, later overriding earlier:
/// 1. [`Settings::default`]
/// 2. A TOML file (`gfs-backup.toml` unless another path is given)
/// 3. `GFS_BACKUP_*` environment variables, e.g. `GFS_BACKUP_HOST_URL`
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};
use crate::executor::ExecutorOptions;

pub const DEFAULT_SETTINGS_FILE: &str = "gfs-backup.toml";
pub const ENV_PREFIX: &str = "GFS_BACKUP_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// sqlx connection URL of the state database.
    pub database_url: String,
    /// Base URL of the host service.
    pub host_url: String,
    /// Service/database name passed to the producer and used in artifact names.
    pub service_id: String,
    pub producer_timeout_secs: u64,
    /// Host path that evaluates a posted `master_pwd` without side effects.
    /// Unset by default: the backup request itself then serves as the
    /// credential check.
    pub credential_check_path: Option<String>,
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gfs-backup.db".to_string(),
            host_url: "http://localhost:8069".to_string(),
            service_id: "odoo".to_string(),
            producer_timeout_secs: 120,
            credential_check_path: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings. A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
        Self::figment(path)
            .extract::<Settings>()
            .map_err(|e| BackupError::Settings(e.to_string()))
            .and_then(Settings::validated)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn validated(mut self) -> Result<Self> {
        self.credential_check_path = self
            .credential_check_path
            .take()
            .filter(|p| !p.trim().is_empty());
        if let Some(check_path) = &self.credential_check_path {
            if !check_path.starts_with('/') {
                return Err(BackupError::Settings(format!(
                    "credential_check_path must start with '/', got '{check_path}'"
                )));
            }
        }
        if self.service_id.trim().is_empty() {
            return Err(BackupError::Settings("service_id must not be empty".into()));
        }
        if self.producer_timeout_secs == 0 {
            return Err(BackupError::Settings(
                "producer_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_secs(self.producer_timeout_secs)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            service_id: self.service_id.clone(),
            producer_timeout: self.producer_timeout(),
        }
    }
}
