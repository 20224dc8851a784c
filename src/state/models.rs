/// Database models for gfs-backup.
///
/// Row structs map directly to SQLite tables; conversion into the domain
/// types in [`crate::policy`] happens here.
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::policy::{BackupConfiguration, RetentionPolicy};
use crate::schedule::ScheduleMode;

/// A `backup_configs` row.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigurationRow {
    pub id: Uuid,
    pub target_directory: String,
    pub enabled: bool,
    pub schedule_mode: String,
    pub run_hours: Option<String>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub cleanup_enabled: bool,
    pub daily_keep_days: i64,
    pub weekly_keep_weeks: i64,
    pub monthly_keep_months: i64,
    pub purge_expired_dirs: bool,
    pub encrypted_credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn window(name: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| BackupError::InvalidConfiguration(format!("stored {name} = {value} is negative")))
}

impl TryFrom<ConfigurationRow> for BackupConfiguration {
    type Error = BackupError;

    fn try_from(row: ConfigurationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            target_directory: PathBuf::from(row.target_directory),
            enabled: row.enabled,
            schedule: ScheduleMode::from_stored(&row.schedule_mode, row.run_hours.as_deref())?,
            last_execution: row.last_execution_at,
            retention: RetentionPolicy {
                cleanup_enabled: row.cleanup_enabled,
                daily_keep_days: window("daily_keep_days", row.daily_keep_days)?,
                weekly_keep_weeks: window("weekly_keep_weeks", row.weekly_keep_weeks)?,
                monthly_keep_months: window("monthly_keep_months", row.monthly_keep_months)?,
                purge_expired_dirs: row.purge_expired_dirs,
            },
            encrypted_credential: row.encrypted_credential,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Outcome class of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Warning,
    Error,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One append-only `backup_logs` record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    /// Cleared when the configuration is deleted.
    pub config_id: Option<Uuid>,
    pub status: LogStatus,
    pub message: String,
    pub artifact_path: Option<String>,
    /// Human-readable size, e.g. "12.34 MB".
    pub artifact_size: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(config_id: Uuid, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            config_id: Some(config_id),
            status,
            message: message.into(),
            artifact_path: None,
            artifact_size: None,
            created_at: Utc::now(),
        }
    }

    pub fn success(config_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(config_id, LogStatus::Success, message)
    }

    pub fn warning(config_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(config_id, LogStatus::Warning, message)
    }

    pub fn error(config_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(config_id, LogStatus::Error, message)
    }

    pub fn with_artifact(mut self, path: impl Into<String>, size: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self.artifact_size = Some(size.into());
        self
    }
}
