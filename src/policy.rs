/// Backup configurations: where backups go, when they run and how long they
/// are retained.
///
/// Everything here is validated eagerly when a configuration is written.
/// Scheduled runs never see an invalid policy.
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::schedule::ScheduleMode;

pub const MAX_DAILY_KEEP_DAYS: u32 = 365;
pub const MAX_WEEKLY_KEEP_WEEKS: u32 = 104;
pub const MAX_MONTHLY_KEEP_MONTHS: u32 = 60;

/// GFS retention windows. A window of 0 disables that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub cleanup_enabled: bool,
    pub daily_keep_days: u32,
    pub weekly_keep_weeks: u32,
    pub monthly_keep_months: u32,
    /// Also remove whole `YYYY_MM` subdirectories older than the monthly
    /// window, including files that do not look like backups.
    pub purge_expired_dirs: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            daily_keep_days: 7,
            weekly_keep_weeks: 4,
            monthly_keep_months: 12,
            purge_expired_dirs: false,
        }
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            ("daily_keep_days", self.daily_keep_days, MAX_DAILY_KEEP_DAYS),
            ("weekly_keep_weeks", self.weekly_keep_weeks, MAX_WEEKLY_KEEP_WEEKS),
            ("monthly_keep_months", self.monthly_keep_months, MAX_MONTHLY_KEEP_MONTHS),
        ];
        for (name, value, max) in bounds {
            if value > max {
                return Err(BackupError::InvalidConfiguration(format!(
                    "{name} = {value} exceeds the maximum of {max}"
                )));
            }
        }

        if self.cleanup_enabled
            && self.daily_keep_days == 0
            && self.weekly_keep_weeks == 0
            && self.monthly_keep_months == 0
        {
            return Err(BackupError::InvalidConfiguration(
                "cleanup is enabled but every retention window is 0".into(),
            ));
        }
        Ok(())
    }
}

/// A stored backup configuration.
#[derive(Debug, Clone, Serialize)]
pub struct BackupConfiguration {
    pub id: Uuid,
    pub target_directory: PathBuf,
    pub enabled: bool,
    pub schedule: ScheduleMode,
    pub last_execution: Option<DateTime<Utc>>,
    pub retention: RetentionPolicy,
    /// Sealed master credential. Never serialized.
    #[serde(skip)]
    pub encrypted_credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The caller-supplied part of a configuration, used for both create and
/// update.
#[derive(Debug, Clone)]
pub struct ConfigurationDraft {
    pub target_directory: PathBuf,
    pub enabled: bool,
    pub schedule: ScheduleMode,
    pub retention: RetentionPolicy,
}

impl ConfigurationDraft {
    pub fn new(target_directory: impl Into<PathBuf>, schedule: ScheduleMode) -> Self {
        Self {
            target_directory: target_directory.into(),
            enabled: true,
            schedule,
            retention: RetentionPolicy::default(),
        }
    }

    /// The editable fields of an existing configuration.
    pub fn from_existing(config: &BackupConfiguration) -> Self {
        Self {
            target_directory: config.target_directory.clone(),
            enabled: config.enabled,
            schedule: config.schedule.clone(),
            retention: config.retention,
        }
    }

    /// Validate everything except the target directory, which is only
    /// rechecked when it changes.
    pub fn validate_policy(&self) -> Result<()> {
        if let ScheduleMode::FixedHours(hours) = &self.schedule {
            if hours.is_empty() {
                return Err(BackupError::InvalidConfiguration(
                    "fixed-hours schedule needs at least one hour".into(),
                ));
            }
        }
        self.retention.validate()
    }
}

/// Check that `path` is absolute, exists, is a directory and is writable.
pub fn validate_target_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(BackupError::InvalidConfiguration(format!(
            "target directory must be absolute (e.g. /mnt/backups), got '{}'",
            path.display()
        )));
    }

    let meta = fs::metadata(path).map_err(|e| {
        BackupError::InvalidConfiguration(format!(
            "target directory '{}' is not accessible: {e}",
            path.display()
        ))
    })?;
    if !meta.is_dir() {
        return Err(BackupError::InvalidConfiguration(format!(
            "target '{}' is not a directory",
            path.display()
        )));
    }

    // Permission bits don't tell the whole story (ACLs, read-only mounts).
    let write_test = path.join(format!(".gfs-backup-write-test-{}", Uuid::now_v7()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&write_test)
        .map_err(|e| {
            BackupError::InvalidConfiguration(format!(
                "target directory '{}' is not writable: {e}",
                path.display()
            ))
        })?;
    remove_write_test(&write_test);

    Ok(())
}

/// Remove the write-test file. A leftover file does not affect the
/// directory's validity, so failure is only reported.
fn remove_write_test(file: &Path) {
    if let Err(e) = fs::remove_file(file) {
        warn!(path = %file.display(), error = %e, "Could not remove write-test file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::HourSet;

    #[test]
    fn test_default_retention_is_valid() {
        RetentionPolicy::default().validate().unwrap();
    }

    #[test]
    fn test_retention_bounds() {
        let mut policy = RetentionPolicy::default();
        policy.daily_keep_days = 366;
        assert!(policy.validate().is_err());

        let mut policy = RetentionPolicy::default();
        policy.weekly_keep_weeks = 105;
        assert!(policy.validate().is_err());

        let mut policy = RetentionPolicy::default();
        policy.monthly_keep_months = 61;
        assert!(policy.validate().is_err());

        let policy = RetentionPolicy {
            daily_keep_days: 365,
            weekly_keep_weeks: 104,
            monthly_keep_months: 60,
            ..RetentionPolicy::default()
        };
        policy.validate().unwrap();
    }

    #[test]
    fn test_all_zero_windows() {
        let mut policy = RetentionPolicy {
            cleanup_enabled: true,
            daily_keep_days: 0,
            weekly_keep_weeks: 0,
            monthly_keep_months: 0,
            purge_expired_dirs: false,
        };
        assert!(matches!(policy.validate(), Err(BackupError::InvalidConfiguration(_))));

        policy.cleanup_enabled = false;
        policy.validate().unwrap();
    }

    #[test]
    fn test_empty_fixed_hours_rejected() {
        let draft = ConfigurationDraft::new("/tmp", ScheduleMode::FixedHours(HourSet::default()));
        assert!(draft.validate_policy().is_err());
    }

    #[test]
    fn test_write_check_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        validate_target_directory(dir.path()).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // A vanished write-test file is reported, not fatal.
        remove_write_test(&dir.path().join(".gfs-backup-write-test-gone"));
    }

    #[test]
    fn test_target_directory_checks() {
        let dir = tempfile::tempdir().unwrap();
        validate_target_directory(dir.path()).unwrap();
        // No write-test file left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(validate_target_directory(Path::new("relative/backups")).is_err());
        assert!(validate_target_directory(&dir.path().join("missing")).is_err());

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(validate_target_directory(&file).is_err());
    }
}
