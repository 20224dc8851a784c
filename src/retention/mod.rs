/// Retention engine: prunes a configuration's target directory.
///
/// One cleanup pass:
/// 1. Optionally purges expired `YYYY_MM` subdirectories (opt-in per
///    configuration)
/// 2. Scans the tree for files whose names parse as artifacts
/// 3. Plans GFS retention over them (see [`plan`])
/// 4. Deletes what the plan drops, best-effort
/// 5. Removes directories the deletions left empty
///
/// Files whose names don't parse are never touched by steps 2-5. Deletion
/// is not transactional; an interrupted pass is finished by the next one.
pub mod artifact;
pub mod plan;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Months, NaiveDate};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use self::artifact::ArtifactName;
use self::plan::DatedArtifact;
use crate::error::BackupError;
use crate::policy::BackupConfiguration;
use crate::state::models::ExecutionLogEntry;

/// Result of one cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Artifact files removed.
    pub removed: usize,
    /// Artifact files kept.
    pub kept: usize,
    /// Log entries to persist, in the order they happened.
    pub entries: Vec<ExecutionLogEntry>,
}

/// Find every artifact under `root`. Symlinks are not followed.
pub fn scan(root: &Path) -> Vec<DatedArtifact> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(parsed) = ArtifactName::parse(name) {
            found.push(DatedArtifact {
                path: entry.into_path(),
                created_at: parsed.created_at,
            });
        }
    }
    found
}

/// Delete `paths`, collecting one warning entry per failure.
pub fn remove_artifacts(config_id: Uuid, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<ExecutionLogEntry>) {
    let mut removed = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed backup artifact");
                removed.push(path.clone());
            }
            Err(source) => {
                let err = BackupError::Deletion {
                    path: path.clone(),
                    source,
                };
                warn!(config_id = %config_id, error = %err, "Artifact deletion failed");
                warnings.push(ExecutionLogEntry::warning(config_id, err.to_string()));
            }
        }
    }

    (removed, warnings)
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none())
}

/// Remove directories under `root` that became empty because files were
/// deleted from them. `root` itself always stays.
fn prune_emptied_dirs(root: &Path, removed: &[PathBuf]) {
    // Deepest first so a parent sees its children already gone.
    let mut candidates: BTreeSet<(std::cmp::Reverse<usize>, PathBuf)> = BTreeSet::new();
    for path in removed {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == root || !d.starts_with(root) {
                break;
            }
            candidates.insert((std::cmp::Reverse(d.components().count()), d.to_path_buf()));
            dir = d.parent();
        }
    }

    for (_, dir) in candidates {
        if is_empty_dir(&dir) {
            match fs::remove_dir(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "Removed empty backup directory"),
                Err(e) => debug!(dir = %dir.display(), error = %e, "Could not remove directory"),
            }
        }
    }
}

/// Parse a `YYYY_MM` directory name.
fn month_dir(name: &str) -> Option<(i32, u32)> {
    let (year, month) = name.split_once('_')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Remove `YYYY_MM` directories directly under `root` whose month is at or
/// before `today` minus `months`.
fn purge_expired_dirs(
    config_id: Uuid,
    root: &Path,
    today: NaiveDate,
    months: u32,
) -> Vec<ExecutionLogEntry> {
    let mut entries = Vec::new();
    let Some(cutoff) = today.checked_sub_months(Months::new(months)) else {
        return entries;
    };
    let cutoff = (cutoff.year(), cutoff.month());

    let dirs = match fs::read_dir(root) {
        Ok(dirs) => dirs,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot list target directory");
            return entries;
        }
    };

    for entry in dirs.flatten() {
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        let name = entry.file_name();
        let Some(month) = name.to_str().and_then(month_dir) else {
            continue;
        };
        if !is_dir || month > cutoff {
            continue;
        }

        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(config_id = %config_id, dir = %path.display(), "Purged expired backup directory");
                entries.push(ExecutionLogEntry::warning(
                    config_id,
                    format!("Removed expired directory {}", path.display()),
                ));
            }
            Err(source) => {
                let err = BackupError::Deletion { path, source };
                warn!(config_id = %config_id, error = %err, "Directory purge failed");
                entries.push(ExecutionLogEntry::warning(config_id, err.to_string()));
            }
        }
    }

    entries
}

/// Run one retention pass for `config` as of `today`.
pub fn cleanup(config: &BackupConfiguration, today: NaiveDate) -> CleanupReport {
    let policy = &config.retention;
    let mut report = CleanupReport::default();

    if !policy.cleanup_enabled {
        return report;
    }

    let root = config.target_directory.as_path();
    if !root.is_dir() {
        report.entries.push(ExecutionLogEntry::error(
            config.id,
            format!("Cleanup skipped: {} is not a directory", root.display()),
        ));
        return report;
    }

    info!(config_id = %config.id, root = %root.display(), "Starting backup cleanup");

    if policy.purge_expired_dirs && policy.monthly_keep_months > 0 {
        report
            .entries
            .extend(purge_expired_dirs(config.id, root, today, policy.monthly_keep_months));
    }

    let artifacts = scan(root);
    let planned = plan::plan(artifacts, today, policy);
    let doomed: Vec<PathBuf> = planned.delete.into_iter().map(|(a, _)| a.path).collect();

    let (removed, warnings) = remove_artifacts(config.id, &doomed);
    prune_emptied_dirs(root, &removed);

    report.removed = removed.len();
    report.kept = planned.keep.len();
    report.entries.extend(warnings);

    info!(
        config_id = %config.id,
        removed = report.removed,
        kept = report.kept,
        "Backup cleanup complete"
    );
    report.entries.push(ExecutionLogEntry::success(
        config.id,
        format!("Cleanup removed {} file(s), kept {}", report.removed, report.kept),
    ));

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RetentionPolicy;
    use crate::schedule::ScheduleMode;
    use crate::state::models::LogStatus;
    use chrono::Utc;

    fn config_for(root: &Path, retention: RetentionPolicy) -> BackupConfiguration {
        let now = Utc::now();
        BackupConfiguration {
            id: Uuid::now_v7(),
            target_directory: root.to_path_buf(),
            enabled: true,
            schedule: ScheduleMode::Daily,
            last_execution: None,
            retention,
            encrypted_credential: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn touch_aged(dir: &Path, days: i64, hour: u32) -> PathBuf {
        let created = (today() - chrono::Duration::days(days)).and_hms_opt(hour, 0, 0).unwrap();
        let path = dir.join(ArtifactName::new("prod", created).file_name());
        fs::create_dir_all(dir).unwrap();
        fs::write(&path, b"zip").unwrap();
        path
    }

    #[test]
    fn test_month_dir() {
        assert_eq!(month_dir("2024_05"), Some((2024, 5)));
        assert_eq!(month_dir("2024_13"), None);
        assert_eq!(month_dir("2024-05"), None);
        assert_eq!(month_dir("24_05"), None);
    }

    #[test]
    fn test_disabled_cleanup_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch_aged(dir.path(), 900, 1);
        let policy = RetentionPolicy {
            cleanup_enabled: false,
            ..RetentionPolicy::default()
        };
        let report = cleanup(&config_for(dir.path(), policy), today());
        assert!(report.entries.is_empty());
        assert!(old.exists());
    }

    #[test]
    fn test_cleanup_applies_plan_and_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RetentionPolicy {
            daily_keep_days: 7,
            weekly_keep_weeks: 4,
            monthly_keep_months: 6,
            ..RetentionPolicy::default()
        };
        let fresh = touch_aged(dir.path(), 0, 1);
        let same_week_old = touch_aged(dir.path(), 10, 1);
        let same_week_new = touch_aged(dir.path(), 9, 1);
        let expired = touch_aged(dir.path(), 200, 1);
        let notes = dir.path().join("README.txt");
        fs::write(&notes, b"keep me").unwrap();

        let report = cleanup(&config_for(dir.path(), policy), today());

        assert!(fresh.exists());
        assert!(same_week_new.exists());
        assert!(!same_week_old.exists());
        assert!(!expired.exists());
        assert!(notes.exists());
        assert_eq!(report.removed, 2);
        assert_eq!(report.kept, 2);

        let summary = report.entries.last().unwrap();
        assert_eq!(summary.status, LogStatus::Success);
        assert!(summary.message.contains("removed 2"));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for days in [0, 3, 9, 10, 11, 35, 70, 400] {
            touch_aged(dir.path(), days, 2);
        }
        let config = config_for(dir.path(), RetentionPolicy::default());

        let first = cleanup(&config, today());
        assert!(first.removed > 0);

        let second = cleanup(&config, today());
        assert_eq!(second.removed, 0);
        assert_eq!(second.kept, first.kept);
        assert_eq!(second.entries.len(), 1);
        assert!(second.entries[0].message.contains("removed 0"));
    }

    #[test]
    fn test_nested_dirs_scanned_and_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2023_01");
        let lone = touch_aged(&nested, 500, 1);
        let kept = touch_aged(dir.path(), 0, 1);

        let report = cleanup(&config_for(dir.path(), RetentionPolicy::default()), today());
        assert_eq!(report.removed, 1);
        assert!(!lone.exists());
        assert!(!nested.exists(), "emptied directory should be removed");
        assert!(kept.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_dir_with_foreign_files_is_not_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("archive");
        let old = touch_aged(&nested, 500, 1);
        fs::write(nested.join("manual-copy.sql"), b"x").unwrap();

        cleanup(&config_for(dir.path(), RetentionPolicy::default()), today());
        assert!(!old.exists());
        assert!(nested.join("manual-copy.sql").exists());
    }

    #[test]
    fn test_purge_expired_dirs_is_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let expired = dir.path().join("2023_11");
        let current = dir.path().join("2024_06");
        fs::create_dir_all(&expired).unwrap();
        fs::create_dir_all(&current).unwrap();
        fs::write(expired.join("notes.txt"), b"x").unwrap();
        fs::write(current.join("notes.txt"), b"x").unwrap();

        let mut policy = RetentionPolicy {
            monthly_keep_months: 6,
            ..RetentionPolicy::default()
        };
        cleanup(&config_for(dir.path(), policy), today());
        assert!(expired.exists());

        policy.purge_expired_dirs = true;
        let report = cleanup(&config_for(dir.path(), policy), today());
        assert!(!expired.exists());
        assert!(current.exists());
        assert!(report
            .entries
            .iter()
            .any(|e| e.status == LogStatus::Warning && e.message.contains("2023_11")));
    }

    #[test]
    fn test_remove_artifacts_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let present = touch_aged(dir.path(), 1, 1);
        let missing = dir.path().join("db_backup_prod_2020_01_01_000000.zip");
        let id = Uuid::now_v7();

        let (removed, warnings) = remove_artifacts(id, &[missing.clone(), present.clone()]);
        assert_eq!(removed, vec![present]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].status, LogStatus::Warning);
        assert!(warnings[0].message.contains(&missing.display().to_string()));
    }

    #[test]
    fn test_missing_root_logs_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let report = cleanup(&config_for(&gone, RetentionPolicy::default()), today());
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].status, LogStatus::Error);
    }
}
