/// Periodic drivers.
///
/// Two entry points meant to be fired by an external scheduler (cron, a
/// systemd timer):
/// - [`run_backup_tick`], hourly: back up every enabled configuration
///   whose schedule says it is due
/// - [`run_cleanup_tick`], daily: apply retention to every enabled
///   configuration
///
/// Configurations are processed concurrently and independently; one
/// failing configuration never stops the others.
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::executor::BackupExecutor;
use crate::retention::{self, CleanupReport};
use crate::schedule::should_run_now;
use crate::state::models::LogStatus;
use crate::state::{repository, Database};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackupTickSummary {
    /// Enabled configurations looked at.
    pub evaluated: usize,
    /// Configurations that were due and attempted.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupTickSummary {
    pub configurations: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Hourly tick: run every due backup as of `now`.
pub async fn run_backup_tick(
    db: &Database,
    executor: Arc<BackupExecutor>,
    now: DateTime<Utc>,
) -> Result<BackupTickSummary> {
    let configs = repository::list_enabled_configurations(db.pool()).await?;
    let mut summary = BackupTickSummary {
        evaluated: configs.len(),
        ..Default::default()
    };

    let mut tasks = JoinSet::new();
    for config in configs {
        if !should_run_now(&config.schedule, config.last_execution, now) {
            debug!(config_id = %config.id, "Backup not due");
            continue;
        }
        let executor = Arc::clone(&executor);
        tasks.spawn(async move { executor.execute_at(&config, now).await });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(entry)) => {
                summary.attempted += 1;
                if entry.status == LogStatus::Success {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                summary.attempted += 1;
                summary.failed += 1;
                error!(error = %e, "Backup task aborted");
            }
        }
    }

    info!(
        evaluated = summary.evaluated,
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Backup tick finished"
    );
    Ok(summary)
}

/// Daily tick: run a retention pass for every enabled configuration and
/// persist the entries each pass produced.
pub async fn run_cleanup_tick(db: &Database, today: NaiveDate) -> Result<CleanupTickSummary> {
    let configs = repository::list_enabled_configurations(db.pool()).await?;
    let mut summary = CleanupTickSummary {
        configurations: configs.len(),
        ..Default::default()
    };

    // Filesystem walking and deletion block; keep them off the runtime.
    let mut tasks = JoinSet::new();
    for config in configs {
        tasks.spawn_blocking(move || retention::cleanup(&config, today));
    }

    while let Some(joined) = tasks.join_next().await {
        let report: CleanupReport = match joined {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Cleanup task aborted");
                continue;
            }
        };
        summary.removed += report.removed;
        summary.kept += report.kept;
        for entry in &report.entries {
            if let Err(e) = repository::insert_log(db.pool(), entry).await {
                error!(config_id = ?entry.config_id, error = %e, "Failed to record cleanup log entry");
            }
        }
    }

    info!(
        configurations = summary.configurations,
        removed = summary.removed,
        kept = summary.kept,
        "Cleanup tick finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sensitive::Credential;
    use crate::crypto::vault::CredentialVault;
    use crate::executor::ExecutorOptions;
    use crate::host::{BackupProducer, CredentialValidator, ProducerOutcome};
    use crate::policy::{BackupConfiguration, RetentionPolicy};
    use crate::retention::artifact::ArtifactName;
    use crate::schedule::{HourSet, ScheduleMode};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct AcceptAll;

    #[async_trait]
    impl CredentialValidator for AcceptAll {
        async fn check_credential(&self, _credential: &Credential) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProducer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackupProducer for CountingProducer {
        fn name(&self) -> &str {
            "counting"
        }

        async fn invoke(
            &self,
            _credential: &Credential,
            _service_id: &str,
            _format: &str,
            dest: &Path,
        ) -> Result<ProducerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"PK").await?;
            Ok(ProducerOutcome::ok())
        }
    }

    async fn config(
        db: &Database,
        vault: &CredentialVault,
        dir: &Path,
        schedule: ScheduleMode,
        last_execution: Option<DateTime<Utc>>,
    ) -> BackupConfiguration {
        let now = Utc::now();
        let config = BackupConfiguration {
            id: Uuid::now_v7(),
            target_directory: dir.to_path_buf(),
            enabled: true,
            schedule,
            last_execution,
            retention: RetentionPolicy::default(),
            encrypted_credential: Some(vault.encrypt(&Credential::new("master")).await.unwrap()),
            created_at: now,
            updated_at: now,
        };
        repository::insert_configuration(db.pool(), &config).await.unwrap();
        config
    }

    #[tokio::test]
    async fn test_backup_tick_runs_only_due_configurations() {
        let db = Database::in_memory().await.unwrap();
        let vault = Arc::new(CredentialVault::new(Arc::new(db.clone()), Arc::new(AcceptAll)));
        let producer = Arc::new(CountingProducer::default());
        let executor = Arc::new(BackupExecutor::new(
            db.clone(),
            Arc::clone(&vault),
            producer.clone(),
            ExecutorOptions::default(),
        ));
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 3, 0, 0).unwrap();

        let due_dir = tempfile::tempdir().unwrap();
        let idle_dir = tempfile::tempdir().unwrap();
        let hours = ScheduleMode::FixedHours(HourSet::parse_strict("3").unwrap());
        let due = config(&db, &vault, due_dir.path(), hours, None).await;
        let idle = config(&db, &vault, idle_dir.path(), ScheduleMode::Daily, Some(now)).await;

        let summary = run_backup_tick(&db, Arc::clone(&executor), now).await.unwrap();
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);

        let name = ArtifactName::new("odoo", now.naive_utc()).file_name();
        assert!(due_dir.path().join(name).is_file());
        assert_eq!(std::fs::read_dir(idle_dir.path()).unwrap().count(), 0);

        let reloaded = repository::get_configuration(db.pool(), due.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_execution, Some(now));
        assert_eq!(repository::recent_logs(db.pool(), Some(idle.id), 10).await.unwrap().len(), 0);

        // Same hour again: the de-dup guard holds.
        let again = run_backup_tick(&db, executor, now).await.unwrap();
        assert_eq!(again.attempted, 0);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backup_tick_isolates_failures() {
        let db = Database::in_memory().await.unwrap();
        let vault = Arc::new(CredentialVault::new(Arc::new(db.clone()), Arc::new(AcceptAll)));
        let producer = Arc::new(CountingProducer::default());
        let executor = Arc::new(BackupExecutor::new(
            db.clone(),
            Arc::clone(&vault),
            producer.clone(),
            ExecutorOptions::default(),
        ));
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 9, 30, 0).unwrap();

        let good_dir = tempfile::tempdir().unwrap();
        let gone_dir = tempfile::tempdir().unwrap();
        let gone_path = gone_dir.path().join("vanished");
        config(&db, &vault, good_dir.path(), ScheduleMode::Daily, None).await;
        let broken = config(&db, &vault, &gone_path, ScheduleMode::Daily, None).await;

        let summary = run_backup_tick(&db, executor, now).await.unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let logs = repository::recent_logs(db.pool(), Some(broken.id), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Error);
        let reloaded = repository::get_configuration(db.pool(), broken.id).await.unwrap().unwrap();
        assert!(reloaded.last_execution.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_tick_persists_entries() {
        let db = Database::in_memory().await.unwrap();
        let vault = CredentialVault::new(Arc::new(db.clone()), Arc::new(AcceptAll));
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        let at = |days: i64| (today - chrono::Duration::days(days)).and_hms_opt(1, 0, 0).unwrap();
        for days in [0, 2, 400] {
            let name = ArtifactName::new("odoo", at(days)).file_name();
            std::fs::write(dir.path().join(name), b"PK").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        let config = config(&db, &vault, dir.path(), ScheduleMode::Daily, None).await;

        let summary = run_cleanup_tick(&db, today).await.unwrap();
        assert_eq!(summary.configurations, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.kept, 2);
        assert!(dir.path().join("notes.txt").exists());

        let logs = repository::recent_logs(db.pool(), Some(config.id), 10).await.unwrap();
        assert!(logs
            .iter()
            .any(|e| e.status == LogStatus::Success && e.message.contains("removed 1 file(s)")));
    }

    #[tokio::test]
    async fn test_cleanup_tick_skips_disabled_configurations() {
        let db = Database::in_memory().await.unwrap();
        let vault = CredentialVault::new(Arc::new(db.clone()), Arc::new(AcceptAll));
        let dir = tempfile::tempdir().unwrap();
        let mut disabled = config(&db, &vault, dir.path(), ScheduleMode::Daily, None).await;
        disabled.enabled = false;
        repository::update_configuration(db.pool(), &disabled).await.unwrap();

        let summary = run_cleanup_tick(&db, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
            .await
            .unwrap();
        assert_eq!(summary, CleanupTickSummary::default());
        assert!(repository::recent_logs(db.pool(), None, 10).await.unwrap().is_empty());
    }
}
