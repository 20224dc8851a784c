/// Repository layer: typed database queries for gfs-backup.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// so builds never need a live database.
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use super::models::*;
use crate::error::Result;
use crate::policy::BackupConfiguration;

// ── Parameters ──

pub async fn get_param(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM config_params WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn insert_param_if_absent(pool: &SqlitePool, key: &str, value: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO config_params (key, value, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ── Configurations ──

fn window(value: u32) -> i64 {
    i64::from(value)
}

pub async fn insert_configuration(pool: &SqlitePool, config: &BackupConfiguration) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO backup_configs
        (id, target_directory, enabled, schedule_mode, run_hours, last_execution_at,
         cleanup_enabled, daily_keep_days, weekly_keep_weeks, monthly_keep_months,
         purge_expired_dirs, encrypted_credential, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(config.id)
    .bind(config.target_directory.to_string_lossy().into_owned())
    .bind(config.enabled)
    .bind(config.schedule.mode_name())
    .bind(config.schedule.hours_column())
    .bind(config.last_execution)
    .bind(config.retention.cleanup_enabled)
    .bind(window(config.retention.daily_keep_days))
    .bind(window(config.retention.weekly_keep_weeks))
    .bind(window(config.retention.monthly_keep_months))
    .bind(config.retention.purge_expired_dirs)
    .bind(config.encrypted_credential.as_deref())
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the user-editable columns. `last_execution_at` is left alone;
/// only [`set_last_execution`] moves it.
pub async fn update_configuration(pool: &SqlitePool, config: &BackupConfiguration) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE backup_configs
        SET target_directory = $2, enabled = $3, schedule_mode = $4, run_hours = $5,
            cleanup_enabled = $6, daily_keep_days = $7, weekly_keep_weeks = $8,
            monthly_keep_months = $9, purge_expired_dirs = $10,
            encrypted_credential = $11, updated_at = $12
        WHERE id = $1
        "#,
    )
    .bind(config.id)
    .bind(config.target_directory.to_string_lossy().into_owned())
    .bind(config.enabled)
    .bind(config.schedule.mode_name())
    .bind(config.schedule.hours_column())
    .bind(config.retention.cleanup_enabled)
    .bind(window(config.retention.daily_keep_days))
    .bind(window(config.retention.weekly_keep_weeks))
    .bind(window(config.retention.monthly_keep_months))
    .bind(config.retention.purge_expired_dirs)
    .bind(config.encrypted_credential.as_deref())
    .bind(config.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_configuration(pool: &SqlitePool, id: Uuid) -> Result<Option<BackupConfiguration>> {
    sqlx::query_as::<_, ConfigurationRow>("SELECT * FROM backup_configs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(BackupConfiguration::try_from)
        .transpose()
}

/// Convert rows, skipping (and logging) any that no longer hold a valid
/// configuration so one bad row cannot block the others.
fn convert_rows(rows: Vec<ConfigurationRow>) -> Vec<BackupConfiguration> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            BackupConfiguration::try_from(row)
                .map_err(|e| warn!(config_id = %id, error = %e, "Skipping unreadable configuration"))
                .ok()
        })
        .collect()
}

pub async fn list_configurations(pool: &SqlitePool) -> Result<Vec<BackupConfiguration>> {
    let rows = sqlx::query_as::<_, ConfigurationRow>("SELECT * FROM backup_configs ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    Ok(convert_rows(rows))
}

pub async fn list_enabled_configurations(pool: &SqlitePool) -> Result<Vec<BackupConfiguration>> {
    let rows = sqlx::query_as::<_, ConfigurationRow>(
        "SELECT * FROM backup_configs WHERE enabled = 1 ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(convert_rows(rows))
}

pub async fn delete_configuration(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM backup_configs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_last_execution(pool: &SqlitePool, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE backup_configs SET last_execution_at = $2 WHERE id = $1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;

    Ok(())
}

// ── Execution log ──

pub async fn insert_log(pool: &SqlitePool, entry: &ExecutionLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO backup_logs (id, config_id, status, message, artifact_path, artifact_size, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.config_id)
    .bind(entry.status)
    .bind(&entry.message)
    .bind(entry.artifact_path.as_deref())
    .bind(entry.artifact_size.as_deref())
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent log entries, newest first, optionally for one configuration.
pub async fn recent_logs(
    pool: &SqlitePool,
    config_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<ExecutionLogEntry>> {
    let entries = match config_id {
        Some(id) => {
            sqlx::query_as::<_, ExecutionLogEntry>(
                "SELECT * FROM backup_logs WHERE config_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            )
            .bind(id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ExecutionLogEntry>(
                "SELECT * FROM backup_logs ORDER BY created_at DESC, id DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RetentionPolicy;
    use crate::schedule::{HourSet, ScheduleMode};
    use crate::state::Database;

    fn sample(dir: &str) -> BackupConfiguration {
        let now = Utc::now();
        BackupConfiguration {
            id: Uuid::now_v7(),
            target_directory: dir.into(),
            enabled: true,
            schedule: ScheduleMode::FixedHours(HourSet::parse_strict("3,13").unwrap()),
            last_execution: None,
            retention: RetentionPolicy::default(),
            encrypted_credential: Some("token".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_param_insert_if_absent() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(get_param(db.pool(), "k").await.unwrap(), None);
        assert!(insert_param_if_absent(db.pool(), "k", "first").await.unwrap());
        assert!(!insert_param_if_absent(db.pool(), "k", "second").await.unwrap());
        assert_eq!(get_param(db.pool(), "k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_configuration_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let config = sample("/srv/backups");
        insert_configuration(db.pool(), &config).await.unwrap();

        let loaded = get_configuration(db.pool(), config.id).await.unwrap().unwrap();
        assert_eq!(loaded.target_directory, config.target_directory);
        assert_eq!(loaded.schedule, config.schedule);
        assert_eq!(loaded.retention, config.retention);
        assert_eq!(loaded.encrypted_credential.as_deref(), Some("token"));
        assert!(loaded.last_execution.is_none());
    }

    #[tokio::test]
    async fn test_list_enabled_and_last_execution() {
        let db = Database::in_memory().await.unwrap();
        let active = sample("/srv/a");
        let mut inactive = sample("/srv/b");
        inactive.enabled = false;
        insert_configuration(db.pool(), &active).await.unwrap();
        insert_configuration(db.pool(), &inactive).await.unwrap();

        let enabled = list_enabled_configurations(db.pool()).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, active.id);
        assert_eq!(list_configurations(db.pool()).await.unwrap().len(), 2);

        let at = Utc::now();
        set_last_execution(db.pool(), active.id, at).await.unwrap();
        let loaded = get_configuration(db.pool(), active.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_execution.map(|t| t.timestamp()), Some(at.timestamp()));
    }

    #[tokio::test]
    async fn test_unreadable_row_is_skipped() {
        let db = Database::in_memory().await.unwrap();
        let good = sample("/srv/good");
        let mut bad = sample("/srv/bad");
        bad.id = Uuid::now_v7();
        insert_configuration(db.pool(), &good).await.unwrap();
        insert_configuration(db.pool(), &bad).await.unwrap();
        sqlx::query("UPDATE backup_configs SET schedule_mode = 'yearly' WHERE id = $1")
            .bind(bad.id)
            .execute(db.pool())
            .await
            .unwrap();

        let listed = list_enabled_configurations(db.pool()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
        assert!(get_configuration(db.pool(), bad.id).await.is_err());
    }

    #[tokio::test]
    async fn test_logs_survive_configuration_delete() {
        let db = Database::in_memory().await.unwrap();
        let config = sample("/srv/a");
        insert_configuration(db.pool(), &config).await.unwrap();
        insert_log(db.pool(), &ExecutionLogEntry::success(config.id, "Backup OK"))
            .await
            .unwrap();

        assert!(delete_configuration(db.pool(), config.id).await.unwrap());
        assert!(!delete_configuration(db.pool(), config.id).await.unwrap());

        let logs = recent_logs(db.pool(), None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].config_id, None);
        assert_eq!(logs[0].status, LogStatus::Success);
    }
}
