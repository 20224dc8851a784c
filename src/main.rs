use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gfs_backup::configs::ConfigurationService;
use gfs_backup::crypto::sensitive::Credential;
use gfs_backup::crypto::vault::CredentialVault;
use gfs_backup::driver;
use gfs_backup::error::{BackupError, Result};
use gfs_backup::executor::BackupExecutor;
use gfs_backup::host::http::{HttpBackupProducer, HttpCredentialValidator};
use gfs_backup::host::{CredentialValidator, DeferredCredentialCheck};
use gfs_backup::policy::{BackupConfiguration, ConfigurationDraft};
use gfs_backup::schedule::ScheduleMode;
use gfs_backup::settings::{Settings, DEFAULT_SETTINGS_FILE};
use gfs_backup::state::{repository, Database};

/// Environment variable holding the master password for `config` commands.
const MASTER_PASSWORD_ENV: &str = "GFS_MASTER_PASSWORD";

#[derive(Parser)]
#[command(name = "gfs-backup")]
#[command(about = "Scheduled local backups with grandfather-father-son retention")]
#[command(version)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every backup that is due now (fire hourly)
    TickHourly,
    /// Apply retention to every enabled configuration (fire daily)
    TickDaily,
    /// Manage backup configurations
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Show recent execution log entries
    Logs {
        /// Only entries for this configuration
        #[arg(long)]
        config: Option<Uuid>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create a configuration
    Add {
        /// Absolute, writable target directory
        #[arg(long)]
        target: PathBuf,
        #[command(flatten)]
        fields: ConfigFields,
    },
    /// Change a configuration; omitted fields keep their value
    Update {
        id: Uuid,
        #[arg(long)]
        target: Option<PathBuf>,
        #[command(flatten)]
        fields: ConfigFields,
    },
    /// List configurations
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a configuration (its log entries are kept)
    Remove { id: Uuid },
}

#[derive(Args)]
struct ConfigFields {
    /// daily, weekly, monthly or hours
    #[arg(long)]
    mode: Option<String>,
    /// Hours of day for `--mode hours`, e.g. "0,5,8"
    #[arg(long)]
    hours: Option<String>,
    #[arg(long)]
    enabled: Option<bool>,
    #[arg(long)]
    cleanup: Option<bool>,
    #[arg(long)]
    daily_keep_days: Option<u32>,
    #[arg(long)]
    weekly_keep_weeks: Option<u32>,
    #[arg(long)]
    monthly_keep_months: Option<u32>,
    /// Also delete whole YYYY_MM directories past the monthly window
    #[arg(long)]
    purge_expired_dirs: Option<bool>,
    /// Read and store the master password (from $GFS_MASTER_PASSWORD or stdin)
    #[arg(long)]
    with_credential: bool,
}

impl ConfigFields {
    fn apply(&self, draft: &mut ConfigurationDraft) -> Result<()> {
        match (&self.mode, &self.hours) {
            (Some(mode), hours) => draft.schedule = ScheduleMode::parse(mode, hours.as_deref())?,
            // New hours for an existing fixed-hours schedule.
            (None, Some(hours)) => draft.schedule = ScheduleMode::parse(ScheduleMode::FIXED_HOURS, Some(hours))?,
            (None, None) => {}
        }
        if let Some(enabled) = self.enabled {
            draft.enabled = enabled;
        }
        let retention = &mut draft.retention;
        if let Some(cleanup) = self.cleanup {
            retention.cleanup_enabled = cleanup;
        }
        if let Some(days) = self.daily_keep_days {
            retention.daily_keep_days = days;
        }
        if let Some(weeks) = self.weekly_keep_weeks {
            retention.weekly_keep_weeks = weeks;
        }
        if let Some(months) = self.monthly_keep_months {
            retention.monthly_keep_months = months;
        }
        if let Some(purge) = self.purge_expired_dirs {
            retention.purge_expired_dirs = purge;
        }
        Ok(())
    }

    async fn credential(&self) -> Result<Option<Credential>> {
        if !self.with_credential {
            return Ok(None);
        }
        if let Ok(value) = std::env::var(MASTER_PASSWORD_ENV) {
            return Ok(Some(Credential::new(value)));
        }
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(Some(Credential::new(line.trim_end_matches(['\r', '\n']))))
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_configuration(config: &BackupConfiguration) {
    let schedule = match config.schedule.hours_column() {
        Some(hours) => format!("{} [{hours}]", config.schedule.mode_name()),
        None => config.schedule.mode_name().to_string(),
    };
    let last = config
        .last_execution
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let r = &config.retention;
    println!(
        "{}  {}  {}  enabled={} cleanup={} keep={}d/{}w/{}m  last={}",
        config.id,
        config.target_directory.display(),
        schedule,
        config.enabled,
        r.cleanup_enabled,
        r.daily_keep_days,
        r.weekly_keep_weeks,
        r.monthly_keep_months,
        last,
    );
}

async fn run_config(service: ConfigurationService, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Add { target, fields } => {
            let mode = fields.mode.as_deref().ok_or_else(|| {
                BackupError::InvalidConfiguration("--mode is required when adding".into())
            })?;
            let schedule = ScheduleMode::parse(mode, fields.hours.as_deref())?;
            let mut draft = ConfigurationDraft::new(target, schedule);
            fields.apply(&mut draft)?;
            let credential = fields.credential().await?;
            let config = service.create(draft, credential.as_ref()).await?;
            print_configuration(&config);
        }
        ConfigCommands::Update { id, target, fields } => {
            let mut draft = ConfigurationDraft::from_existing(&service.get(id).await?);
            if let Some(target) = target {
                draft.target_directory = target;
            }
            fields.apply(&mut draft)?;
            let credential = fields.credential().await?;
            let config = service.update(id, draft, credential.as_ref()).await?;
            print_configuration(&config);
        }
        ConfigCommands::List { json } => {
            let configs = service.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&configs)?);
            } else {
                configs.iter().for_each(print_configuration);
            }
        }
        ConfigCommands::Remove { id } => {
            service.delete(id).await?;
            println!("Removed {id}");
        }
    }
    Ok(())
}

async fn run(command: Commands, settings: Settings) -> Result<()> {
    let db = Database::connect(&settings.database_url).await?;
    let validator: Arc<dyn CredentialValidator> = match &settings.credential_check_path {
        Some(check_path) => Arc::new(HttpCredentialValidator::new(
            &settings.host_url,
            check_path,
            settings.producer_timeout(),
        )?),
        None => Arc::new(DeferredCredentialCheck),
    };
    let vault = Arc::new(CredentialVault::new(Arc::new(db.clone()), validator));

    match command {
        Commands::TickHourly => {
            let producer = Arc::new(HttpBackupProducer::new(
                &settings.host_url,
                settings.producer_timeout(),
            )?);
            let executor = Arc::new(BackupExecutor::new(
                db.clone(),
                vault,
                producer,
                settings.executor_options(),
            ));
            let summary = driver::run_backup_tick(&db, executor, Utc::now()).await?;
            println!(
                "{} due of {} enabled: {} succeeded, {} failed",
                summary.attempted, summary.evaluated, summary.succeeded, summary.failed
            );
        }
        Commands::TickDaily => {
            let summary = driver::run_cleanup_tick(&db, Utc::now().date_naive()).await?;
            println!(
                "{} configuration(s): removed {}, kept {}",
                summary.configurations, summary.removed, summary.kept
            );
        }
        Commands::Config(command) => {
            run_config(ConfigurationService::new(db, vault), command).await?;
        }
        Commands::Logs { config, limit, json } => {
            let entries = repository::recent_logs(db.pool(), config, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    let config_id = entry
                        .config_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {:<7}  {}  {}{}",
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.status,
                        config_id,
                        entry.message,
                        entry
                            .artifact_path
                            .map(|p| format!(" ({p})"))
                            .unwrap_or_default(),
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("gfs-backup: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.log_filter);
    debug!(
        settings_file = %cli
            .settings
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_SETTINGS_FILE))
            .display(),
        database = %settings.database_url,
        host = %settings.host_url,
        credential_check = settings.credential_check_path.as_deref().unwrap_or("deferred"),
        "Settings loaded"
    );

    match run(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
