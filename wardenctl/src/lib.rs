use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use warden_core::{
    load_warden_config, BackupStore, BackupTier, JournalEntry, JournalEvent, JsonStateStore,
    RecoveryJournal, RecoveryOrchestrator, RecoveryStatus, SafetyGovernor, SafetyReport,
    SessionStats, SessionStatsStore, WardenConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] warden_core::ConfigError),
    #[error("core error: {0}")]
    Core(#[from] warden_core::WardenError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Session warden command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main warden.toml
    #[arg(long, default_value = "configs/warden.toml")]
    pub config: PathBuf,
    /// Override for paths.base_dir
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Alternate path to the safety state file
    #[arg(long)]
    pub state_file: Option<PathBuf>,
    /// Alternate path to the backup directory
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,
    /// Alternate path to the recovery journal
    #[arg(long)]
    pub journal_file: Option<PathBuf>,
    /// Token for local authentication (when WARDENCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a condensed operational status
    Status,
    /// Safety governor operations
    #[command(subcommand)]
    Safety(SafetyCommands),
    /// Crash-recovery operations
    #[command(subcommand)]
    Recovery(RecoveryCommands),
    /// Backup management
    #[command(subcommand)]
    Backup(BackupCommands),
    /// Recovery journal inspection
    #[command(subcommand)]
    Journal(JournalCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum SafetyCommands {
    /// Full safety report with suggested action and risk level
    Report,
}

#[derive(Subcommand, Debug)]
pub enum RecoveryCommands {
    /// Backup inventory and recovery readiness
    Status,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Create a backup of the current safety state
    Create(BackupCreateArgs),
}

#[derive(Args, Debug)]
pub struct BackupCreateArgs {
    /// Retention tier for the new backup
    #[arg(long, value_enum, default_value_t = TierArg::AdHoc)]
    pub tier: TierArg,
    /// Label appended to ad-hoc backup filenames
    #[arg(long, default_value = "manual")]
    pub label: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TierArg {
    Hourly,
    Daily,
    AdHoc,
}

impl From<TierArg> for BackupTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Hourly => BackupTier::Hourly,
            TierArg::Daily => BackupTier::Daily,
            TierArg::AdHoc => BackupTier::AdHoc,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum JournalCommands {
    /// Show the most recent journal entries
    Show(JournalShowArgs),
}

#[derive(Args, Debug)]
pub struct JournalShowArgs {
    /// Number of entries returned, newest last
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        clap_complete::generate(args.shell, &mut command, name, &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Safety(SafetyCommands::Report) => {
            let report = context.safety_report()?;
            render(&report, cli.format)?;
        }
        Commands::Recovery(RecoveryCommands::Status) => {
            let status = context.recovery_status()?;
            render(&status, cli.format)?;
        }
        Commands::Backup(BackupCommands::Create(args)) => {
            let created = context.backup_create(args)?;
            render(&created, cli.format)?;
        }
        Commands::Journal(JournalCommands::Show(args)) => {
            let list = context.journal_show(args)?;
            render(&list, cli.format)?;
        }
        Commands::Completions(_) => unreachable!("handled before context construction"),
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("WARDENCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: WardenConfig,
    state_path: PathBuf,
    stats_path: PathBuf,
    journal_path: PathBuf,
    backup_dir: PathBuf,
    session_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_warden_config(&cli.config)?;
        if let Some(base_dir) = &cli.base_dir {
            config.paths.base_dir = base_dir.to_string_lossy().to_string();
        }

        let state_path = cli
            .state_file
            .clone()
            .unwrap_or_else(|| config.resolve_path(&config.paths.state_file));
        let stats_path = config.resolve_path(&config.paths.stats_file);
        let journal_path = cli
            .journal_file
            .clone()
            .unwrap_or_else(|| config.resolve_path(&config.paths.journal_file));
        let backup_dir = cli
            .backup_dir
            .clone()
            .unwrap_or_else(|| config.resolve_path(&config.paths.backup_dir));
        let session_dir = config.resolve_path(&config.paths.session_dir);

        Ok(Self {
            config,
            state_path,
            stats_path,
            journal_path,
            backup_dir,
            session_dir,
        })
    }

    fn governor(&self) -> Result<SafetyGovernor> {
        let store = JsonStateStore::new(&self.state_path)?;
        Ok(SafetyGovernor::new(&self.config, Box::new(store))?)
    }

    fn backups(&self) -> Result<BackupStore> {
        Ok(BackupStore::new(
            &self.backup_dir,
            &self.session_dir,
            self.config.backup.clone(),
        )?)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let mut governor = self.governor()?;
        let report = governor.safety_report()?;
        let stats = SessionStatsStore::new(&self.stats_path)?.load_at(chrono::Utc::now())?;
        let backups = self.backups()?;

        Ok(StatusReport {
            platform: self.config.platform.name.clone(),
            safety: report,
            stats,
            backups_count: backups.backups_count(),
        })
    }

    fn safety_report(&self) -> Result<SafetyReport> {
        Ok(self.governor()?.safety_report()?)
    }

    fn recovery_status(&self) -> Result<RecoveryStatus> {
        let governor = self.governor()?;
        let journal = RecoveryJournal::open(&self.journal_path)?;
        let stats = SessionStatsStore::new(&self.stats_path)?;
        let orchestrator = RecoveryOrchestrator::new(
            Arc::new(Mutex::new(governor)),
            self.backups()?,
            Arc::new(Mutex::new(journal)),
            stats,
            None,
            self.config.platform.clone(),
            self.config.recovery.clone(),
        );
        Ok(orchestrator.recovery_status()?)
    }

    fn backup_create(&self, args: &BackupCreateArgs) -> Result<CreatedBackup> {
        let store = JsonStateStore::new(&self.state_path)?;
        let state = warden_core::StateStore::load(&store)?.unwrap_or_default();
        let backup = self.backups()?.snapshot(
            args.tier.into(),
            &args.label,
            json!({ "safety_state": state }),
            None,
        )?;
        Ok(CreatedBackup {
            path: backup.path.display().to_string(),
            tier: backup.tier.as_str().to_string(),
            timestamp: backup.timestamp,
        })
    }

    fn journal_show(&self, args: &JournalShowArgs) -> Result<JournalList> {
        let journal = RecoveryJournal::open(&self.journal_path)?;
        let entries = journal.entries();
        let start = entries.len().saturating_sub(args.limit);
        Ok(JournalList {
            rows: entries[start..].to_vec(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub platform: String,
    pub safety: SafetyReport,
    pub stats: SessionStats,
    pub backups_count: usize,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Platform: {}", self.platform)];
        lines.push(format!(
            "Suspicion: {}% (risk: {}, recovery mode: {})",
            self.safety.suspicion_level, self.safety.risk_level, self.safety.recovery_mode
        ));
        lines.push(format!(
            "Today: {} actions, {} errors",
            self.safety.actions_today, self.safety.errors_today
        ));
        lines.push(format!(
            "Session: {} connections, {} messages, {} profile views",
            self.stats.connections, self.stats.messages, self.stats.profiles_viewed
        ));
        lines.push(format!("Backups on disk: {}", self.backups_count));
        lines.join("\n")
    }
}

impl DisplayFallback for SafetyReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Suspicion: {}% ({})",
            self.suspicion_level, self.risk_level
        )];
        lines.push(format!("Recovery mode: {}", self.recovery_mode));
        lines.push(format!(
            "Today: {} actions, {} errors",
            self.actions_today, self.errors_today
        ));
        lines.push(format!("Suggested: {}", self.suggested_action));
        lines.push(format!("Safe until: {}", self.safe_until));
        lines.join("\n")
    }
}

impl DisplayFallback for RecoveryStatus {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Backups: {} ({} session snapshots)",
            self.backups_count, self.cookies_count
        )];
        match &self.last_backup {
            Some(name) => lines.push(format!(
                "Latest: {} ({} ago)",
                name, self.latest_backup_age
            )),
            None => lines.push("Latest: none".to_string()),
        }
        lines.push(format!("Status: {:?}", self.system_status));
        lines.push(format!("Recommendation: {}", self.recommendation));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedBackup {
    pub path: String,
    pub tier: String,
    pub timestamp: String,
}

impl DisplayFallback for CreatedBackup {
    fn display(&self) -> String {
        format!("Backup created: {} (tier: {})", self.path, self.tier)
    }
}

#[derive(Debug, Serialize)]
pub struct JournalList {
    pub rows: Vec<JournalEntry>,
}

impl DisplayFallback for JournalList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Journal is empty".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            match &entry.event {
                JournalEvent::Recovery(attempt) => lines.push(format!(
                    "{} recovery context={} success={} steps={}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    attempt.context,
                    attempt.success,
                    attempt.steps.len()
                )),
                JournalEvent::Challenge(event) => lines.push(format!(
                    "{} challenge action={} status={:?}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    event.action_taken,
                    event.status
                )),
            }
        }
        lines.join("\n")
    }
}
