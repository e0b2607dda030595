pub mod backup;
pub mod browser;
pub mod challenge;
pub mod config;
pub mod error;
pub mod governor;
pub mod journal;
pub mod ledger;
pub mod orchestrator;
pub mod stats;

pub use backup::{BackupRecord, BackupRef, BackupStore, BackupTier};
pub use browser::{BrowserControl, BrowserError, BrowserResult, CdpBrowser, Cookie};
pub use challenge::{ChallengeDetector, ChallengeOutcome};
pub use config::{
    load_warden_config, BackupSection, BehaviorSection, ChallengePolicy, ChallengeSection,
    LimitsSection, PathsSection, PlatformSection, RecoverySection, SuspicionSection, WardenConfig,
};
pub use error::{ConfigError, Result, WardenError, WardenResult};
pub use governor::{
    Decision, DecisionMode, EmergencyNotice, SafetyGovernor, SafetyReport,
};
pub use journal::{
    ChallengeEvent, JournalEntry, JournalEvent, RecoveryAttempt, RecoveryJournal, JOURNAL_CAP,
};
pub use ledger::{
    ActionDetails, ActionRecord, EmergencyRecord, ErrorRecord, JsonStateStore, RecoveryEvent,
    SafetyState, StateStore, ACTION_HISTORY_CAP,
};
pub use orchestrator::{RecoveryOrchestrator, RecoveryStatus, RunOutcome, SystemStatus};
pub use stats::{SessionStats, SessionStatsStore};
