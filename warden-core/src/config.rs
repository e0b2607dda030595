use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WardenConfig {
    pub platform: PlatformSection,
    pub paths: PathsSection,
    pub limits: LimitsSection,
    #[serde(default)]
    pub behavior: BehaviorSection,
    #[serde(default)]
    pub suspicion: SuspicionSection,
    #[serde(default)]
    pub challenge: ChallengeSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub recovery: RecoverySection,
}

impl WardenConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    pub name: String,
    pub base_url: String,
    /// Content fragments that indicate an authenticated, healthy session.
    pub home_indicators: Vec<String>,
    /// URL fragments that indicate a forced-login page.
    pub login_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub state_file: String,
    pub stats_file: String,
    pub journal_file: String,
    pub backup_dir: String,
    pub session_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    /// Maximum recorded actions per calendar day, keyed by action type.
    pub daily_quotas: BTreeMap<String, u32>,
    pub min_action_delay_seconds: u64,
    pub max_action_delay_seconds: u64,
    #[serde(default = "default_delay_floor")]
    pub delay_floor_seconds: u64,
    #[serde(default = "default_delay_ceiling")]
    pub delay_ceiling_seconds: u64,
}

fn default_delay_floor() -> u64 {
    10
}

fn default_delay_ceiling() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    /// Allowed operating window per lowercase weekday name, as
    /// `["HH:MM", "HH:MM"]`. A day without an entry is non-operating.
    /// `None` disables the schedule gate entirely.
    pub work_schedule: Option<BTreeMap<String, [String; 2]>>,
    /// Local peak-hour windows `[start_hour, end_hour]`, inclusive.
    pub peak_hours: Vec<[u32; 2]>,
    pub peak_multiplier: f64,
    pub connection_multiplier: f64,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            work_schedule: None,
            peak_hours: vec![[9, 11], [14, 16]],
            peak_multiplier: 1.3,
            connection_multiplier: 1.2,
        }
    }
}

/// Suspicion deltas. The literals match the historical behaviour of the
/// supervisor; none of them has a derivation beyond field experience, so
/// they are tunables rather than hard-coded constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuspicionSection {
    pub success_decay: u8,
    pub action_failure_increase: u8,
    pub error_increase: u8,
    pub pattern_increase: u8,
    pub recovery_entry_increase: u8,
    pub recovery_exit_decay: u8,
    pub deny_threshold: u8,
    pub pattern_interval_ceiling_seconds: i64,
}

impl Default for SuspicionSection {
    fn default() -> Self {
        Self {
            success_decay: 1,
            action_failure_increase: 5,
            error_increase: 10,
            pattern_increase: 20,
            recovery_entry_increase: 30,
            recovery_exit_decay: 20,
            deny_threshold: 70,
            pattern_interval_ceiling_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePolicy {
    Wait,
    Notify,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeSection {
    pub keywords: Vec<String>,
    pub selectors: Vec<String>,
    pub url_markers: Vec<String>,
    pub policy: ChallengePolicy,
    pub wait_seconds: u64,
}

impl Default for ChallengeSection {
    fn default() -> Self {
        Self {
            keywords: vec![
                "captcha".into(),
                "verification".into(),
                "not a robot".into(),
                "security check".into(),
                "verify".into(),
            ],
            selectors: vec![
                "iframe[src*='captcha']".into(),
                "div[class*='captcha']".into(),
                "div[id*='captcha']".into(),
                "img[src*='captcha']".into(),
            ],
            url_markers: vec!["challenge".into(), "verify".into(), "security".into()],
            policy: ChallengePolicy::Wait,
            wait_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub hourly_retain: usize,
    pub daily_retain: usize,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            hourly_retain: 24,
            daily_retain: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    /// Trailing window inspected when deciding whether repeated errors
    /// should flip the account into recovery mode.
    pub error_window_seconds: i64,
    pub error_threshold: usize,
    pub recovery_minutes: i64,
    pub emergency_minutes: i64,
    pub probe_attempts: u32,
    pub probe_wait_seconds: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            error_window_seconds: 3600,
            error_threshold: 3,
            recovery_minutes: 60,
            emergency_minutes: 240,
            probe_attempts: 3,
            probe_wait_seconds: 3,
        }
    }
}

pub fn load_warden_config<P: AsRef<Path>>(path: P) -> Result<WardenConfig> {
    let config: WardenConfig = load_toml(path)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &WardenConfig) -> Result<()> {
    Url::parse(&config.platform.base_url).map_err(|err| ConfigError::Invalid {
        field: "platform.base_url".to_string(),
        message: err.to_string(),
    })?;
    if config.limits.min_action_delay_seconds > config.limits.max_action_delay_seconds {
        return Err(ConfigError::Invalid {
            field: "limits.min_action_delay_seconds".to_string(),
            message: "minimum delay exceeds maximum delay".to_string(),
        });
    }
    if let Some(schedule) = &config.behavior.work_schedule {
        for (day, window) in schedule {
            for bound in window {
                if parse_hhmm(bound).is_none() {
                    return Err(ConfigError::Invalid {
                        field: format!("behavior.work_schedule.{day}"),
                        message: format!("expected HH:MM, got {bound}"),
                    });
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let (hours, minutes) = value.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours < 24 && minutes < 60 {
        Some((hours, minutes))
    } else {
        None
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
