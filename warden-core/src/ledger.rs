use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{WardenError, WardenResult};
use crate::governor::DecisionMode;

/// Actions older than the cap are dropped oldest-first on every append.
pub const ACTION_HISTORY_CAP: usize = 100;

/// Closed detail payload attached to an [`ActionRecord`]. One variant per
/// record kind, so reporting code never digs through untyped maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDetails {
    None,
    Denied { reason: String, mode: DecisionMode },
    Operation { summary: String },
    Failure { error: String },
}

impl Default for ActionDetails {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub action_type: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub success: bool,
    pub suspicion_at_time: u8,
    #[serde(default)]
    pub details: ActionDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub error_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub suspicion_at_time: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub timestamp: DateTime<Utc>,
    pub duration_minutes: i64,
    pub reason: String,
    pub suspicion_at_time: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub action: String,
}

impl EmergencyRecord {
    pub fn new(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            reason: reason.into(),
            action: "EMERGENCY_STOP".to_string(),
        }
    }
}

/// The single shared mutable resource of the supervisor. Flushed to disk
/// after every mutation; `suspicion_level` is clamped to 0..=100 at every
/// observation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub suspicion_level: u8,
    pub recovery_mode: bool,
    #[serde(default)]
    pub recovery_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub recoveries: Vec<RecoveryEvent>,
    #[serde(default)]
    pub emergencies: Vec<EmergencyRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for SafetyState {
    fn default() -> Self {
        Self {
            suspicion_level: 0,
            recovery_mode: false,
            recovery_until: None,
            actions: Vec::new(),
            errors: Vec::new(),
            recoveries: Vec::new(),
            emergencies: Vec::new(),
            last_updated: None,
        }
    }
}

impl SafetyState {
    pub fn actions_on(&self, date: NaiveDate) -> usize {
        self.actions.iter().filter(|a| a.date == date).count()
    }

    pub fn errors_on(&self, date: NaiveDate) -> usize {
        self.errors
            .iter()
            .filter(|e| e.timestamp.date_naive() == date)
            .count()
    }
}

/// Persistence seam for [`SafetyState`]. The on-disk contract is a JSON
/// file, but the governor only talks to this trait, so an embedded
/// key-value store could replace it without touching policy logic.
pub trait StateStore: Send {
    fn load(&self) -> WardenResult<Option<SafetyState>>;
    fn save(&self, state: &SafetyState) -> WardenResult<()>;
}

#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| WardenError::io(source, parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> WardenResult<Option<SafetyState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|source| WardenError::io(source, &self.path))?;
        let state: SafetyState = serde_json::from_str(&content)?;
        info!(
            actions = state.actions.len(),
            suspicion = state.suspicion_level,
            "loaded previous safety state"
        );
        Ok(Some(state))
    }

    fn save(&self, state: &SafetyState) -> WardenResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        // Write-to-temp-then-rename so a crash mid-write never leaves a
        // truncated state file behind.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|source| WardenError::io(source, &parent))?;
        tmp.write_all(&json)
            .map_err(|source| WardenError::io(source, &self.path))?;
        tmp.persist(&self.path)
            .map_err(|err| WardenError::io(err.error, &self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state() -> SafetyState {
        let now = Utc::now();
        SafetyState {
            suspicion_level: 42,
            recovery_mode: true,
            recovery_until: Some(now + chrono::Duration::minutes(30)),
            actions: vec![ActionRecord {
                action_type: "connection".to_string(),
                timestamp: now,
                date: now.date_naive(),
                success: true,
                suspicion_at_time: 42,
                details: ActionDetails::Operation {
                    summary: "sent invite".to_string(),
                },
            }],
            errors: vec![ErrorRecord {
                error_type: "operation_failed".to_string(),
                timestamp: now,
                details: "timeout".to_string(),
                suspicion_at_time: 42,
            }],
            recoveries: vec![RecoveryEvent {
                timestamp: now,
                duration_minutes: 60,
                reason: "repeated errors".to_string(),
                suspicion_at_time: 72,
            }],
            emergencies: vec![EmergencyRecord::new(now, "challenge stop")],
            last_updated: Some(now),
        }
    }

    #[test]
    fn state_round_trips_losslessly() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("session/security_state.json")).unwrap();
        let state = sample_state();
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().expect("state should exist");
        assert_eq!(loaded.suspicion_level, state.suspicion_level);
        assert_eq!(loaded.recovery_mode, state.recovery_mode);
        assert_eq!(loaded.actions.len(), state.actions.len());
        assert_eq!(loaded.errors.len(), state.errors.len());
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json")).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_replaces_existing_content() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json")).unwrap();
        store.save(&SafetyState::default()).unwrap();
        let mut updated = SafetyState::default();
        updated.suspicion_level = 7;
        store.save(&updated).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.suspicion_level, 7);
    }

    #[test]
    fn details_serialize_with_kind_tag() {
        let details = ActionDetails::Denied {
            reason: "daily limit reached (25/25)".to_string(),
            mode: DecisionMode::LimitReached,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "denied");
        assert_eq!(json["mode"], "limit_reached");
    }
}
