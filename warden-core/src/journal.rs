use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::challenge::ChallengeOutcome;
use crate::error::{WardenError, WardenResult};

/// Entries beyond the cap are dropped oldest-first.
pub const JOURNAL_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub context: String,
    pub steps: Vec<String>,
    pub success: bool,
    pub platform_reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeEvent {
    pub detected_at: DateTime<Utc>,
    pub action_taken: String,
    pub status: ChallengeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Recovery(RecoveryAttempt),
    Challenge(ChallengeEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    last_updated: Option<DateTime<Utc>>,
    entries: Vec<JournalEntry>,
}

/// Rolling log of recovery and challenge events, shared by the
/// orchestrator and the challenge detector.
#[derive(Debug)]
pub struct RecoveryJournal {
    path: PathBuf,
    entries: Vec<JournalEntry>,
}

impl RecoveryJournal {
    pub fn open(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| WardenError::io(source, parent))?;
        }
        let entries = if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|source| WardenError::io(source, &path))?;
            let file: JournalFile = serde_json::from_str(&content)?;
            file.entries
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn append(&mut self, event: JournalEvent) -> WardenResult<()> {
        self.entries.push(JournalEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            event,
        });
        if self.entries.len() > JOURNAL_CAP {
            let excess = self.entries.len() - JOURNAL_CAP;
            self.entries.drain(..excess);
        }
        self.save()
    }

    fn save(&self) -> WardenResult<()> {
        let file = JournalFile {
            last_updated: Some(Utc::now()),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        fs::write(&self.path, json).map_err(|source| WardenError::io(source, &self.path))?;
        Ok(())
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
