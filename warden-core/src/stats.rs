use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{WardenError, WardenResult};

/// Daily session counters, one JSON file, rolled over when the calendar
/// day changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub date: NaiveDate,
    pub connections: u32,
    pub messages: u32,
    pub profiles_viewed: u32,
    pub errors: u32,
    #[serde(default)]
    pub last_connection: Option<DateTime<Utc>>,
}

impl SessionStats {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            connections: 0,
            messages: 0,
            profiles_viewed: 0,
            errors: 0,
            last_connection: None,
        }
    }
}

#[derive(Debug)]
pub struct SessionStatsStore {
    path: PathBuf,
}

impl SessionStatsStore {
    pub fn new(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| WardenError::io(source, parent))?;
        }
        Ok(Self { path })
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> WardenResult<SessionStats> {
        let today = now.date_naive();
        if !self.path.exists() {
            return Ok(SessionStats::fresh(today));
        }
        let content =
            fs::read_to_string(&self.path).map_err(|source| WardenError::io(source, &self.path))?;
        let stats: SessionStats = serde_json::from_str(&content)?;
        if stats.date != today {
            info!(previous = %stats.date, "rolling session statistics to new day");
            return Ok(SessionStats::fresh(today));
        }
        Ok(stats)
    }

    pub fn record_action(&self, action_type: &str) -> WardenResult<SessionStats> {
        self.record_action_at(action_type, Utc::now())
    }

    pub fn record_action_at(
        &self,
        action_type: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<SessionStats> {
        let mut stats = self.load_at(now)?;
        match action_type {
            "connection" => {
                stats.connections += 1;
                stats.last_connection = Some(now);
            }
            "message" => stats.messages += 1,
            "profile_view" => stats.profiles_viewed += 1,
            _ => {}
        }
        self.save(&stats)?;
        Ok(stats)
    }

    pub fn record_error(&self) -> WardenResult<SessionStats> {
        self.record_error_at(Utc::now())
    }

    pub fn record_error_at(&self, now: DateTime<Utc>) -> WardenResult<SessionStats> {
        let mut stats = self.load_at(now)?;
        stats.errors += 1;
        self.save(&stats)?;
        Ok(stats)
    }

    fn save(&self, stats: &SessionStats) -> WardenResult<()> {
        let json = serde_json::to_vec_pretty(stats)?;
        fs::write(&self.path, json).map_err(|source| WardenError::io(source, &self.path))?;
        Ok(())
    }
}
