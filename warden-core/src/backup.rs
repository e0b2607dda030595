use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::browser::Cookie;
use crate::config::BackupSection;
use crate::error::{WardenError, WardenResult};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTier {
    Hourly,
    Daily,
    AdHoc,
}

impl BackupTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::AdHoc => "ad_hoc",
        }
    }
}

/// On-disk backup payload. Immutable once written; retention only ever
/// deletes whole files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub timestamp: String,
    pub tier: BackupTier,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupRef {
    pub path: PathBuf,
    pub tier: BackupTier,
    pub timestamp: String,
}

/// Tiered snapshot store: `hourly/` and `daily/` directories under the
/// backup root plus ad-hoc files in the root itself, with a parallel
/// session-snapshot (cookie) directory keyed by the same timestamps.
pub struct BackupStore {
    backup_dir: PathBuf,
    session_dir: PathBuf,
    retention: BackupSection,
}

impl BackupStore {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        session_dir: impl Into<PathBuf>,
        retention: BackupSection,
    ) -> WardenResult<Self> {
        let backup_dir = backup_dir.into();
        let session_dir = session_dir.into();
        for dir in [
            backup_dir.join("hourly"),
            backup_dir.join("daily"),
            session_dir.clone(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| WardenError::io(source, &dir))?;
        }
        Ok(Self {
            backup_dir,
            session_dir,
            retention,
        })
    }

    pub fn snapshot(
        &self,
        tier: BackupTier,
        label: &str,
        payload: Value,
        cookies: Option<&[Cookie]>,
    ) -> WardenResult<BackupRef> {
        self.snapshot_at(tier, label, payload, cookies, Utc::now())
    }

    pub fn snapshot_at(
        &self,
        tier: BackupTier,
        label: &str,
        payload: Value,
        cookies: Option<&[Cookie]>,
        at: DateTime<Utc>,
    ) -> WardenResult<BackupRef> {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let path = match tier {
            BackupTier::Hourly => self.backup_dir.join("hourly").join(format!("backup_{timestamp}.json")),
            BackupTier::Daily => self.backup_dir.join("daily").join(format!("backup_{timestamp}.json")),
            BackupTier::AdHoc => self
                .backup_dir
                .join(format!("backup_{timestamp}_{label}.json")),
        };

        let record = BackupRecord {
            timestamp: timestamp.clone(),
            tier,
            payload,
            created_at: at,
        };
        let json = serde_json::to_vec_pretty(&record)?;
        fs::write(&path, json).map_err(|source| WardenError::io(source, &path))?;

        if let Some(cookies) = cookies {
            // Labelled like ad-hoc backups, so snapshots taken within the
            // same second never overwrite each other.
            let cookie_path = self
                .session_dir
                .join(format!("cookies_{timestamp}_{label}.json"));
            let json = serde_json::to_vec_pretty(cookies)?;
            fs::write(&cookie_path, json)
                .map_err(|source| WardenError::io(source, &cookie_path))?;
        }

        info!(tier = tier.as_str(), label, %timestamp, "backup created");
        self.prune()?;

        Ok(BackupRef {
            path,
            tier,
            timestamp,
        })
    }

    /// Keeps only the newest N files per retention tier, oldest deleted
    /// first by modification time. Ad-hoc backups are exempt.
    pub fn prune(&self) -> WardenResult<()> {
        self.prune_dir(&self.backup_dir.join("hourly"), self.retention.hourly_retain)?;
        self.prune_dir(&self.backup_dir.join("daily"), self.retention.daily_retain)?;
        Ok(())
    }

    fn prune_dir(&self, dir: &Path, retain: usize) -> WardenResult<()> {
        let mut entries = json_files(dir)?;
        if entries.len() <= retain {
            return Ok(());
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = entries.len() - retain;
        for (path, _) in entries.into_iter().take(excess) {
            debug!(path = %path.display(), "pruning expired backup");
            fs::remove_file(&path).map_err(|source| WardenError::io(source, &path))?;
        }
        Ok(())
    }

    /// The backup with the greatest modification time across all tiers,
    /// ad-hoc included.
    pub fn latest(&self) -> WardenResult<Option<BackupRef>> {
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for entry in WalkDir::new(&self.backup_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file()
                || entry.path().extension().map(|ext| ext != "json").unwrap_or(true)
            {
                continue;
            }
            let modified = entry
                .path()
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let better = newest
                .as_ref()
                .map(|(_, best)| modified > *best)
                .unwrap_or(true);
            if better {
                newest = Some((entry.into_path(), modified));
            }
        }
        Ok(newest.map(|(path, _)| self.reference(path)))
    }

    fn reference(&self, path: PathBuf) -> BackupRef {
        let tier = match path.parent().and_then(Path::file_name).and_then(|n| n.to_str()) {
            Some("hourly") => BackupTier::Hourly,
            Some("daily") => BackupTier::Daily,
            _ => BackupTier::AdHoc,
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        // backup_<YYYYmmdd_HHMMSS>[_<label>]
        let timestamp = stem
            .strip_prefix("backup_")
            .map(|rest| rest.chars().take(15).collect())
            .unwrap_or_else(|| stem.to_string());
        BackupRef {
            path,
            tier,
            timestamp,
        }
    }

    pub fn load(&self, backup: &BackupRef) -> WardenResult<BackupRecord> {
        let content = fs::read_to_string(&backup.path)
            .map_err(|source| WardenError::io(source, &backup.path))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Most recent persisted cookie set, if any.
    pub fn latest_session_snapshot(&self) -> WardenResult<Option<Vec<Cookie>>> {
        let mut entries = json_files(&self.session_dir)?;
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let Some((path, _)) = entries.pop() else {
            return Ok(None);
        };
        let content =
            fs::read_to_string(&path).map_err(|source| WardenError::io(source, &path))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn backups_count(&self) -> usize {
        WalkDir::new(&self.backup_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path().extension().map(|ext| ext == "json").unwrap_or(false)
            })
            .count()
    }

    pub fn cookies_count(&self) -> usize {
        json_files(&self.session_dir).map(|f| f.len()).unwrap_or(0)
    }
}

fn json_files(dir: &Path) -> WardenResult<Vec<(PathBuf, SystemTime)>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    let entries = fs::read_dir(dir).map_err(|source| WardenError::io(source, dir))?;
    for entry in entries {
        let entry = entry.map_err(|source| WardenError::io(source, dir))?;
        let path = entry.path();
        if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        out.push((path, modified));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::tempdir;

    fn store(dir: &Path) -> BackupStore {
        BackupStore::new(
            dir.join("backups"),
            dir.join("session/cookies"),
            BackupSection::default(),
        )
        .unwrap()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn retention_keeps_newest_per_tier() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let base = base_time();
        for idx in 0..30 {
            store
                .snapshot_at(
                    BackupTier::Hourly,
                    "auto",
                    json!({ "seq": idx }),
                    None,
                    base + Duration::hours(idx),
                )
                .unwrap();
            store
                .snapshot_at(
                    BackupTier::Daily,
                    "auto",
                    json!({ "seq": idx }),
                    None,
                    base + Duration::days(idx),
                )
                .unwrap();
        }

        let hourly = json_files(&dir.path().join("backups/hourly")).unwrap();
        let daily = json_files(&dir.path().join("backups/daily")).unwrap();
        assert_eq!(hourly.len(), 24);
        assert_eq!(daily.len(), 7);

        // Oldest files went first.
        let oldest_hourly = dir
            .path()
            .join("backups/hourly")
            .join(format!("backup_{}.json", base.format(TIMESTAMP_FORMAT)));
        assert!(!oldest_hourly.exists());
        let newest_daily = dir.path().join("backups/daily").join(format!(
            "backup_{}.json",
            (base + Duration::days(29)).format(TIMESTAMP_FORMAT)
        ));
        assert!(newest_daily.exists());
    }

    #[test]
    fn ad_hoc_backups_escape_retention() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let base = base_time();
        for idx in 0..30 {
            store
                .snapshot_at(
                    BackupTier::AdHoc,
                    "pre_connect",
                    json!({ "seq": idx }),
                    None,
                    base + Duration::minutes(idx),
                )
                .unwrap();
        }
        assert_eq!(store.backups_count(), 30);
    }

    #[test]
    fn latest_spans_all_tiers() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let base = base_time();
        store
            .snapshot_at(BackupTier::Hourly, "auto", json!({}), None, base)
            .unwrap();
        store
            .snapshot_at(
                BackupTier::Daily,
                "auto",
                json!({}),
                None,
                base + Duration::hours(1),
            )
            .unwrap();
        let newest = store
            .snapshot_at(
                BackupTier::AdHoc,
                "post_connect",
                json!({ "result": "ok" }),
                None,
                base + Duration::hours(2),
            )
            .unwrap();

        let latest = store.latest().unwrap().expect("backups exist");
        assert_eq!(latest.path, newest.path);
        assert_eq!(latest.tier, BackupTier::AdHoc);
        assert_eq!(latest.timestamp, newest.timestamp);

        let record = store.load(&latest).unwrap();
        assert_eq!(record.payload["result"], "ok");
    }

    #[test]
    fn session_snapshots_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let cookies = vec![Cookie {
            name: "li_at".to_string(),
            value: "secret".to_string(),
            domain: Some(".example.com".to_string()),
            path: Some("/".to_string()),
            secure: true,
            http_only: true,
            expires: Some(1_900_000_000.0),
        }];
        store
            .snapshot_at(
                BackupTier::AdHoc,
                "pre_connect",
                json!({}),
                Some(&cookies),
                base_time(),
            )
            .unwrap();

        assert_eq!(store.cookies_count(), 1);
        let restored = store.latest_session_snapshot().unwrap().unwrap();
        assert_eq!(restored, cookies);
    }

    #[test]
    fn same_second_snapshots_keep_distinct_cookie_files() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let cookies = vec![Cookie {
            name: "session".to_string(),
            value: "tok".to_string(),
            domain: None,
            path: None,
            secure: true,
            http_only: true,
            expires: None,
        }];
        let at = base_time();
        store
            .snapshot_at(BackupTier::AdHoc, "pre_connect", json!({}), Some(&cookies), at)
            .unwrap();
        store
            .snapshot_at(BackupTier::AdHoc, "post_connect", json!({}), Some(&cookies), at)
            .unwrap();

        assert_eq!(store.backups_count(), 2);
        assert_eq!(store.cookies_count(), 2);
    }
}
