use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backup::{BackupStore, BackupTier};
use crate::browser::BrowserControl;
use crate::config::{PlatformSection, RecoverySection};
use crate::error::WardenResult;
use crate::governor::SafetyGovernor;
use crate::journal::{JournalEvent, RecoveryAttempt, RecoveryJournal};
use crate::ledger::ActionDetails;
use crate::stats::SessionStatsStore;

const RESULT_SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub message: String,
}

impl<T> RunOutcome<T> {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    NeedsBackup,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatus {
    pub last_backup: Option<String>,
    pub backups_count: usize,
    pub cookies_count: usize,
    pub system_status: SystemStatus,
    pub recommendation: String,
    pub latest_backup_age: String,
}

/// Wraps every named operation with the full safety envelope: governor
/// gate, pre/post backups, throttle sleep, and automatic crash recovery
/// with emergency-stop escalation. Nothing thrown by the wrapped
/// operation escapes past `run`; callers always get a labelled outcome.
pub struct RecoveryOrchestrator {
    governor: Arc<Mutex<SafetyGovernor>>,
    backups: BackupStore,
    journal: Arc<Mutex<RecoveryJournal>>,
    stats: SessionStatsStore,
    browser: Option<Arc<dyn BrowserControl>>,
    platform: PlatformSection,
    recovery: RecoverySection,
    stop_flag: Arc<AtomicBool>,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        governor: Arc<Mutex<SafetyGovernor>>,
        backups: BackupStore,
        journal: Arc<Mutex<RecoveryJournal>>,
        stats: SessionStatsStore,
        browser: Option<Arc<dyn BrowserControl>>,
        platform: PlatformSection,
        recovery: RecoverySection,
    ) -> Self {
        Self {
            governor,
            backups,
            journal,
            stats,
            browser,
            platform,
            recovery,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation handle. The flag is honoured between
    /// discrete operations, never mid-sleep; a set flag is a clean abort.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn governor(&self) -> Arc<Mutex<SafetyGovernor>> {
        Arc::clone(&self.governor)
    }

    pub async fn run<F, Fut, T>(&self, name: &str, operation: F) -> WardenResult<RunOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WardenResult<T>>,
        T: Serialize,
    {
        if self.stop_flag.load(Ordering::SeqCst) {
            info!(operation = name, "stop requested, aborting before dispatch");
            return Ok(RunOutcome::failure("stop requested"));
        }

        let decision = self.governor.lock().unwrap().decide(name)?;
        if !decision.allowed {
            self.governor.lock().unwrap().record_action(
                name,
                false,
                ActionDetails::Denied {
                    reason: decision.reason.clone(),
                    mode: decision.mode,
                },
            )?;
            if decision.delay_seconds > 0 {
                sleep(StdDuration::from_secs(decision.delay_seconds)).await;
            }
            return Ok(RunOutcome::failure(format!("denied: {}", decision.reason)));
        }

        let cookies = match &self.browser {
            Some(browser) => browser.cookies().await.ok(),
            None => None,
        };
        self.backups.snapshot(
            BackupTier::AdHoc,
            &format!("pre_{name}"),
            json!({ "operation": name, "phase": "pre" }),
            cookies.as_deref(),
        )?;

        // The governor's throttle: every allowed action waits its turn.
        if decision.delay_seconds > 0 {
            sleep(StdDuration::from_secs(decision.delay_seconds)).await;
        }

        match operation().await {
            Ok(result) => {
                let summary = truncate_summary(&result)?;
                self.governor.lock().unwrap().record_action(
                    name,
                    true,
                    ActionDetails::Operation {
                        summary: summary.clone(),
                    },
                )?;
                let cookies = match &self.browser {
                    Some(browser) => browser.cookies().await.ok(),
                    None => None,
                };
                self.backups.snapshot(
                    BackupTier::AdHoc,
                    &format!("post_{name}"),
                    json!({ "operation": name, "phase": "post", "summary": summary }),
                    cookies.as_deref(),
                )?;
                self.stats.record_action(name)?;
                Ok(RunOutcome {
                    success: true,
                    result: Some(result),
                    message: format!("{name} completed"),
                })
            }
            Err(err) => {
                let detail = err.to_string();
                warn!(operation = name, error = %detail, "wrapped operation failed");
                {
                    let mut governor = self.governor.lock().unwrap();
                    governor.record_error("operation_failed", &detail)?;
                    governor.record_action(
                        name,
                        false,
                        ActionDetails::Failure {
                            error: detail.clone(),
                        },
                    )?;
                }
                self.stats.record_error()?;

                let attempt = self.recover(name, &detail).await?;
                if attempt.success {
                    Ok(RunOutcome::failure(format!(
                        "{name} failed ({detail}); automatic recovery restored access"
                    )))
                } else {
                    let notice = self.governor.lock().unwrap().emergency_stop(&format!(
                        "{name} failed and recovery could not restore platform access"
                    ))?;
                    Ok(RunOutcome::failure(format!(
                        "{name} failed ({detail}); recovery failed; {}",
                        notice.message
                    )))
                }
            }
        }
    }

    /// Crash recovery: every step is best-effort and logged; only the
    /// final reachability probe decides success.
    pub async fn recover(&self, context: &str, reason: &str) -> WardenResult<RecoveryAttempt> {
        info!(context, reason, "attempting crash recovery");
        let mut steps = Vec::new();

        match self.backups.latest() {
            Ok(Some(backup)) => {
                steps.push(format!(
                    "found latest backup {} ({})",
                    backup.timestamp,
                    backup.tier.as_str()
                ));
            }
            Ok(None) => steps.push("no backup available".to_string()),
            Err(err) => steps.push(format!("backup lookup failed: {err}")),
        }

        if let Some(browser) = &self.browser {
            match self.backups.latest_session_snapshot() {
                Ok(Some(cookies)) => {
                    let restored = async {
                        browser.clear_cookies().await?;
                        browser.set_cookies(cookies).await?;
                        browser.reload().await
                    }
                    .await;
                    match restored {
                        Ok(()) => steps.push("session snapshot restored".to_string()),
                        Err(err) => steps.push(format!("session restore failed: {err}")),
                    }
                }
                Ok(None) => steps.push("no session snapshot to restore".to_string()),
                Err(err) => steps.push(format!("session snapshot lookup failed: {err}")),
            }

            let cleared = async {
                browser.clear_local_state().await?;
                browser.clear_cookies().await
            }
            .await;
            match cleared {
                Ok(()) => steps.push("volatile client state cleared".to_string()),
                Err(err) => steps.push(format!("client state clear failed: {err}")),
            }
        } else {
            steps.push("no browser attached, skipping session restore".to_string());
        }

        let reachable = self.probe_reachability().await;
        if reachable {
            steps.push("platform reachable".to_string());
        } else {
            steps.push("platform not reachable, manual intervention required".to_string());
        }

        let attempt = RecoveryAttempt {
            attempted_at: Utc::now(),
            context: context.to_string(),
            steps,
            success: reachable,
            platform_reachable: reachable,
        };
        self.journal
            .lock()
            .unwrap()
            .append(JournalEvent::Recovery(attempt.clone()))?;
        Ok(attempt)
    }

    async fn probe_reachability(&self) -> bool {
        let Some(browser) = &self.browser else {
            return false;
        };
        for attempt in 0..self.recovery.probe_attempts {
            if attempt > 0 {
                sleep(StdDuration::from_secs(self.recovery.probe_wait_seconds)).await;
            }
            match self.probe_once(browser.as_ref()).await {
                Ok(true) => return true,
                Ok(false) => {
                    warn!(attempt = attempt + 1, "reachability probe failed");
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "reachability probe errored");
                }
            }
        }
        false
    }

    async fn probe_once(&self, browser: &dyn BrowserControl) -> WardenResult<bool> {
        browser.navigate(&self.platform.base_url).await?;
        let url = browser.current_url().await?.to_lowercase();
        let forced_login = self
            .platform
            .login_markers
            .iter()
            .any(|marker| url.contains(&marker.to_lowercase()));
        if forced_login {
            return Ok(false);
        }
        let content = browser.page_content().await?.to_lowercase();
        Ok(self
            .platform
            .home_indicators
            .iter()
            .any(|indicator| content.contains(&indicator.to_lowercase())))
    }

    pub fn recovery_status(&self) -> WardenResult<RecoveryStatus> {
        let backups_count = self.backups.backups_count();
        let cookies_count = self.backups.cookies_count();
        let latest = self.backups.latest()?;

        let latest_backup_age = latest
            .as_ref()
            .and_then(|backup| backup.path.metadata().ok())
            .and_then(|meta| meta.modified().ok())
            .map(format_age)
            .unwrap_or_else(|| "no_backup".to_string());

        let recommendation = if backups_count == 0 {
            "create a backup immediately".to_string()
        } else if backups_count < 3 {
            "few backups on disk, snapshot more frequently".to_string()
        } else {
            "recovery system ready".to_string()
        };

        Ok(RecoveryStatus {
            last_backup: latest.map(|backup| {
                backup
                    .path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| backup.timestamp.clone())
            }),
            backups_count,
            cookies_count,
            system_status: if backups_count > 0 {
                SystemStatus::Healthy
            } else {
                SystemStatus::NeedsBackup
            },
            recommendation,
            latest_backup_age,
        })
    }
}

fn truncate_summary<T: Serialize>(result: &T) -> WardenResult<String> {
    let raw = serde_json::to_string(result)?;
    Ok(raw.chars().take(RESULT_SUMMARY_MAX_CHARS).collect())
}

fn format_age(modified: SystemTime) -> String {
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default()
        .as_secs();
    if age >= 86_400 {
        format!("{} days", age / 86_400)
    } else if age >= 3_600 {
        format!("{} hours", age / 3_600)
    } else if age >= 60 {
        format!("{} minutes", age / 60)
    } else {
        format!("{age} seconds")
    }
}
