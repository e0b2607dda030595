use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::browser::BrowserControl;
use crate::config::{ChallengePolicy, ChallengeSection};
use crate::error::WardenResult;
use crate::journal::{ChallengeEvent, JournalEvent, RecoveryJournal};

/// Policy outcome of a handled challenge. `Stopped` is a value the caller
/// must treat as fatal for the current run; it is never raised as an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeOutcome {
    Resolved,
    StillPresent,
    Notified,
    Stopped,
}

/// Inspects the live page for signs that the platform interrupted the
/// session with a verification step.
pub struct ChallengeDetector {
    config: ChallengeSection,
    browser: Arc<dyn BrowserControl>,
    journal: Arc<Mutex<RecoveryJournal>>,
}

impl ChallengeDetector {
    pub fn new(
        config: ChallengeSection,
        browser: Arc<dyn BrowserControl>,
        journal: Arc<Mutex<RecoveryJournal>>,
    ) -> Self {
        Self {
            config,
            browser,
            journal,
        }
    }

    /// Detection fails open: an inspection error means "no challenge
    /// seen". The governor's gates still apply to whatever happens next.
    pub async fn detect(&self) -> bool {
        match self.inspect().await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "challenge inspection failed, assuming none");
                false
            }
        }
    }

    async fn inspect(&self) -> WardenResult<bool> {
        let content = self.browser.page_content().await?.to_lowercase();
        for keyword in &self.config.keywords {
            if content.contains(&keyword.to_lowercase()) {
                warn!(signal = keyword.as_str(), "challenge keyword found in page");
                return Ok(true);
            }
        }

        for selector in &self.config.selectors {
            if self.browser.has_element(selector).await.unwrap_or(false) {
                warn!(selector = selector.as_str(), "challenge element present");
                return Ok(true);
            }
        }

        let url = self.browser.current_url().await?.to_lowercase();
        for marker in &self.config.url_markers {
            if url.contains(&marker.to_lowercase()) {
                warn!(%url, marker = marker.as_str(), "verification page detected");
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub async fn handle(&self) -> WardenResult<ChallengeOutcome> {
        self.handle_with(self.config.policy).await
    }

    pub async fn handle_with(&self, policy: ChallengePolicy) -> WardenResult<ChallengeOutcome> {
        let detected_at = Utc::now();
        let (action_taken, status) = match policy {
            ChallengePolicy::Wait => {
                warn!(
                    wait_seconds = self.config.wait_seconds,
                    "challenge detected, waiting for manual resolution"
                );
                sleep(Duration::from_secs(self.config.wait_seconds)).await;
                let status = if self.detect().await {
                    error!("challenge still present after cooldown");
                    ChallengeOutcome::StillPresent
                } else {
                    ChallengeOutcome::Resolved
                };
                ("wait", status)
            }
            ChallengePolicy::Notify => {
                error!("challenge detected, notifying and continuing");
                ("notify", ChallengeOutcome::Notified)
            }
            ChallengePolicy::Stop => {
                error!("challenge detected, stopping the current run");
                ("stop", ChallengeOutcome::Stopped)
            }
        };

        self.journal
            .lock()
            .unwrap()
            .append(JournalEvent::Challenge(ChallengeEvent {
                detected_at,
                action_taken: action_taken.to_string(),
                status,
            }))?;
        Ok(status)
    }
}
