use chrono::{DateTime, Duration, Local, Timelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{
    parse_hhmm, BehaviorSection, LimitsSection, RecoverySection, SuspicionSection, WardenConfig,
};
use crate::error::WardenResult;
use crate::ledger::{
    ActionDetails, ActionRecord, EmergencyRecord, ErrorRecord, RecoveryEvent, SafetyState,
    StateStore, ACTION_HISTORY_CAP,
};

const RECOVERY_DENY_DELAY_SECONDS: u64 = 300;
const SUSPICION_DENY_DELAY_SECONDS: u64 = 600;
const CONNECTION_QUOTA_DELAY_SECONDS: u64 = 3600;
const MESSAGE_QUOTA_DELAY_SECONDS: u64 = 1800;
const OFF_HOURS_DELAY_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    Normal,
    Recovery,
    Suspicious,
    LimitReached,
    PatternDetected,
    OffHours,
}

/// Outcome of a single gate evaluation. Denials are plain values; no gate
/// failure ever surfaces as an error.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub delay_seconds: u64,
    pub mode: DecisionMode,
}

impl Decision {
    fn allow(reason: impl Into<String>, delay_seconds: u64) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            delay_seconds,
            mode: DecisionMode::Normal,
        }
    }

    fn deny(reason: impl Into<String>, delay_seconds: u64, mode: DecisionMode) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            delay_seconds,
            mode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyNotice {
    pub stopped: bool,
    pub message: String,
    pub resume_at: DateTime<Utc>,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub suspicion_level: u8,
    pub recovery_mode: bool,
    pub actions_today: usize,
    pub errors_today: usize,
    pub suggested_action: String,
    pub risk_level: String,
    pub safe_until: String,
}

/// Adaptive throttle for account-sensitive automation. Tracks a 0–100
/// suspicion score in the persisted [`SafetyState`], gates every candidate
/// action through quota, pattern and schedule checks, and owns the
/// recovery-mode lifecycle.
pub struct SafetyGovernor {
    limits: LimitsSection,
    behavior: BehaviorSection,
    suspicion: SuspicionSection,
    recovery: RecoverySection,
    state: SafetyState,
    store: Box<dyn StateStore>,
    rng: ChaCha8Rng,
}

impl SafetyGovernor {
    /// Loads prior state (or starts empty) and derives an initial
    /// suspicion estimate from the historical ledger.
    pub fn new(config: &WardenConfig, store: Box<dyn StateStore>) -> WardenResult<Self> {
        let state = store.load()?.unwrap_or_default();
        let mut governor = Self {
            limits: config.limits.clone(),
            behavior: config.behavior.clone(),
            suspicion: config.suspicion.clone(),
            recovery: config.recovery.clone(),
            state,
            store,
            rng: ChaCha8Rng::from_entropy(),
        };
        governor.recalculate_suspicion_at(Utc::now());
        Ok(governor)
    }

    /// Deterministic delay draws for tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn suspicion_level(&self) -> u8 {
        self.state.suspicion_level
    }

    pub fn recovery_mode(&mut self) -> WardenResult<bool> {
        self.recovery_mode_at(Utc::now())
    }

    pub fn recovery_mode_at(&mut self, now: DateTime<Utc>) -> WardenResult<bool> {
        self.sync_recovery(now)?;
        Ok(self.state.recovery_mode)
    }

    pub fn decide(&mut self, action_type: &str) -> WardenResult<Decision> {
        self.decide_at(action_type, Utc::now())
    }

    /// Evaluates the gate chain in order; the first failing check wins.
    pub fn decide_at(&mut self, action_type: &str, now: DateTime<Utc>) -> WardenResult<Decision> {
        self.sync_recovery(now)?;

        if self.state.recovery_mode {
            return Ok(Decision::deny(
                "recovery mode active",
                RECOVERY_DENY_DELAY_SECONDS,
                DecisionMode::Recovery,
            ));
        }

        if self.state.suspicion_level > self.suspicion.deny_threshold {
            return Ok(Decision::deny(
                format!("suspicion level too high ({}%)", self.state.suspicion_level),
                SUSPICION_DENY_DELAY_SECONDS,
                DecisionMode::Suspicious,
            ));
        }

        if let Some(decision) = self.check_daily_quota(action_type, now) {
            return Ok(decision);
        }

        if let Some(decision) = self.check_action_pattern(now)? {
            return Ok(decision);
        }

        if let Some(decision) = self.check_operating_window(now) {
            return Ok(decision);
        }

        let delay = self.safe_delay(action_type, now);
        Ok(Decision::allow("action permitted", delay))
    }

    fn check_daily_quota(&self, action_type: &str, now: DateTime<Utc>) -> Option<Decision> {
        let max_allowed = *self.limits.daily_quotas.get(action_type)?;
        let today = now.date_naive();
        let current = self
            .state
            .actions
            .iter()
            .filter(|a| a.date == today && a.action_type == action_type)
            .count() as u32;
        if current < max_allowed {
            return None;
        }
        let delay = if action_type == "connection" {
            CONNECTION_QUOTA_DELAY_SECONDS
        } else {
            MESSAGE_QUOTA_DELAY_SECONDS
        };
        Some(Decision::deny(
            format!("daily limit reached ({current}/{max_allowed})"),
            delay,
            DecisionMode::LimitReached,
        ))
    }

    /// Robotic-timing check. Known limitation: only the two intervals
    /// among the three most recent actions are inspected, regardless of
    /// how long the identical cadence actually ran. Preserved on purpose;
    /// widening the window changes long-standing field behaviour.
    fn check_action_pattern(&mut self, now: DateTime<Utc>) -> WardenResult<Option<Decision>> {
        if self.state.actions.len() < 3 {
            return Ok(None);
        }
        let tail = &self.state.actions[self.state.actions.len() - 3..];
        let first = (tail[1].timestamp - tail[0].timestamp).num_seconds();
        let second = (tail[2].timestamp - tail[1].timestamp).num_seconds();
        if first != second || first >= self.suspicion.pattern_interval_ceiling_seconds {
            return Ok(None);
        }

        self.state.suspicion_level = clamp_add(
            self.state.suspicion_level,
            self.suspicion.pattern_increase,
        );
        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        warn!(
            interval_seconds = first,
            suspicion = self.state.suspicion_level,
            "robotic timing pattern detected"
        );

        let delay = self.rng.gen_range(60..=180);
        Ok(Some(Decision::deny(
            format!("timing pattern detected (identical {first}s intervals)"),
            delay,
            DecisionMode::PatternDetected,
        )))
    }

    fn check_operating_window(&self, now: DateTime<Utc>) -> Option<Decision> {
        let schedule = self.behavior.work_schedule.as_ref()?;
        let local = now.with_timezone(&Local);
        let day = local.format("%A").to_string().to_lowercase();
        let Some(window) = schedule.get(&day) else {
            return Some(Decision::deny(
                format!("{day} is a non-operating day"),
                OFF_HOURS_DELAY_SECONDS,
                DecisionMode::OffHours,
            ));
        };
        let current = (local.hour(), local.minute());
        let start = parse_hhmm(&window[0])?;
        let end = parse_hhmm(&window[1])?;
        if current < start || current > end {
            return Some(Decision::deny(
                format!("outside operating window {}-{}", window[0], window[1]),
                OFF_HOURS_DELAY_SECONDS,
                DecisionMode::OffHours,
            ));
        }
        None
    }

    fn safe_delay(&mut self, action_type: &str, now: DateTime<Utc>) -> u64 {
        let base = self.rng.gen_range(
            self.limits.min_action_delay_seconds..=self.limits.max_action_delay_seconds,
        ) as f64;
        let suspicion_multiplier = 1.0 + self.state.suspicion_level as f64 / 100.0;
        let action_multiplier = if action_type == "connection" {
            self.behavior.connection_multiplier
        } else {
            1.0
        };
        let hour = now.with_timezone(&Local).hour();
        let peak = self
            .behavior
            .peak_hours
            .iter()
            .any(|window| hour >= window[0] && hour <= window[1]);
        let hour_multiplier = if peak { self.behavior.peak_multiplier } else { 1.0 };

        let delay = (base * suspicion_multiplier * action_multiplier * hour_multiplier) as u64;
        delay.clamp(
            self.limits.delay_floor_seconds,
            self.limits.delay_ceiling_seconds,
        )
    }

    pub fn record_action(
        &mut self,
        action_type: &str,
        success: bool,
        details: ActionDetails,
    ) -> WardenResult<()> {
        self.record_action_at(action_type, success, details, Utc::now())
    }

    pub fn record_action_at(
        &mut self,
        action_type: &str,
        success: bool,
        details: ActionDetails,
        now: DateTime<Utc>,
    ) -> WardenResult<()> {
        self.sync_recovery(now)?;
        let record = ActionRecord {
            action_type: action_type.to_string(),
            timestamp: now,
            date: now.date_naive(),
            success,
            suspicion_at_time: self.state.suspicion_level,
            details: details.clone(),
        };
        self.state.actions.push(record);
        if self.state.actions.len() > ACTION_HISTORY_CAP {
            let excess = self.state.actions.len() - ACTION_HISTORY_CAP;
            self.state.actions.drain(..excess);
        }

        if success {
            self.state.suspicion_level = self
                .state
                .suspicion_level
                .saturating_sub(self.suspicion.success_decay);
        } else {
            let detail_text = match details {
                ActionDetails::Failure { error } => error,
                ActionDetails::Denied { reason, .. } => reason,
                ActionDetails::Operation { summary } => summary,
                ActionDetails::None => String::new(),
            };
            self.state.errors.push(ErrorRecord {
                error_type: action_type.to_string(),
                timestamp: now,
                details: detail_text,
                suspicion_at_time: self.state.suspicion_level,
            });
            self.state.suspicion_level = clamp_add(
                self.state.suspicion_level,
                self.suspicion.action_failure_increase,
            );
        }

        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        info!(action = action_type, success, "action recorded");
        Ok(())
    }

    pub fn record_error(&mut self, error_type: &str, details: &str) -> WardenResult<()> {
        self.record_error_at(error_type, details, Utc::now())
    }

    pub fn record_error_at(
        &mut self,
        error_type: &str,
        details: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<()> {
        self.sync_recovery(now)?;
        self.state.errors.push(ErrorRecord {
            error_type: error_type.to_string(),
            timestamp: now,
            details: details.to_string(),
            suspicion_at_time: self.state.suspicion_level,
        });
        self.state.suspicion_level =
            clamp_add(self.state.suspicion_level, self.suspicion.error_increase);
        warn!(error = error_type, details, "error recorded");

        let window_start = now - Duration::seconds(self.recovery.error_window_seconds);
        let recent_errors = self
            .state
            .errors
            .iter()
            .filter(|e| e.timestamp > window_start)
            .count();
        if recent_errors > self.recovery.error_threshold {
            return self.activate_recovery_mode_at(
                self.recovery.recovery_minutes,
                "repeated errors detected",
                now,
            );
        }

        self.state.last_updated = Some(now);
        self.store.save(&self.state)
    }

    pub fn activate_recovery_mode(
        &mut self,
        duration_minutes: i64,
        reason: &str,
    ) -> WardenResult<()> {
        self.activate_recovery_mode_at(duration_minutes, reason, Utc::now())
    }

    /// Hard-deny cooldown. Expiry is a lazy timestamp checked on every
    /// gate/record call rather than a background timer, so a foreground
    /// mutation can never race a deferred deactivation.
    pub fn activate_recovery_mode_at(
        &mut self,
        duration_minutes: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<()> {
        self.state.recovery_mode = true;
        self.state.recovery_until = Some(now + Duration::minutes(duration_minutes));
        self.state.suspicion_level = clamp_add(
            self.state.suspicion_level,
            self.suspicion.recovery_entry_increase,
        );
        self.state.recoveries.push(RecoveryEvent {
            timestamp: now,
            duration_minutes,
            reason: reason.to_string(),
            suspicion_at_time: self.state.suspicion_level,
        });
        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        warn!(duration_minutes, reason, "recovery mode activated");
        Ok(())
    }

    pub fn deactivate_recovery_mode(&mut self) -> WardenResult<()> {
        self.deactivate_recovery_mode_at(Utc::now())
    }

    pub fn deactivate_recovery_mode_at(&mut self, now: DateTime<Utc>) -> WardenResult<()> {
        self.state.recovery_mode = false;
        self.state.recovery_until = None;
        self.state.suspicion_level = self
            .state
            .suspicion_level
            .saturating_sub(self.suspicion.recovery_exit_decay);
        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        info!("recovery mode deactivated");
        Ok(())
    }

    fn sync_recovery(&mut self, now: DateTime<Utc>) -> WardenResult<()> {
        if !self.state.recovery_mode {
            return Ok(());
        }
        if let Some(until) = self.state.recovery_until {
            if until <= now {
                self.deactivate_recovery_mode_at(now)?;
            }
        }
        Ok(())
    }

    pub fn emergency_stop(&mut self, reason: &str) -> WardenResult<EmergencyNotice> {
        self.emergency_stop_at(reason, Utc::now())
    }

    /// Terminal for the current operation, not for the process: maxes the
    /// suspicion score and forces an extended recovery cooldown.
    pub fn emergency_stop_at(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<EmergencyNotice> {
        self.state.suspicion_level = 100;
        self.activate_recovery_mode_at(self.recovery.emergency_minutes, reason, now)?;
        self.state
            .emergencies
            .push(EmergencyRecord::new(now, reason));
        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        error!(reason, "emergency stop engaged");

        let resume_at = now + Duration::minutes(self.recovery.emergency_minutes);
        Ok(EmergencyNotice {
            stopped: true,
            message: format!("emergency stop engaged: {reason}"),
            resume_at,
            recommendation: format!(
                "do not touch the account manually before {}",
                resume_at.with_timezone(&Local).format("%H:%M")
            ),
        })
    }

    /// Load-time estimate from the historical ledger: action density,
    /// error rate and recent recovery churn, decayed when the account has
    /// been idle for over an hour.
    pub fn recalculate_suspicion_at(&mut self, now: DateTime<Utc>) {
        if self.state.actions.is_empty() {
            self.state.suspicion_level = 0;
            return;
        }

        let mut estimate: u32 = 0;

        let first = self.state.actions.first().map(|a| a.timestamp);
        let last = self.state.actions.last().map(|a| a.timestamp);
        if let (Some(first), Some(last)) = (first, last) {
            let total_hours = (last - first).num_seconds() as f64 / 3600.0;
            if total_hours > 0.0 {
                let actions_per_hour = self.state.actions.len() as f64 / total_hours;
                if actions_per_hour > 10.0 {
                    estimate += 30;
                }
            }
        }

        let error_rate =
            self.state.errors.len() as f64 / self.state.actions.len() as f64 * 100.0;
        if error_rate > 20.0 {
            estimate += 25;
        }

        let day_ago = now - Duration::days(1);
        let recent_recoveries = self
            .state
            .recoveries
            .iter()
            .filter(|r| r.timestamp > day_ago)
            .count();
        if recent_recoveries > 2 {
            estimate += 30;
        }

        let mut estimate = estimate.min(100) as f64;
        if let Some(last) = last {
            if (now - last).num_seconds() > 3600 {
                estimate *= 0.8;
            }
        }
        self.state.suspicion_level = estimate as u8;
    }

    pub fn safety_report(&mut self) -> WardenResult<SafetyReport> {
        self.safety_report_at(Utc::now())
    }

    pub fn safety_report_at(&mut self, now: DateTime<Utc>) -> WardenResult<SafetyReport> {
        self.sync_recovery(now)?;
        let today = now.date_naive();
        let level = self.state.suspicion_level;

        let suggested_action = if level > 80 {
            "STOP: very high flag risk, pause for 24 hours".to_string()
        } else if level > 60 {
            "REDUCE: high risk, cut volume to 10 actions/day".to_string()
        } else if level > 40 {
            "CAUTION: moderate risk, keep current limits".to_string()
        } else if level > 20 {
            "NORMAL: low risk, continue".to_string()
        } else {
            "SAFE: minimal risk, normal operation".to_string()
        };

        let risk_level = if level > 80 {
            "very_high"
        } else if level > 60 {
            "high"
        } else if level > 40 {
            "moderate"
        } else if level > 20 {
            "low"
        } else {
            "minimal"
        };

        let horizon_hours = if level > 60 {
            2
        } else if level > 40 {
            4
        } else {
            8
        };
        let safe_until = (now + Duration::hours(horizon_hours))
            .with_timezone(&Local)
            .format("%H:%M")
            .to_string();

        Ok(SafetyReport {
            suspicion_level: level,
            recovery_mode: self.state.recovery_mode,
            actions_today: self.state.actions_on(today),
            errors_today: self.state.errors_on(today),
            suggested_action,
            risk_level: risk_level.to_string(),
            safe_until,
        })
    }

    pub fn reset_daily(&mut self) -> WardenResult<()> {
        self.reset_daily_at(Utc::now())
    }

    /// New-day reset: decays the score and clears a recovery mode whose
    /// last event is stale by more than two hours.
    pub fn reset_daily_at(&mut self, now: DateTime<Utc>) -> WardenResult<()> {
        self.state.suspicion_level = (self.state.suspicion_level as f64 * 0.7) as u8;
        if self.state.recovery_mode {
            let stale = self
                .state
                .recoveries
                .last()
                .map(|r| (now - r.timestamp).num_seconds() > 7200)
                .unwrap_or(true);
            if stale {
                self.state.recovery_mode = false;
                self.state.recovery_until = None;
            }
        }
        self.state.last_updated = Some(now);
        self.store.save(&self.state)?;
        info!(
            suspicion = self.state.suspicion_level,
            "counters reset for new day"
        );
        Ok(())
    }
}

fn clamp_add(level: u8, delta: u8) -> u8 {
    level.saturating_add(delta).min(100)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::WardenConfig;
    use crate::ledger::SafetyState;

    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Option<SafetyState>>>,
    }

    impl StateStore for MemoryStore {
        fn load(&self) -> WardenResult<Option<SafetyState>> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, state: &SafetyState) -> WardenResult<()> {
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }
    }

    fn test_config() -> WardenConfig {
        let toml = r#"
            [platform]
            name = "testnet"
            base_url = "https://example.com/"
            home_indicators = ["feed"]
            login_markers = ["login"]

            [paths]
            base_dir = "/tmp/warden-test"
            state_file = "state.json"
            stats_file = "stats.json"
            journal_file = "journal.json"
            backup_dir = "backups"
            session_dir = "cookies"
            logs_dir = "logs"

            [limits]
            daily_quotas = { connection = 25, message = 50 }
            min_action_delay_seconds = 30
            max_action_delay_seconds = 90
        "#;
        toml::from_str(toml).unwrap()
    }

    fn governor() -> (SafetyGovernor, MemoryStore) {
        let store = MemoryStore::default();
        let config = test_config();
        let governor = SafetyGovernor::new(&config, Box::new(store.clone()))
            .unwrap()
            .with_rng_seed(7);
        (governor, store)
    }

    #[test]
    fn suspicion_stays_within_bounds() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        for idx in 0..30 {
            governor
                .record_error_at("probe", "boom", now + Duration::hours(idx * 2))
                .unwrap();
            assert!(governor.suspicion_level() <= 100);
        }
        for idx in 0..300 {
            governor
                .record_action_at(
                    "view",
                    true,
                    ActionDetails::None,
                    now + Duration::hours(60 + idx),
                )
                .unwrap();
            assert!(governor.suspicion_level() <= 100);
        }
    }

    #[test]
    fn quota_exhaustion_denies_with_limit_reached() {
        use chrono::TimeZone;
        let (mut governor, _) = governor();
        // Fixed mid-day instant so every record lands on the same
        // calendar day regardless of when the test runs.
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        // Spread out to avoid tripping the timing-pattern gate.
        for idx in 0..25i64 {
            governor
                .record_action_at(
                    "connection",
                    true,
                    ActionDetails::None,
                    now + Duration::seconds(idx * idx + idx),
                )
                .unwrap();
        }
        let decision = governor.decide_at("connection", now).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.mode, DecisionMode::LimitReached);
        assert_eq!(decision.delay_seconds, 3600);
    }

    #[test]
    fn identical_short_intervals_trip_pattern_gate() {
        // The gate only looks at the last three actions; that narrow
        // window is intentional (see check_action_pattern).
        let (mut governor, _) = governor();
        let base = Utc::now();
        for idx in 0..3 {
            governor
                .record_action_at(
                    "view",
                    true,
                    ActionDetails::None,
                    base + Duration::seconds(idx * 10),
                )
                .unwrap();
        }
        let before = governor.suspicion_level();
        let decision = governor.decide_at("view", base + Duration::seconds(30)).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.mode, DecisionMode::PatternDetected);
        assert!((60..=180).contains(&decision.delay_seconds));
        assert_eq!(governor.suspicion_level(), (before + 20).min(100));
    }

    #[test]
    fn varied_intervals_pass_pattern_gate() {
        let (mut governor, _) = governor();
        let base = Utc::now();
        for offset in [0i64, 10, 27] {
            governor
                .record_action_at("view", true, ActionDetails::None, base + Duration::seconds(offset))
                .unwrap();
        }
        let decision = governor.decide_at("view", base + Duration::seconds(60)).unwrap();
        assert_ne!(decision.mode, DecisionMode::PatternDetected);
    }

    #[test]
    fn recovery_mode_expires_by_time_alone() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        governor
            .activate_recovery_mode_at(1, "cooldown test", now)
            .unwrap();
        assert!(governor.recovery_mode_at(now).unwrap());
        let decision = governor.decide_at("connection", now + Duration::seconds(30)).unwrap();
        assert_eq!(decision.mode, DecisionMode::Recovery);
        assert_eq!(decision.delay_seconds, 300);

        let later = now + Duration::seconds(61);
        assert!(!governor.recovery_mode_at(later).unwrap());
    }

    #[test]
    fn recovery_exit_decays_suspicion() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        governor.activate_recovery_mode_at(1, "test", now).unwrap();
        let during = governor.suspicion_level();
        governor
            .recovery_mode_at(now + Duration::minutes(2))
            .unwrap();
        assert_eq!(governor.suspicion_level(), during.saturating_sub(20));
    }

    #[test]
    fn repeated_errors_flip_into_recovery_mode() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        for idx in 0..4i64 {
            governor
                .record_error_at("network", "flap", now + Duration::seconds(idx * 60))
                .unwrap();
        }
        assert!(governor.recovery_mode_at(now + Duration::seconds(300)).unwrap());
    }

    #[test]
    fn clean_state_allows_with_delay_in_band() {
        let (mut governor, _) = governor();
        let decision = governor.decide("connection").unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.mode, DecisionMode::Normal);
        // Base draw is 30..=90; multipliers may scale it, the clamp caps
        // the result at the configured ceiling.
        assert!(decision.delay_seconds >= 30);
        assert!(decision.delay_seconds <= 120);
    }

    #[test]
    fn emergency_stop_maxes_suspicion_and_schedules_resume() {
        let (mut governor, store) = governor();
        let now = Utc::now();
        let notice = governor.emergency_stop_at("challenge unresolved", now).unwrap();
        assert!(notice.stopped);
        assert_eq!(governor.suspicion_level(), 100);
        assert!(governor.recovery_mode_at(now).unwrap());
        assert_eq!(notice.resume_at, now + Duration::minutes(240));

        let persisted = store.saved.lock().unwrap().clone().unwrap();
        assert_eq!(persisted.emergencies.len(), 1);
        assert_eq!(persisted.emergencies[0].action, "EMERGENCY_STOP");
    }

    #[test]
    fn off_hours_schedule_denies_on_unlisted_day() {
        let mut config = test_config();
        config.behavior.work_schedule = Some(std::collections::BTreeMap::new());
        let governor = SafetyGovernor::new(&config, Box::new(MemoryStore::default()));
        let mut governor = governor.unwrap().with_rng_seed(7);
        let decision = governor.decide("connection").unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.mode, DecisionMode::OffHours);
        assert_eq!(decision.delay_seconds, 3600);
    }

    #[test]
    fn recalculation_scores_dense_error_heavy_history() {
        let store = MemoryStore::default();
        let now = Utc::now();
        let mut state = SafetyState::default();
        for idx in 0..40i64 {
            state.actions.push(ActionRecord {
                action_type: "view".to_string(),
                timestamp: now - Duration::minutes(40 - idx),
                date: now.date_naive(),
                success: idx % 3 != 0,
                suspicion_at_time: 0,
                details: ActionDetails::None,
            });
        }
        for idx in 0..12i64 {
            state.errors.push(ErrorRecord {
                error_type: "operation_failed".to_string(),
                timestamp: now - Duration::minutes(idx),
                details: "x".to_string(),
                suspicion_at_time: 0,
            });
        }
        store.save(&state).unwrap();
        let governor = SafetyGovernor::new(&test_config(), Box::new(store)).unwrap();
        // >10 actions/hour (+30) and >20% error rate (+25).
        assert_eq!(governor.suspicion_level(), 55);
    }

    #[test]
    fn daily_reset_decays_and_clears_stale_recovery() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        governor
            .activate_recovery_mode_at(60, "overnight cooldown", now - Duration::hours(3))
            .unwrap();
        assert_eq!(governor.suspicion_level(), 30);

        governor.reset_daily_at(now).unwrap();
        assert_eq!(governor.suspicion_level(), 21);
        // Last recovery event is over two hours old.
        assert!(!governor.state().recovery_mode);
        assert!(governor.state().recovery_until.is_none());
    }

    #[test]
    fn daily_reset_keeps_fresh_recovery() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        governor
            .activate_recovery_mode_at(60, "recent errors", now - Duration::minutes(30))
            .unwrap();

        governor.reset_daily_at(now).unwrap();
        assert_eq!(governor.suspicion_level(), 21);
        assert!(governor.state().recovery_mode);
        assert!(governor.state().recovery_until.is_some());
    }

    #[test]
    fn action_history_is_capped() {
        let (mut governor, _) = governor();
        let now = Utc::now();
        for idx in 0..120i64 {
            governor
                .record_action_at(
                    "view",
                    true,
                    ActionDetails::None,
                    now + Duration::seconds(idx * idx),
                )
                .unwrap();
        }
        assert_eq!(governor.state().actions.len(), ACTION_HISTORY_CAP);
    }
}
