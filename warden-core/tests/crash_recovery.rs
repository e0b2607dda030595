use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use warden_core::{
    BackupStore, BrowserControl, BrowserResult, Cookie, DecisionMode, JsonStateStore,
    RecoveryJournal, RecoveryOrchestrator, SafetyGovernor, SessionStatsStore, WardenConfig,
    WardenError,
};

fn test_config(base: &Path) -> WardenConfig {
    let toml = format!(
        r#"
        [platform]
        name = "testnet"
        base_url = "https://example.com/"
        home_indicators = ["feed"]
        login_markers = ["login"]

        [paths]
        base_dir = "{base}"
        state_file = "session/security_state.json"
        stats_file = "session/stats.json"
        journal_file = "logs/recovery/recovery_history.json"
        backup_dir = "backups"
        session_dir = "session/cookies"
        logs_dir = "logs"

        [limits]
        daily_quotas = {{ connection = 25, message = 50 }}
        min_action_delay_seconds = 1
        max_action_delay_seconds = 2
        delay_floor_seconds = 1

        [recovery]
        probe_wait_seconds = 1
        "#,
        base = base.display()
    );
    toml::from_str(&toml).expect("inline config should parse")
}

fn governor(config: &WardenConfig, base: &Path) -> SafetyGovernor {
    let store = JsonStateStore::new(base.join("session/security_state.json")).unwrap();
    SafetyGovernor::new(config, Box::new(store))
        .unwrap()
        .with_rng_seed(3)
}

struct DeadBrowser;

#[async_trait]
impl BrowserControl for DeadBrowser {
    async fn current_url(&self) -> BrowserResult<String> {
        Ok("https://example.com/login".to_string())
    }

    async fn page_content(&self) -> BrowserResult<String> {
        Ok("<html>please sign in</html>".to_string())
    }

    async fn has_element(&self, _selector: &str) -> BrowserResult<bool> {
        Ok(false)
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        Ok(Vec::new())
    }

    async fn set_cookies(&self, _cookies: Vec<Cookie>) -> BrowserResult<()> {
        Ok(())
    }

    async fn clear_cookies(&self) -> BrowserResult<()> {
        Ok(())
    }

    async fn clear_local_state(&self) -> BrowserResult<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        Ok(())
    }
}

#[test]
fn safety_state_survives_a_restart() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    {
        let mut first = governor(&config, temp.path());
        first
            .activate_recovery_mode(60, "manual cooldown")
            .unwrap();
        first.record_error("network", "connection reset").unwrap();
    }

    let mut second = governor(&config, temp.path());
    assert!(second.recovery_mode().unwrap());
    assert_eq!(second.state().recoveries.len(), 1);
    assert_eq!(second.state().errors.len(), 1);

    let decision = second.decide("connection").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.mode, DecisionMode::Recovery);
}

#[tokio::test(start_paused = true)]
async fn failed_operation_locks_out_the_next_process() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let orchestrator = RecoveryOrchestrator::new(
        Arc::new(Mutex::new(governor(&config, temp.path()))),
        BackupStore::new(
            temp.path().join("backups"),
            temp.path().join("session/cookies"),
            config.backup.clone(),
        )
        .unwrap(),
        Arc::new(Mutex::new(
            RecoveryJournal::open(temp.path().join("logs/recovery/recovery_history.json")).unwrap(),
        )),
        SessionStatsStore::new(temp.path().join("session/stats.json")).unwrap(),
        Some(Arc::new(DeadBrowser)),
        config.platform.clone(),
        config.recovery.clone(),
    );

    let outcome: warden_core::RunOutcome<()> = orchestrator
        .run("connection", || async {
            Err(WardenError::OperationFailed {
                name: "connection".to_string(),
                message: "session expired".to_string(),
            })
        })
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("emergency stop"));

    // A fresh process sees the persisted lockout.
    let mut revived = governor(&config, temp.path());
    assert!(revived.recovery_mode().unwrap());
    assert_eq!(revived.state().emergencies.len(), 1);
    let decision = revived.decide("connection").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.mode, DecisionMode::Recovery);
}
