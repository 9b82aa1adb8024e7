//! Pre-live check.
//!
//! An independent validation pass run on demand before LIVE confirmation.
//! The router gathers the inputs (broker account fetch, kill switch state)
//! and the gate evaluates them. A pass is only usable while younger than
//! `prelive_max_age_s`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solat_core::AccountInfo;
use solat_risk::RiskLimitsConfig;

use crate::config::LiveGateConfig;

/// Facts the router collected for the check.
#[derive(Debug, Clone)]
pub struct PreliveInputs {
    /// Outcome of a bounded broker account fetch.
    pub broker_account: Result<AccountInfo, String>,
    pub kill_switch_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreliveCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl PreliveCheck {
    fn new(name: &str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreliveReport {
    pub passed: bool,
    pub checks: Vec<PreliveCheck>,
    pub blockers: Vec<String>,
    pub ran_at: DateTime<Utc>,
}

impl PreliveReport {
    #[must_use]
    pub fn age_s(&self, now: DateTime<Utc>) -> i64 {
        (now - self.ran_at).num_seconds()
    }

    /// Passed and not older than `max_age_s`.
    #[must_use]
    pub fn is_fresh_pass(&self, now: DateTime<Utc>, max_age_s: u64) -> bool {
        self.passed && self.age_s(now) <= max_age_s as i64
    }
}

pub(crate) fn evaluate(
    config: &LiveGateConfig,
    risk: &RiskLimitsConfig,
    static_blockers: &[String],
    inputs: &PreliveInputs,
    now: DateTime<Utc>,
) -> PreliveReport {
    let mut checks = Vec::with_capacity(5);

    checks.push(if static_blockers.is_empty() {
        PreliveCheck::new("config_valid", true, "LIVE configuration complete")
    } else {
        PreliveCheck::new("config_valid", false, static_blockers.join("; "))
    });

    checks.push(match &inputs.broker_account {
        Ok(info) => PreliveCheck::new(
            "broker_reachable",
            true,
            format!("Fetched account {}", info.account_id),
        ),
        Err(e) => PreliveCheck::new("broker_reachable", false, format!("Broker unreachable: {e}")),
    });

    let missing = risk.missing();
    checks.push(if missing.is_empty() {
        PreliveCheck::new("risk_settings_present", true, "All risk limits configured")
    } else {
        PreliveCheck::new(
            "risk_settings_present",
            false,
            format!("Missing risk limits: {}", missing.join(", ")),
        )
    });

    checks.push(match (config.locked_account(), &inputs.broker_account) {
        (None, _) => PreliveCheck::new("account_matches_lock", false, "No LIVE account id locked"),
        (Some(_), Err(_)) => {
            PreliveCheck::new("account_matches_lock", false, "Broker account unavailable")
        }
        (Some(locked), Ok(info)) if info.account_id == locked => {
            PreliveCheck::new("account_matches_lock", true, format!("Account {locked} verified"))
        }
        (Some(locked), Ok(info)) => PreliveCheck::new(
            "account_matches_lock",
            false,
            format!("Account mismatch: expected {locked}, broker reports {}", info.account_id),
        ),
    });

    checks.push(if inputs.kill_switch_active {
        PreliveCheck::new("kill_switch_inactive", false, "Kill switch is active")
    } else {
        PreliveCheck::new("kill_switch_inactive", true, "Kill switch inactive")
    });

    let blockers: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.message.clone())
        .collect();

    PreliveReport {
        passed: blockers.is_empty(),
        checks,
        blockers,
        ran_at: now,
    }
}
