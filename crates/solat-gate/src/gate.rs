//! Gate evaluation and the confirmation state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use solat_core::TradingMode;
use solat_risk::RiskLimitsConfig;

use crate::config::LiveGateConfig;
use crate::confirmation::{
    ConfirmLiveResult, ConfirmationStep, FlowState, LiveConfirmation, LiveStep,
    CONFIRMATION_PHRASE,
};
use crate::error::{ConfigError, GateRejection};
use crate::prelive::{self, PreliveInputs, PreliveReport};

/// Seconds before expiry at which a warning is raised.
const EXPIRY_WARNING_S: i64 = 60;

// ============================================================================
// GateStatus
// ============================================================================

/// Derived on every query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStatus {
    pub allowed: bool,
    pub mode: TradingMode,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    pub details: GateDetails,
}

impl GateStatus {
    /// All blockers as one user-facing reason.
    #[must_use]
    pub fn reason(&self) -> String {
        self.blockers.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDetails {
    pub locked_account_id: Option<String>,
    pub confirmation: Option<LiveConfirmation>,
    pub confirmation_step: Option<ConfirmationStep>,
    pub prelive_passed: Option<bool>,
    pub prelive_ran_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Gate
// ============================================================================

#[derive(Debug)]
pub struct Gate {
    config: LiveGateConfig,
    risk: RiskLimitsConfig,
    flow: Option<FlowState>,
    confirmation: Option<LiveConfirmation>,
    revoked: bool,
    last_prelive: Option<PreliveReport>,
}

impl Gate {
    #[must_use]
    pub fn new(config: LiveGateConfig, risk: RiskLimitsConfig) -> Self {
        Self {
            config,
            risk,
            flow: None,
            confirmation: None,
            revoked: false,
            last_prelive: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LiveGateConfig {
        &self.config
    }

    #[must_use]
    pub fn current_step(&self) -> Option<ConfirmationStep> {
        self.flow.as_ref().map(FlowState::step)
    }

    #[must_use]
    pub fn last_prelive(&self) -> Option<&PreliveReport> {
        self.last_prelive.as_ref()
    }

    /// Static config gate failures, in a fixed order.
    #[must_use]
    pub fn static_blockers(&self) -> Vec<String> {
        static_blockers(&self.config, &self.risk)
    }

    /// Startup validation. LIVE refuses to start with any static blocker.
    pub fn validate_startup(
        mode: TradingMode,
        config: &LiveGateConfig,
        risk: &RiskLimitsConfig,
    ) -> Result<(), ConfigError> {
        let blockers = static_blockers(config, risk);
        if blockers.is_empty() {
            return Ok(());
        }
        if mode.is_live() {
            return Err(ConfigError { blockers });
        }
        for blocker in &blockers {
            info!(blocker = %blocker, "LIVE gate unsatisfied (DEMO mode, informational)");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Whether `mode` may trade right now.
    ///
    /// LIVE requires every static gate, an unexpired confirmation for the
    /// locked account, and an inactive kill switch.
    #[must_use]
    pub fn evaluate(
        &self,
        mode: TradingMode,
        kill_switch_active: bool,
        account_verified_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> GateStatus {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        if mode.is_live() {
            blockers.extend(self.static_blockers());
            if let Some(blocker) = self.confirmation_blocker(now) {
                blockers.push(blocker);
            }
            self.collect_live_warnings(account_verified_at, now, &mut warnings);
        }
        if kill_switch_active {
            blockers.push("Kill switch is active".to_string());
        }

        GateStatus {
            allowed: blockers.is_empty(),
            mode,
            blockers,
            warnings,
            details: GateDetails {
                locked_account_id: self.config.locked_account().map(str::to_string),
                confirmation: self.confirmation.clone(),
                confirmation_step: self.current_step(),
                prelive_passed: self.last_prelive.as_ref().map(|r| r.passed),
                prelive_ran_at: self.last_prelive.as_ref().map(|r| r.ran_at),
            },
        }
    }

    fn confirmation_blocker(&self, now: DateTime<Utc>) -> Option<String> {
        match &self.confirmation {
            None if self.revoked => Some("LIVE confirmation revoked".to_string()),
            None => Some("LIVE confirmation not completed".to_string()),
            Some(c) if c.is_expired(now) => Some(format!(
                "LIVE confirmation expired at {}",
                c.expires_at.to_rfc3339()
            )),
            Some(c) if self.config.locked_account() != Some(c.account_id.as_str()) => Some(
                "LIVE confirmation account does not match locked account".to_string(),
            ),
            Some(_) => None,
        }
    }

    fn collect_live_warnings(
        &self,
        account_verified_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) {
        match account_verified_at {
            None => warnings.push("Account has not been verified against the broker".to_string()),
            Some(at) => {
                let age = (now - at).num_seconds();
                if age > self.config.account_verify_max_age_s as i64 {
                    warnings.push(format!("Account verification is {age} seconds old"));
                }
            }
        }
        if let Some(report) = &self.last_prelive {
            if report.passed && !report.is_fresh_pass(now, self.config.prelive_max_age_s) {
                warnings.push(format!("Pre-live check is {} seconds old", report.age_s(now)));
            }
        }
        if let Some(c) = &self.confirmation {
            let remaining = c.remaining_s(now);
            if !c.is_expired(now) && remaining <= EXPIRY_WARNING_S {
                warnings.push(format!("LIVE confirmation expires in {remaining} seconds"));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Pre-live check
    // ------------------------------------------------------------------------

    /// Evaluate and remember a pre-live check.
    pub fn record_prelive(&mut self, inputs: &PreliveInputs, now: DateTime<Utc>) -> PreliveReport {
        let report = prelive::evaluate(
            &self.config,
            &self.risk,
            &self.static_blockers(),
            inputs,
            now,
        );
        if report.passed {
            info!("Pre-live check passed");
        } else {
            warn!(blockers = ?report.blockers, "Pre-live check failed");
        }
        self.last_prelive = Some(report.clone());
        report
    }

    // ------------------------------------------------------------------------
    // Confirmation protocol
    // ------------------------------------------------------------------------

    /// Apply one protocol step. Returns the step now reached.
    pub fn advance(
        &mut self,
        step: LiveStep,
        kill_switch_active: bool,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationStep, GateRejection> {
        let next = match step {
            LiveStep::Begin => {
                info!("LIVE confirmation flow started");
                FlowState::Warned { started_at: now }
            }
            LiveStep::Phrase(phrase) => {
                let started_at = match &self.flow {
                    Some(FlowState::Warned { started_at }) => *started_at,
                    _ => return Err(self.out_of_order(ConfirmationStep::Warned)),
                };
                if phrase.trim().to_uppercase() != CONFIRMATION_PHRASE {
                    return Err(GateRejection::PhraseMismatch {
                        expected: CONFIRMATION_PHRASE,
                    });
                }
                FlowState::PhraseConfirmed { started_at }
            }
            LiveStep::Token(token) => {
                let started_at = match &self.flow {
                    Some(FlowState::PhraseConfirmed { started_at }) => *started_at,
                    _ => return Err(self.out_of_order(ConfirmationStep::PhraseConfirmed)),
                };
                let Some(secret) = self.config.token() else {
                    return Err(GateRejection::TokenNotConfigured);
                };
                if !secret.matches(&token) {
                    warn!("LIVE confirmation rejected: invalid token, flow aborted");
                    self.flow = None;
                    return Err(GateRejection::TokenMismatch);
                }
                FlowState::TokenProvided { started_at }
            }
            LiveStep::Prelive => {
                let started_at = match &self.flow {
                    Some(FlowState::TokenProvided { started_at }) => *started_at,
                    _ => return Err(self.out_of_order(ConfirmationStep::TokenProvided)),
                };
                let prelive_at = self.fresh_prelive(now)?;
                FlowState::PreliveChecked {
                    started_at,
                    prelive_at,
                }
            }
            LiveStep::Account(account_id) => {
                let (started_at, prelive_at) = match &self.flow {
                    Some(FlowState::PreliveChecked {
                        started_at,
                        prelive_at,
                    }) => (*started_at, *prelive_at),
                    _ => return Err(self.out_of_order(ConfirmationStep::PreliveChecked)),
                };
                let Some(locked) = self.config.locked_account() else {
                    return Err(GateRejection::AccountNotLocked);
                };
                // Compared exactly as given; only the configured lock is trimmed.
                let provided = account_id.as_str();
                if provided != locked {
                    warn!(expected = %locked, got = %provided, "LIVE confirmation rejected: account mismatch");
                    return Err(GateRejection::AccountMismatch {
                        provided: provided.to_string(),
                        locked: locked.to_string(),
                    });
                }
                FlowState::AccountConfirmed {
                    started_at,
                    prelive_at,
                    account_id: provided.to_string(),
                }
            }
            LiveStep::Finalize => {
                let account_id = match &self.flow {
                    Some(FlowState::AccountConfirmed { account_id, .. }) => account_id.clone(),
                    _ => return Err(self.out_of_order(ConfirmationStep::AccountConfirmed)),
                };
                let blockers = self.static_blockers();
                if !blockers.is_empty() {
                    return Err(GateRejection::StaticGatesBlocked(blockers));
                }
                if kill_switch_active {
                    return Err(GateRejection::KillSwitchActive);
                }
                let confirmation = LiveConfirmation {
                    confirmed_at: now,
                    account_id,
                    expires_at: now + Duration::seconds(self.config.confirmation_ttl_s as i64),
                };
                info!(
                    account_id = %confirmation.account_id,
                    ttl_s = self.config.confirmation_ttl_s,
                    "LIVE trading confirmed"
                );
                self.confirmation = Some(confirmation.clone());
                self.revoked = false;
                FlowState::LiveConfirmed(confirmation)
            }
        };

        let reached = next.step();
        self.flow = Some(next);
        Ok(reached)
    }

    /// Run every step in order with the latest pre-live result.
    pub fn confirm_live(
        &mut self,
        phrase: &str,
        token: &str,
        account_id: &str,
        kill_switch_active: bool,
        now: DateTime<Utc>,
    ) -> ConfirmLiveResult {
        let steps = [
            LiveStep::Begin,
            LiveStep::Phrase(phrase.to_string()),
            LiveStep::Token(token.to_string()),
            LiveStep::Prelive,
            LiveStep::Account(account_id.to_string()),
            LiveStep::Finalize,
        ];
        for step in steps {
            if let Err(rejection) = self.advance(step, kill_switch_active, now) {
                return ConfirmLiveResult {
                    ok: false,
                    message: rejection.to_string(),
                    confirmed_at: None,
                    expires_in_s: None,
                };
            }
        }
        ConfirmLiveResult {
            ok: true,
            message: "LIVE trading confirmed".to_string(),
            confirmed_at: self.confirmation.as_ref().map(|c| c.confirmed_at),
            expires_in_s: self.confirmation.as_ref().map(|c| c.remaining_s(now)),
        }
    }

    /// Invalidate any confirmation and in-progress flow. Idempotent.
    ///
    /// Returns true if a confirmation or flow was actually cleared.
    pub fn revoke(&mut self) -> bool {
        let had_something = self.confirmation.is_some() || self.flow.is_some();
        if had_something {
            self.confirmation = None;
            self.flow = None;
            self.revoked = true;
            info!("LIVE confirmation revoked");
        }
        had_something
    }

    fn fresh_prelive(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, GateRejection> {
        let report = self
            .last_prelive
            .as_ref()
            .ok_or(GateRejection::PreliveNotRun)?;
        if !report.passed {
            return Err(GateRejection::PreliveFailed(report.blockers.clone()));
        }
        if !report.is_fresh_pass(now, self.config.prelive_max_age_s) {
            return Err(GateRejection::PreliveStale {
                age_s: report.age_s(now),
                max_age_s: self.config.prelive_max_age_s,
            });
        }
        Ok(report.ran_at)
    }

    fn out_of_order(&self, required: ConfirmationStep) -> GateRejection {
        let current = self.current_step();
        warn!(%required, ?current, "LIVE confirmation step out of order");
        GateRejection::OutOfOrder { required, current }
    }
}

fn static_blockers(config: &LiveGateConfig, risk: &RiskLimitsConfig) -> Vec<String> {
    let mut blockers = Vec::new();
    if !config.live_trading_enabled {
        blockers.push("LIVE trading is not enabled (live_trading_enabled)".to_string());
    }
    if config.token().is_none() {
        blockers.push("LIVE enable token is not configured (live_enable_token)".to_string());
    }
    if config.locked_account().is_none() {
        blockers.push("LIVE account id is not configured (live_account_id)".to_string());
    }
    if risk.max_order_size.is_none() {
        blockers.push("LIVE max order size is not set (max_order_size)".to_string());
    }
    for name in risk.missing() {
        if name != "max_order_size" {
            blockers.push(format!("LIVE risk limit is not set ({name})"));
        }
    }
    blockers
}
