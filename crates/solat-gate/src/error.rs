//! Gate error types.

use thiserror::Error;

use crate::confirmation::ConfirmationStep;

/// Static LIVE configuration is incomplete. Fatal at startup in LIVE mode.
#[derive(Debug, Clone, Error)]
#[error("LIVE configuration invalid: {}", .blockers.join("; "))]
pub struct ConfigError {
    pub blockers: Vec<String>,
}

/// A confirmation step was refused. Expected business outcome, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateRejection {
    #[error("Confirmation step out of order: requires {required}, current {}", .current.map_or_else(|| "none".to_string(), |s| s.to_string()))]
    OutOfOrder {
        required: ConfirmationStep,
        current: Option<ConfirmationStep>,
    },

    #[error("Phrase does not match. Type exactly: {expected}")]
    PhraseMismatch { expected: &'static str },

    #[error("LIVE enable token is not configured")]
    TokenNotConfigured,

    #[error("Invalid LIVE enable token")]
    TokenMismatch,

    #[error("Pre-live check required before LIVE confirmation")]
    PreliveNotRun,

    #[error("Pre-live check failed: {}", .0.join("; "))]
    PreliveFailed(Vec<String>),

    #[error("Pre-live check is stale: {age_s}s old, max {max_age_s}s")]
    PreliveStale { age_s: i64, max_age_s: u64 },

    #[error("LIVE account id is not locked in configuration")]
    AccountNotLocked,

    #[error("Account mismatch: expected {locked}, got {provided}")]
    AccountMismatch { provided: String, locked: String },

    #[error("LIVE config gates blocked: {}", .0.join("; "))]
    StaticGatesBlocked(Vec<String>),

    #[error("Kill switch is active")]
    KillSwitchActive,
}
