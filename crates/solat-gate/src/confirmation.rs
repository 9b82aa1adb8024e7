//! LIVE confirmation protocol types.
//!
//! The server keeps a [`FlowState`] and every caller submission is a
//! [`LiveStep`]. Each step is only accepted from its predecessor state, so
//! ordering is enforced here no matter what the client believes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phrase the operator must type, compared case-insensitively after trimming.
pub const CONFIRMATION_PHRASE: &str = "ENABLE LIVE TRADING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStep {
    Warned,
    PhraseConfirmed,
    TokenProvided,
    PreliveChecked,
    AccountConfirmed,
    LiveConfirmed,
}

impl fmt::Display for ConfirmationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warned => "warned",
            Self::PhraseConfirmed => "phrase_confirmed",
            Self::TokenProvided => "token_provided",
            Self::PreliveChecked => "prelive_checked",
            Self::AccountConfirmed => "account_confirmed",
            Self::LiveConfirmed => "live_confirmed",
        };
        f.write_str(s)
    }
}

/// A completed confirmation. In memory only; a restart requires a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfirmation {
    pub confirmed_at: DateTime<Utc>,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

impl LiveConfirmation {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    #[must_use]
    pub fn remaining_s(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Server-side protocol position, carrying what each step established.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Warned {
        started_at: DateTime<Utc>,
    },
    PhraseConfirmed {
        started_at: DateTime<Utc>,
    },
    TokenProvided {
        started_at: DateTime<Utc>,
    },
    PreliveChecked {
        started_at: DateTime<Utc>,
        prelive_at: DateTime<Utc>,
    },
    AccountConfirmed {
        started_at: DateTime<Utc>,
        prelive_at: DateTime<Utc>,
        account_id: String,
    },
    LiveConfirmed(LiveConfirmation),
}

impl FlowState {
    #[must_use]
    pub fn step(&self) -> ConfirmationStep {
        match self {
            Self::Warned { .. } => ConfirmationStep::Warned,
            Self::PhraseConfirmed { .. } => ConfirmationStep::PhraseConfirmed,
            Self::TokenProvided { .. } => ConfirmationStep::TokenProvided,
            Self::PreliveChecked { .. } => ConfirmationStep::PreliveChecked,
            Self::AccountConfirmed { .. } => ConfirmationStep::AccountConfirmed,
            Self::LiveConfirmed(_) => ConfirmationStep::LiveConfirmed,
        }
    }
}

/// One caller submission.
#[derive(Clone, PartialEq)]
pub enum LiveStep {
    /// Show the risk warning and start a fresh flow.
    Begin,
    Phrase(String),
    Token(String),
    /// Attach the latest pre-live check result.
    Prelive,
    Account(String),
    Finalize,
}

impl fmt::Debug for LiveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("Begin"),
            Self::Phrase(p) => f.debug_tuple("Phrase").field(p).finish(),
            Self::Token(_) => f.write_str("Token(***)"),
            Self::Prelive => f.write_str("Prelive"),
            Self::Account(a) => f.debug_tuple("Account").field(a).finish(),
            Self::Finalize => f.write_str("Finalize"),
        }
    }
}

/// Result of the one-shot confirm-live command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmLiveResult {
    pub ok: bool,
    pub message: String,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_in_s: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let c = LiveConfirmation {
            confirmed_at: now,
            account_id: "ACC".to_string(),
            expires_at: now + Duration::seconds(600),
        };
        assert!(!c.is_expired(now + Duration::seconds(600)));
        assert!(c.is_expired(now + Duration::seconds(601)));
        assert_eq!(c.remaining_s(now + Duration::seconds(700)), 0);
    }

    #[test]
    fn test_token_step_debug_is_redacted() {
        let s = format!("{:?}", LiveStep::Token("secret".to_string()));
        assert!(!s.contains("secret"));
    }
}
