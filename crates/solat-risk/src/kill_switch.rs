//! Durable emergency stop.
//!
//! The only way to obtain a `KillSwitch` is [`KillSwitch::restore`], which
//! reads the state file. A router that holds one therefore always knows the
//! persisted state before it can route anything.
//!
//! Every change is written to disk (temp file, fsync, rename) before the
//! in-memory flag changes. If the write fails, the call fails and the
//! in-memory state is left as it was.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use solat_persistence::write_atomic;

use crate::error::{RiskError, RiskResult};

// ============================================================================
// KillSwitchReason
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KillSwitchReason {
    /// Operator or API request.
    Manual { message: String },
    /// Daily loss limit breached.
    DailyLossLimit { loss_pct: Decimal, limit_pct: Decimal },
    /// Local positions disagree with the broker beyond tolerance.
    ReconciliationDrift { drifted: usize, tolerance: usize },
    /// The state file existed but could not be parsed; fail closed.
    StateUnreadable { detail: String },
}

impl KillSwitchReason {
    pub fn manual(message: impl Into<String>) -> Self {
        Self::Manual {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for KillSwitchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual { message } => write!(f, "Manual: {message}"),
            Self::DailyLossLimit {
                loss_pct,
                limit_pct,
            } => write!(f, "Daily loss limit breached: {loss_pct}% >= {limit_pct}%"),
            Self::ReconciliationDrift { drifted, tolerance } => write!(
                f,
                "Reconciliation drift: {drifted} positions mismatched (tolerance {tolerance})"
            ),
            Self::StateUnreadable { detail } => {
                write!(f, "Kill switch state file unreadable: {detail}")
            }
        }
    }
}

// ============================================================================
// KillSwitchState
// ============================================================================

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub active: bool,
    #[serde(default)]
    pub reason: Option<KillSwitchReason>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
}

// ============================================================================
// KillSwitch
// ============================================================================

#[derive(Debug)]
pub struct KillSwitch {
    path: PathBuf,
    state: KillSwitchState,
}

impl KillSwitch {
    /// Load the persisted state.
    ///
    /// A missing file means the switch was never activated. A file that
    /// cannot be parsed leaves the switch active until an operator resets it.
    pub fn restore(path: impl Into<PathBuf>) -> RiskResult<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<KillSwitchState>(&contents) {
                Ok(state) => state,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Kill switch state unreadable, failing closed");
                    KillSwitchState {
                        active: true,
                        reason: Some(KillSwitchReason::StateUnreadable {
                            detail: e.to_string(),
                        }),
                        activated_at: Some(Utc::now()),
                        reset_at: None,
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KillSwitchState::default(),
            Err(source) => {
                return Err(RiskError::Persistence {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        if state.active {
            warn!(
                path = %path.display(),
                reason = ?state.reason,
                activated_at = ?state.activated_at,
                "Kill switch restored ACTIVE"
            );
        } else {
            info!(path = %path.display(), "Kill switch restored inactive");
        }

        Ok(Self { path, state })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active
    }

    #[must_use]
    pub fn state(&self) -> &KillSwitchState {
        &self.state
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Activate and persist.
    ///
    /// Returns `Ok(false)` if already active; the original reason is kept.
    pub fn activate(&mut self, reason: KillSwitchReason, now: DateTime<Utc>) -> RiskResult<bool> {
        if self.state.active {
            warn!(new_reason = %reason, "Kill switch already active, keeping original reason");
            return Ok(false);
        }

        let next = KillSwitchState {
            active: true,
            reason: Some(reason.clone()),
            activated_at: Some(now),
            reset_at: None,
        };
        self.save(&next)?;
        self.state = next;

        error!(reason = %reason, "KILL SWITCH ACTIVATED");
        Ok(true)
    }

    /// Deactivate and persist. Returns `Ok(false)` if it was not active.
    pub fn reset(&mut self, now: DateTime<Utc>) -> RiskResult<bool> {
        if !self.state.active {
            return Ok(false);
        }

        let next = KillSwitchState {
            active: false,
            reason: None,
            activated_at: None,
            reset_at: Some(now),
        };
        self.save(&next)?;
        let previous = std::mem::replace(&mut self.state, next);

        info!(previous_reason = ?previous.reason, "Kill switch manually reset");
        Ok(true)
    }

    fn save(&self, state: &KillSwitchState) -> RiskResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &bytes).map_err(|source| RiskError::Persistence {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_restores_inactive() {
        let dir = TempDir::new().unwrap();
        let ks = KillSwitch::restore(dir.path().join("kill_switch_state.json")).unwrap();
        assert!(!ks.is_active());
    }

    #[test]
    fn test_activation_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("execution").join("kill_switch_state.json");

        let mut ks = KillSwitch::restore(&path).unwrap();
        assert!(ks.activate(KillSwitchReason::manual("test"), Utc::now()).unwrap());
        drop(ks);

        let restored = KillSwitch::restore(&path).unwrap();
        assert!(restored.is_active());
        assert_eq!(
            restored.state().reason,
            Some(KillSwitchReason::manual("test"))
        );
    }

    #[test]
    fn test_second_activation_keeps_first_reason() {
        let dir = TempDir::new().unwrap();
        let mut ks = KillSwitch::restore(dir.path().join("ks.json")).unwrap();
        ks.activate(KillSwitchReason::manual("first"), Utc::now()).unwrap();
        let changed = ks
            .activate(
                KillSwitchReason::DailyLossLimit {
                    loss_pct: dec!(6),
                    limit_pct: dec!(5),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(!changed);
        assert_eq!(ks.state().reason, Some(KillSwitchReason::manual("first")));
    }

    #[test]
    fn test_reset_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ks.json");
        let mut ks = KillSwitch::restore(&path).unwrap();
        ks.activate(KillSwitchReason::manual("x"), Utc::now()).unwrap();
        assert!(ks.reset(Utc::now()).unwrap());
        assert!(!ks.reset(Utc::now()).unwrap());

        let restored = KillSwitch::restore(&path).unwrap();
        assert!(!restored.is_active());
        assert!(restored.state().reset_at.is_some());
    }

    #[test]
    fn test_failed_persist_leaves_switch_inactive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("execution");
        std::fs::create_dir(&sub).unwrap();
        let mut ks = KillSwitch::restore(sub.join("ks.json")).unwrap();

        // Replace the directory with a plain file so the write cannot land.
        std::fs::remove_dir(&sub).unwrap();
        std::fs::write(&sub, b"file").unwrap();

        let err = ks
            .activate(KillSwitchReason::manual("x"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RiskError::Persistence { .. }));
        assert!(!ks.is_active());
    }

    #[test]
    fn test_corrupt_file_fails_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ks.json");
        std::fs::write(&path, b"{\"active\": tr").unwrap();

        let mut ks = KillSwitch::restore(&path).unwrap();
        assert!(ks.is_active());
        assert!(matches!(
            ks.state().reason,
            Some(KillSwitchReason::StateUnreadable { .. })
        ));

        ks.reset(Utc::now()).unwrap();
        assert!(!KillSwitch::restore(&path).unwrap().is_active());
    }
}
