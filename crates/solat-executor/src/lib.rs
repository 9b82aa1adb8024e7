//! Execution router and broker reconciliation.
//!
//! The router is a single actor that owns orders, positions and the account
//! cache. It provides:
//! - Intent pipeline: idempotency, allowlist, kill switch, LIVE gate, risk
//! - Order state machine with ledger-first transitions
//! - Unknown-outcome handling for timed-out submits
//! - Kill switch escalation with a bounded close-all sweep
//! - Periodic reconciliation against broker positions
//!
//! Brokers plug in through [`BrokerAdapter`]; [`PaperBroker`] is the
//! in-process implementation used for DEMO runs and tests.

pub mod account;
pub mod broker;
pub mod config;
pub mod error;
pub mod paper;
pub mod positions;
pub mod reconciliation;
pub mod retry;
pub mod router;
pub mod safety;
pub mod status;

pub use account::{AccountState, Freshness, StalenessPolicy};
pub use broker::{
    BoxFuture, BrokerAdapter, CloseAck, CloseRequest, DynBroker, OrderRequest, SubmitAck,
};
pub use config::{ExecutionConfig, ModeFlags, ReconcileConfig, SweepPolicy, TimeoutConfig};
pub use error::{BrokerError, BrokerResult, ExecutorError, ExecutorResult};
pub use paper::{PaperBroker, SubmitBehavior};
pub use positions::PositionBook;
pub use reconciliation::{compare, ReconciliationReport, ReconciliationService, ResolvedOrder};
pub use retry::{retry_read, with_timeout, RetryPolicy};
pub use router::{spawn_router, ExecutionRouter, RouterHandle, RouterMsg};
pub use safety::{CircuitBreaker, CircuitBreakerConfig, IdempotencyConfig, IdempotencyGuard};
pub use status::{
    ArmResult, BrokerFill, ExecutionStatus, KillSwitchOutcome, Rejection, RejectionKind,
    RouteOutcome, SweepReport,
};
