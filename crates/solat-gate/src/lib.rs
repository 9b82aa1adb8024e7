//! LIVE trading gates.
//!
//! Two independent surfaces decide whether real-money trading is allowed:
//! - Static config gates: master enable, second-factor token, locked account,
//!   max order size, every risk limit explicitly set
//! - Runtime confirmation protocol: Warned -> PhraseConfirmed -> TokenProvided
//!   -> PreliveChecked -> AccountConfirmed -> LiveConfirmed, strictly ordered
//!
//! [`Gate::evaluate`] combines both with the kill switch into a
//! [`GateStatus`]. It is recomputed on every query and never cached.

pub mod config;
pub mod confirmation;
pub mod error;
pub mod gate;
pub mod prelive;

pub use config::{LiveGateConfig, SecretToken};
pub use confirmation::{
    ConfirmLiveResult, ConfirmationStep, FlowState, LiveConfirmation, LiveStep,
    CONFIRMATION_PHRASE,
};
pub use error::{ConfigError, GateRejection};
pub use gate::{Gate, GateDetails, GateStatus};
pub use prelive::{PreliveCheck, PreliveInputs, PreliveReport};
