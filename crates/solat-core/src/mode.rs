//! Trading mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Paper trading vs real money.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    #[default]
    Demo,
    Live,
}

impl TradingMode {
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Demo => write!(f, "DEMO"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}
