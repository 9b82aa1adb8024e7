//! LIVE gate configuration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// Second-factor token. Wiped on drop, redacted in `Debug` and `Serialize`.
#[derive(Clone)]
pub struct SecretToken(Zeroizing<String>);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Constant-time comparison against a caller-supplied candidate.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.0.as_bytes();
        let b = candidate.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

impl Serialize for SecretToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for SecretToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Static LIVE settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveGateConfig {
    /// Master enable. Nothing else matters while this is false.
    #[serde(default)]
    pub live_trading_enabled: bool,
    #[serde(default)]
    pub live_enable_token: Option<SecretToken>,
    /// Only this broker account may trade LIVE.
    #[serde(default)]
    pub live_account_id: Option<String>,
    #[serde(default = "default_confirmation_ttl_s")]
    pub confirmation_ttl_s: u64,
    #[serde(default = "default_prelive_max_age_s")]
    pub prelive_max_age_s: u64,
    /// Warn when the last broker account fetch is older than this.
    #[serde(default = "default_account_verify_max_age_s")]
    pub account_verify_max_age_s: u64,
}

fn default_confirmation_ttl_s() -> u64 {
    600
}

fn default_prelive_max_age_s() -> u64 {
    300
}

fn default_account_verify_max_age_s() -> u64 {
    300
}

impl Default for LiveGateConfig {
    fn default() -> Self {
        Self {
            live_trading_enabled: false,
            live_enable_token: None,
            live_account_id: None,
            confirmation_ttl_s: default_confirmation_ttl_s(),
            prelive_max_age_s: default_prelive_max_age_s(),
            account_verify_max_age_s: default_account_verify_max_age_s(),
        }
    }
}

impl LiveGateConfig {
    /// Locked account id, ignoring blank values.
    #[must_use]
    pub fn locked_account(&self) -> Option<&str> {
        self.live_account_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn token(&self) -> Option<&SecretToken> {
        self.live_enable_token.as_ref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_never_printed() {
        let cfg = LiveGateConfig {
            live_enable_token: Some(SecretToken::new("hunter2")),
            ..Default::default()
        };
        assert!(!format!("{cfg:?}").contains("hunter2"));
        assert!(!serde_json::to_string(&cfg).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_token_matching() {
        let t = SecretToken::new("abc123");
        assert!(t.matches("abc123"));
        assert!(!t.matches("abc124"));
        assert!(!t.matches("abc12"));
        assert!(!t.matches(""));
    }

    #[test]
    fn test_defaults_from_toml() {
        let cfg: LiveGateConfig = toml::from_str(
            r#"
            live_trading_enabled = true
            live_enable_token = "tok"
            live_account_id = "  "
            "#,
        )
        .unwrap();
        assert_eq!(cfg.confirmation_ttl_s, 600);
        assert_eq!(cfg.prelive_max_age_s, 300);
        assert!(cfg.token().is_some());
        assert!(cfg.locked_account().is_none());
    }
}
