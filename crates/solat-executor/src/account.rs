//! Cached broker account state and its staleness policy.
//!
//! The balance feeds the daily-loss denominator, so a value that is too old
//! must not be used silently. When stale, exactly one refresh is attempted
//! per check; there is no retry loop inside a routing decision.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use solat_core::AccountInfo;

use crate::broker::BrokerAdapter;
use crate::error::BrokerResult;
use crate::retry::with_timeout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    /// Older than this triggers a refresh before use.
    #[serde(default = "StalenessPolicy::default_max_age_s")]
    pub max_age_s: u64,
    /// Refresh after this many fills regardless of age.
    #[serde(default = "StalenessPolicy::default_refresh_every_fills")]
    pub refresh_every_fills: u32,
}

impl StalenessPolicy {
    fn default_max_age_s() -> u64 {
        300
    }

    fn default_refresh_every_fills() -> u32 {
        10
    }

    /// Past this age a failed refresh blocks trading instead of warning.
    #[must_use]
    pub fn hard_ceiling_s(&self) -> u64 {
        self.max_age_s.saturating_mul(2)
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_age_s: Self::default_max_age_s(),
            refresh_every_fills: Self::default_refresh_every_fills(),
        }
    }
}

/// Result of [`AccountState::ensure_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Refreshed,
    /// Refresh failed but the cached value is within the hard ceiling.
    StaleUsable { age_s: i64, error: String },
    /// Refresh failed and the cached value is unusable.
    TooStale { age_s: Option<i64>, error: String },
}

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub account_id: Option<String>,
    pub balance: Decimal,
    pub available: Decimal,
    pub currency: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub fills_since_refresh: u32,
    pub last_refresh_error: Option<String>,
}

impl AccountState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, info: AccountInfo, now: DateTime<Utc>) {
        self.account_id = Some(info.account_id);
        self.balance = info.balance;
        self.available = info.available;
        self.currency = Some(info.currency);
        self.last_updated = Some(now);
        self.fills_since_refresh = 0;
        self.last_refresh_error = None;
    }

    #[must_use]
    pub fn age_s(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_updated.map(|t| (now - t).num_seconds())
    }

    #[must_use]
    pub fn is_stale(&self, policy: &StalenessPolicy, now: DateTime<Utc>) -> bool {
        match self.age_s(now) {
            Some(age) => age > policy.max_age_s as i64,
            None => true,
        }
    }

    /// Count a fill. Returns true when the fill count calls for a refresh.
    pub fn record_fill(&mut self, policy: &StalenessPolicy) -> bool {
        self.fills_since_refresh += 1;
        policy.refresh_every_fills > 0 && self.fills_since_refresh >= policy.refresh_every_fills
    }

    /// One bounded account fetch.
    pub async fn refresh(
        &mut self,
        broker: &dyn BrokerAdapter,
        limit: Duration,
        now: DateTime<Utc>,
    ) -> BrokerResult<()> {
        match with_timeout("account", limit, broker.fetch_account()).await {
            Ok(info) => {
                debug!(balance = %info.balance, "Account refreshed");
                self.apply(info, now);
                Ok(())
            }
            Err(e) => {
                self.last_refresh_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Make the cached balance usable for a decision, refreshing at most once.
    pub async fn ensure_fresh(
        &mut self,
        broker: &dyn BrokerAdapter,
        policy: &StalenessPolicy,
        limit: Duration,
        now: DateTime<Utc>,
    ) -> Freshness {
        if !self.is_stale(policy, now) {
            return Freshness::Fresh;
        }
        match self.refresh(broker, limit, now).await {
            Ok(()) => Freshness::Refreshed,
            Err(e) => {
                let error = e.to_string();
                match self.age_s(now) {
                    Some(age_s) if age_s <= policy.hard_ceiling_s() as i64 => {
                        warn!(age_s, error = %error, "Account balance stale, refresh failed; using cached value");
                        Freshness::StaleUsable { age_s, error }
                    }
                    age_s => Freshness::TooStale { age_s, error },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperBroker;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn seeded(now: DateTime<Utc>) -> AccountState {
        let mut state = AccountState::new();
        state.apply(
            AccountInfo {
                account_id: "PAPER-001".into(),
                balance: dec!(10000),
                available: dec!(10000),
                currency: "USD".into(),
                is_live: false,
            },
            now,
        );
        state
    }

    #[tokio::test]
    async fn test_fresh_balance_skips_fetch() {
        let broker = PaperBroker::default();
        let now = Utc::now();
        let mut state = seeded(now);
        let f = state
            .ensure_fresh(&broker, &StalenessPolicy::default(), Duration::from_secs(1), now)
            .await;
        assert_eq!(f, Freshness::Fresh);
        assert_eq!(broker.account_fetches(), 0);
    }

    #[tokio::test]
    async fn test_stale_balance_refreshes_once() {
        let broker = PaperBroker::new("PAPER-001", dec!(8000));
        let start = Utc::now();
        let mut state = seeded(start);
        let later = start + ChronoDuration::seconds(301);
        let f = state
            .ensure_fresh(&broker, &StalenessPolicy::default(), Duration::from_secs(1), later)
            .await;
        assert_eq!(f, Freshness::Refreshed);
        assert_eq!(state.balance, dec!(8000));
        assert_eq!(broker.account_fetches(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_within_ceiling_warns() {
        let broker = PaperBroker::default();
        broker.set_account_failure(Some("gateway down".into()));
        let start = Utc::now();
        let mut state = seeded(start);
        let f = state
            .ensure_fresh(
                &broker,
                &StalenessPolicy::default(),
                Duration::from_secs(1),
                start + ChronoDuration::seconds(400),
            )
            .await;
        assert!(matches!(f, Freshness::StaleUsable { age_s: 400, .. }));
        assert_eq!(broker.account_fetches(), 1);
        assert!(state.last_refresh_error.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_past_ceiling_blocks() {
        let broker = PaperBroker::default();
        broker.set_account_failure(Some("gateway down".into()));
        let start = Utc::now();
        let mut state = seeded(start);
        let f = state
            .ensure_fresh(
                &broker,
                &StalenessPolicy::default(),
                Duration::from_secs(1),
                start + ChronoDuration::seconds(601),
            )
            .await;
        assert!(matches!(f, Freshness::TooStale { age_s: Some(601), .. }));
        assert_eq!(broker.account_fetches(), 1);
    }

    #[test]
    fn test_fill_counter_triggers_refresh() {
        let policy = StalenessPolicy {
            max_age_s: 300,
            refresh_every_fills: 3,
        };
        let mut state = AccountState::new();
        assert!(!state.record_fill(&policy));
        assert!(!state.record_fill(&policy));
        assert!(state.record_fill(&policy));
    }
}
