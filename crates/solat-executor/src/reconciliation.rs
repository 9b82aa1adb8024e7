//! Broker reconciliation.
//!
//! Local positions are compared with the broker's report on a fixed
//! interval. Drift is recorded and escalated, never patched over: the router
//! does not adopt or drop positions because of a mismatch.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use solat_core::{BrokerPosition, OpenPosition, OrderId, OrderStatus};
use solat_persistence::{DriftKind, DriftRecord};

use crate::error::ExecutorError;
use crate::router::RouterHandle;

/// An order whose submit outcome was unknown and has now been settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOrder {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub ran_at: DateTime<Utc>,
    pub local_count: usize,
    pub broker_count: usize,
    pub drift: Vec<DriftRecord>,
    pub resolved_unknown: Vec<ResolvedOrder>,
    pub kill_switch_triggered: bool,
}

impl ReconciliationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }

    #[must_use]
    pub fn count(&self, kind: DriftKind) -> usize {
        self.drift.iter().filter(|d| d.kind == kind).count()
    }
}

/// Diff local positions against the broker.
///
/// Broker positions whose order is still in flight locally (`in_flight`) are
/// not drift: the fill simply has not been applied yet.
#[must_use]
pub fn compare(
    local: &[OpenPosition],
    broker: &[BrokerPosition],
    in_flight: &HashSet<OrderId>,
    size_tolerance: Decimal,
) -> Vec<DriftRecord> {
    let broker_by_id: BTreeMap<&OrderId, &BrokerPosition> =
        broker.iter().map(|p| (&p.order_id, p)).collect();
    let local_ids: HashSet<&OrderId> = local.iter().map(|p| &p.order_id).collect();
    let mut drift = Vec::new();

    for position in local {
        match broker_by_id.get(&position.order_id) {
            None => drift.push(DriftRecord {
                kind: DriftKind::MissingOnBroker,
                order_id: position.order_id.clone(),
                symbol: position.symbol.clone(),
                local_size: Some(position.size),
                broker_size: None,
            }),
            Some(remote) => {
                let diff = (remote.size.inner() - position.size.inner()).abs();
                if diff > size_tolerance {
                    drift.push(DriftRecord {
                        kind: DriftKind::SizeMismatch,
                        order_id: position.order_id.clone(),
                        symbol: position.symbol.clone(),
                        local_size: Some(position.size),
                        broker_size: Some(remote.size),
                    });
                }
            }
        }
    }

    for remote in broker {
        if local_ids.contains(&remote.order_id) || in_flight.contains(&remote.order_id) {
            continue;
        }
        drift.push(DriftRecord {
            kind: DriftKind::MissingLocally,
            order_id: remote.order_id.clone(),
            symbol: remote.symbol.clone(),
            local_size: None,
            broker_size: Some(remote.size),
        });
    }

    drift
}

// ============================================================================
// ReconciliationService
// ============================================================================

/// Periodically asks the router to reconcile until cancelled.
pub struct ReconciliationService {
    handle: RouterHandle,
    interval: Duration,
    cancel: CancellationToken,
}

impl ReconciliationService {
    #[must_use]
    pub fn new(handle: RouterHandle, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            handle,
            interval,
            cancel,
        }
    }

    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!(interval_s = self.interval.as_secs(), "Reconciliation loop started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; skip it so connect has a chance.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("Reconciliation loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    match self.handle.reconcile().await {
                        Ok(report) if report.is_clean() => {
                            debug!(positions = report.local_count, "Reconciliation clean");
                        }
                        Ok(report) => {
                            warn!(
                                drift = report.drift.len(),
                                kill_switch = report.kill_switch_triggered,
                                "Reconciliation found drift"
                            );
                        }
                        Err(ExecutorError::NotConnected) => {
                            debug!("Reconciliation skipped: not connected");
                        }
                        Err(ExecutorError::RouterClosed) => {
                            info!("Router stopped, ending reconciliation loop");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Reconciliation failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, Price, Size};

    fn local(id: &str, size: Decimal) -> OpenPosition {
        OpenPosition {
            order_id: OrderId::new(id),
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            size: Size::new(size),
            entry_price: Price::new(dec!(1.1)),
            opened_at: Utc::now(),
        }
    }

    fn remote(id: &str, size: Decimal) -> BrokerPosition {
        BrokerPosition {
            order_id: OrderId::new(id),
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            size: Size::new(size),
            open_level: Price::new(dec!(1.1)),
        }
    }

    #[test]
    fn test_matching_books_have_no_drift() {
        let drift = compare(
            &[local("A", dec!(1))],
            &[remote("A", dec!(1.00001))],
            &HashSet::new(),
            dec!(0.0001),
        );
        assert!(drift.is_empty());
    }

    #[test]
    fn test_each_drift_kind() {
        let drift = compare(
            &[local("A", dec!(1)), local("B", dec!(2))],
            &[remote("B", dec!(1)), remote("C", dec!(3))],
            &HashSet::new(),
            dec!(0.0001),
        );
        let kinds: Vec<_> = drift.iter().map(|d| (d.kind, d.order_id.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (DriftKind::MissingOnBroker, "A"),
                (DriftKind::SizeMismatch, "B"),
                (DriftKind::MissingLocally, "C"),
            ]
        );
    }

    #[test]
    fn test_in_flight_orders_are_not_drift() {
        let in_flight: HashSet<OrderId> = [OrderId::new("P")].into_iter().collect();
        let drift = compare(&[], &[remote("P", dec!(1))], &in_flight, dec!(0.0001));
        assert!(drift.is_empty());
    }
}
