//! In-process paper broker.
//!
//! Fills at the intent's reference price (or the symbol mark, or a unit
//! price) and keeps positions and balance in memory. Failure behaviour is
//! scriptable so the router's timeout, retry and drift paths can be driven
//! deterministically.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use solat_core::{AccountInfo, BrokerPosition, OrderId, Price, Size};

use crate::broker::{BoxFuture, BrokerAdapter, CloseAck, CloseRequest, OrderRequest, SubmitAck};
use crate::error::{BrokerError, BrokerResult};
use crate::status::BrokerFill;

/// How long a simulated hang lasts. Always longer than any sane deadline.
const HANG: Duration = Duration::from_secs(3_600);

/// What the next submits do.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmitBehavior {
    #[default]
    Fill,
    /// Accept and leave working until [`PaperBroker::fill_working`].
    Work,
    Reject(String),
    /// Transport error; the broker never saw the order.
    Fail(String),
    /// The broker opens the position, then the response never arrives.
    TimeoutWithPosition,
    /// The request is lost and the response never arrives.
    TimeoutLost,
}

#[derive(Debug)]
struct PaperState {
    account: AccountInfo,
    positions: BTreeMap<OrderId, BrokerPosition>,
    working: BTreeMap<OrderId, OrderRequest>,
    marks: HashMap<String, Price>,
    submit_behavior: SubmitBehavior,
    account_failure: Option<String>,
    account_delay: Option<Duration>,
    failing_closes: u32,
    submissions: Vec<OrderRequest>,
    account_fetches: u32,
    close_calls: u32,
}

#[derive(Debug)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new("PAPER-001", Decimal::from(10_000))
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new(account_id: impl Into<String>, balance: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                account: AccountInfo {
                    account_id: account_id.into(),
                    balance,
                    available: balance,
                    currency: "USD".to_string(),
                    is_live: false,
                },
                positions: BTreeMap::new(),
                working: BTreeMap::new(),
                marks: HashMap::new(),
                submit_behavior: SubmitBehavior::Fill,
                account_failure: None,
                account_delay: None,
                failing_closes: 0,
                submissions: Vec::new(),
                account_fetches: 0,
                close_calls: 0,
            }),
        }
    }

    // === Scripting ===

    pub fn set_submit_behavior(&self, behavior: SubmitBehavior) {
        self.state.lock().submit_behavior = behavior;
    }

    pub fn set_mark(&self, symbol: impl Into<String>, price: Price) {
        self.state.lock().marks.insert(symbol.into(), price);
    }

    /// Make account fetches fail until cleared with `None`.
    pub fn set_account_failure(&self, failure: Option<String>) {
        self.state.lock().account_failure = failure;
    }

    /// Delay every account fetch.
    pub fn set_account_delay(&self, delay: Option<Duration>) {
        self.state.lock().account_delay = delay;
    }

    pub fn set_balance(&self, balance: Decimal) {
        let mut state = self.state.lock();
        state.account.balance = balance;
        state.account.available = balance;
    }

    /// Fail the next `n` close calls with a transport error.
    pub fn fail_next_closes(&self, n: u32) {
        self.state.lock().failing_closes = n;
    }

    /// Open a position the router never asked for.
    pub fn inject_position(&self, position: BrokerPosition) {
        self.state
            .lock()
            .positions
            .insert(position.order_id.clone(), position);
    }

    /// Drop a position behind the router's back.
    pub fn remove_position(&self, order_id: &OrderId) -> Option<BrokerPosition> {
        self.state.lock().positions.remove(order_id)
    }

    /// Execute a working order, returning the fill the broker would report.
    pub fn fill_working(&self, order_id: &OrderId, price: Price) -> Option<BrokerFill> {
        let mut state = self.state.lock();
        let request = state.working.remove(order_id)?;
        state.positions.insert(
            request.order_id.clone(),
            BrokerPosition {
                order_id: request.order_id.clone(),
                symbol: request.symbol.clone(),
                direction: request.direction,
                size: request.size,
                open_level: price,
            },
        );
        Some(BrokerFill {
            order_id: request.order_id,
            price,
            size: request.size,
            ts: Utc::now(),
        })
    }

    // === Inspection ===

    #[must_use]
    pub fn positions(&self) -> Vec<BrokerPosition> {
        self.state.lock().positions.values().cloned().collect()
    }

    #[must_use]
    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.state.lock().submissions.clone()
    }

    #[must_use]
    pub fn account_fetches(&self) -> u32 {
        self.state.lock().account_fetches
    }

    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.state.lock().account.balance
    }

    // === Simulation ===

    fn fill_price(state: &PaperState, request: &OrderRequest) -> Price {
        request
            .reference_price
            .or_else(|| state.marks.get(&request.symbol).copied())
            .unwrap_or(Price::UNIT)
    }

    /// Apply an executed order to positions and balance.
    fn execute(state: &mut PaperState, request: &OrderRequest, price: Price) {
        match &request.closes {
            Some(target) => {
                Self::reduce(state, target, request.size, price);
            }
            None => {
                state.positions.insert(
                    request.order_id.clone(),
                    BrokerPosition {
                        order_id: request.order_id.clone(),
                        symbol: request.symbol.clone(),
                        direction: request.direction,
                        size: request.size,
                        open_level: price,
                    },
                );
            }
        }
    }

    /// Reduce a position, booking PnL to the balance. Returns the size closed.
    fn reduce(state: &mut PaperState, target: &OrderId, size: Size, price: Price) -> Size {
        let Some(position) = state.positions.get_mut(target) else {
            return Size::ZERO;
        };
        let closed = size.min(position.size);
        let pnl = (price.inner() - position.open_level.inner())
            * closed.inner()
            * position.direction.sign();
        position.size = position.size.saturating_sub(closed);
        if position.size.is_zero() {
            state.positions.remove(target);
        }
        state.account.balance += pnl;
        state.account.available += pnl;
        closed
    }

    fn submit_now(&self, request: OrderRequest) -> (SubmitBehavior, BrokerResult<SubmitAck>) {
        let mut state = self.state.lock();
        state.submissions.push(request.clone());
        let behavior = state.submit_behavior.clone();
        let price = Self::fill_price(&state, &request);
        let result = match &behavior {
            SubmitBehavior::Fill => {
                Self::execute(&mut state, &request, price);
                debug!(order_id = %request.order_id, %price, "Paper fill");
                Ok(SubmitAck::Filled {
                    price,
                    size: request.size,
                })
            }
            SubmitBehavior::Work => {
                state.working.insert(request.order_id.clone(), request);
                Ok(SubmitAck::Working)
            }
            SubmitBehavior::Reject(reason) => Ok(SubmitAck::Rejected {
                reason: reason.clone(),
            }),
            SubmitBehavior::Fail(detail) => Err(BrokerError::Unavailable(detail.clone())),
            SubmitBehavior::TimeoutWithPosition => {
                Self::execute(&mut state, &request, price);
                Ok(SubmitAck::Filled {
                    price,
                    size: request.size,
                })
            }
            SubmitBehavior::TimeoutLost => Ok(SubmitAck::Working),
        };
        (behavior, result)
    }
}

impl BrokerAdapter for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    fn fetch_account(&self) -> BoxFuture<'_, BrokerResult<AccountInfo>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state.lock();
                state.account_fetches += 1;
                state.account_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let state = self.state.lock();
            match &state.account_failure {
                Some(failure) => Err(BrokerError::Unavailable(failure.clone())),
                None => Ok(state.account.clone()),
            }
        })
    }

    fn fetch_positions(&self) -> BoxFuture<'_, BrokerResult<Vec<BrokerPosition>>> {
        Box::pin(async move { Ok(self.positions()) })
    }

    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<SubmitAck>> {
        Box::pin(async move {
            let (behavior, result) = self.submit_now(request);
            if matches!(
                behavior,
                SubmitBehavior::TimeoutWithPosition | SubmitBehavior::TimeoutLost
            ) {
                tokio::time::sleep(HANG).await;
            }
            result
        })
    }

    fn close_position(&self, request: CloseRequest) -> BoxFuture<'_, BrokerResult<CloseAck>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.close_calls += 1;
            if state.failing_closes > 0 {
                state.failing_closes -= 1;
                return Err(BrokerError::Unavailable("close rejected by paper broker".into()));
            }
            let Some(position) = state.positions.get(&request.order_id) else {
                return Err(BrokerError::Api(format!(
                    "position {} not found",
                    request.order_id
                )));
            };
            let price = state
                .marks
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.open_level);
            let closed = Self::reduce(&mut state, &request.order_id, request.size, price);
            info!(order_id = %request.order_id, %price, size = %closed, "Paper close");
            Ok(CloseAck {
                price,
                size: closed,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::Direction;

    fn request(id: &str, price: Decimal) -> OrderRequest {
        OrderRequest {
            order_id: OrderId::new(id),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            size: Size::new(dec!(2)),
            reference_price: Some(Price::new(price)),
            stop_loss: None,
            take_profit: None,
            closes: None,
        }
    }

    #[tokio::test]
    async fn test_fill_then_close_books_pnl() {
        let broker = PaperBroker::default();
        let ack = broker.submit_order(request("A", dec!(100))).await.unwrap();
        assert_eq!(
            ack,
            SubmitAck::Filled {
                price: Price::new(dec!(100)),
                size: Size::new(dec!(2))
            }
        );
        broker.set_mark("EURUSD", Price::new(dec!(90)));
        let close = broker
            .close_position(CloseRequest {
                order_id: OrderId::new("A"),
                symbol: "EURUSD".into(),
                direction: Direction::Buy,
                size: Size::new(dec!(2)),
            })
            .await
            .unwrap();
        assert_eq!(close.size, Size::new(dec!(2)));
        assert_eq!(broker.balance(), dec!(9980));
        assert!(broker.positions().is_empty());
    }

    #[tokio::test]
    async fn test_working_order_fills_on_demand() {
        let broker = PaperBroker::default();
        broker.set_submit_behavior(SubmitBehavior::Work);
        let ack = broker.submit_order(request("W", dec!(1.1))).await.unwrap();
        assert_eq!(ack, SubmitAck::Working);
        assert!(broker.positions().is_empty());

        let fill = broker
            .fill_working(&OrderId::new("W"), Price::new(dec!(1.2)))
            .unwrap();
        assert_eq!(fill.size, Size::new(dec!(2)));
        assert_eq!(broker.positions().len(), 1);
        assert!(broker.fill_working(&OrderId::new("W"), Price::new(dec!(1.2))).is_none());
    }

    #[tokio::test]
    async fn test_failing_closes_count_down() {
        let broker = PaperBroker::default();
        broker.submit_order(request("A", dec!(1))).await.unwrap();
        broker.fail_next_closes(1);
        let close = CloseRequest {
            order_id: OrderId::new("A"),
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            size: Size::new(dec!(2)),
        };
        assert!(broker.close_position(close.clone()).await.is_err());
        assert!(broker.close_position(close).await.is_ok());
        assert_eq!(broker.close_calls(), 2);
    }
}
