//! Execution router actor.
//!
//! One task owns every piece of mutable trading state: orders, positions,
//! the cached account, the kill switch and the LIVE gate. Callers talk to it
//! through a cloneable [`RouterHandle`]; commands are processed strictly one
//! at a time, so a risk check and the order it admits can never interleave
//! with another intent.
//!
//! # Routing pipeline
//!
//! 1. Duplicate intent id (no ledger write)
//! 2. `IntentLogged`
//! 3. Allowlist, size, closing target
//! 4. Kill switch, LIVE gate, connection, circuit breaker
//! 5. Account freshness (at most one refresh)
//! 6. Risk checks (daily loss escalates to the kill switch)
//! 7. Armed (or DEMO with `demo_arm_enabled`)
//! 8. `OrderCreated`, `Created -> Pending`, submit under deadline
//!
//! Every order transition is written to the ledger before it is applied. A
//! fill or close appends all of its records before the order, the position
//! book or realized PnL change, so a failed ledger write leaves them as they
//! were.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use solat_core::{
    AccountInfo, BrokerPosition, Fill, Intent, OpenPosition, Order, OrderId, OrderStatus, Price,
    SharedClock, Size, TradingMode,
};
use solat_gate::{
    ConfirmLiveResult, ConfirmationStep, Gate, GateRejection, GateStatus, LiveStep, PreliveInputs,
    PreliveReport,
};
use solat_persistence::{LedgerEvent, LedgerSink, PositionSnapshot};
use solat_risk::{KillSwitch, KillSwitchReason, RiskContext, RiskEngine, RiskRejection};
use solat_telemetry::Metrics;

use crate::account::{AccountState, Freshness};
use crate::broker::{CloseAck, CloseRequest, DynBroker, OrderRequest, SubmitAck};
use crate::config::{ExecutionConfig, ModeFlags};
use crate::error::{BrokerError, BrokerResult, ExecutorError, ExecutorResult};
use crate::positions::PositionBook;
use crate::reconciliation::{compare, ReconciliationReport, ResolvedOrder};
use crate::retry::{retry_read, with_timeout, RetryPolicy};
use crate::safety::{CircuitBreaker, IdempotencyGuard};
use crate::status::{
    ArmResult, BrokerFill, ExecutionStatus, KillSwitchOutcome, Rejection, RejectionKind,
    RouteOutcome, SweepReport,
};

/// Reason recorded when reconciliation finds no trace of an unknown submit.
const NOT_FOUND_AFTER_TIMEOUT: &str = "not found at broker after submit timeout";

/// Trailing window for the trade-rate limit.
const RATE_WINDOW: chrono::Duration = chrono::Duration::hours(1);

// ============================================================================
// Messages
// ============================================================================

type Reply<T> = oneshot::Sender<T>;

/// Commands accepted by the router task.
pub enum RouterMsg {
    Connect {
        broker: DynBroker,
        reply: Reply<ExecutorResult<AccountInfo>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Arm {
        confirm: bool,
        live: bool,
        reply: Reply<ArmResult>,
    },
    Disarm {
        reply: Reply<()>,
    },
    RouteIntent {
        intent: Intent,
        reply: Reply<ExecutorResult<RouteOutcome>>,
    },
    BrokerFill {
        fill: BrokerFill,
        reply: Reply<ExecutorResult<()>>,
    },
    ClosePosition {
        order_id: OrderId,
        size: Option<Size>,
        reply: Reply<ExecutorResult<Fill>>,
    },
    ActivateKillSwitch {
        reason: KillSwitchReason,
        /// Overrides `close_on_kill_switch` when set.
        close_positions: Option<bool>,
        reply: Reply<ExecutorResult<KillSwitchOutcome>>,
    },
    ResetKillSwitch {
        reply: Reply<ExecutorResult<bool>>,
    },
    Reconcile {
        reply: Reply<ExecutorResult<ReconciliationReport>>,
    },
    RunPrelive {
        reply: Reply<PreliveReport>,
    },
    LiveStep {
        step: LiveStep,
        reply: Reply<Result<ConfirmationStep, GateRejection>>,
    },
    ConfirmLive {
        phrase: String,
        token: String,
        account_id: String,
        reply: Reply<ConfirmLiveResult>,
    },
    RevokeLive {
        reply: Reply<bool>,
    },
    GetGateStatus {
        reply: Reply<GateStatus>,
    },
    GetStatus {
        reply: Reply<ExecutionStatus>,
    },
    GetModeFlags {
        reply: Reply<ModeFlags>,
    },
    SetModeFlags {
        flags: ModeFlags,
        reply: Reply<()>,
    },
    GetAllowlist {
        reply: Reply<BTreeSet<String>>,
    },
    SetAllowlist {
        symbols: BTreeSet<String>,
        reply: Reply<()>,
    },
    FlushSnapshots {
        reply: Reply<ExecutorResult<usize>>,
    },
    Shutdown {
        reply: Reply<ExecutorResult<()>>,
    },
}

// ============================================================================
// ExecutionRouter
// ============================================================================

/// A close worked out ahead of its ledger records.
struct ClosePlan {
    target: OrderId,
    fill: Fill,
    /// `(from, to)` for the opening order when it is still tracked.
    target_transition: Option<(OrderStatus, OrderStatus)>,
}

pub struct ExecutionRouter {
    config: ExecutionConfig,
    kill_switch: KillSwitch,
    gate: Gate,
    risk: RiskEngine,
    ledger: Box<dyn LedgerSink>,
    clock: SharedClock,

    broker: Option<DynBroker>,
    mode: TradingMode,
    armed: bool,
    flags: ModeFlags,
    allowlist: BTreeSet<String>,

    orders: BTreeMap<OrderId, Order>,
    positions: PositionBook,
    account: AccountState,
    account_verified_at: Option<DateTime<Utc>>,
    realized_pnl_today: Decimal,
    pnl_day: NaiveDate,
    recent_trades: VecDeque<DateTime<Utc>>,

    idempotency: IdempotencyGuard,
    breaker: CircuitBreaker,
    last_reconciliation: Option<DateTime<Utc>>,
    last_error: Option<String>,
    finalized: bool,
}

impl ExecutionRouter {
    /// Build a router around an already restored kill switch.
    ///
    /// Taking a [`KillSwitch`] by value means the persisted state has been
    /// read before the router can exist.
    pub fn new(
        config: ExecutionConfig,
        kill_switch: KillSwitch,
        gate: Gate,
        risk: RiskEngine,
        ledger: Box<dyn LedgerSink>,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Metrics::kill_switch(kill_switch.is_active());
        if kill_switch.is_active() {
            warn!(
                reason = ?kill_switch.state().reason,
                "Router starting with kill switch ACTIVE"
            );
        }
        Self {
            mode: config.mode,
            flags: config.flags.clone(),
            allowlist: config.allowlist.clone(),
            idempotency: IdempotencyGuard::new(config.idempotency.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            config,
            kill_switch,
            gate,
            risk,
            ledger,
            clock,
            broker: None,
            armed: false,
            orders: BTreeMap::new(),
            positions: PositionBook::new(),
            account: AccountState::new(),
            account_verified_at: None,
            realized_pnl_today: Decimal::ZERO,
            pnl_day: now.date_naive(),
            recent_trades: VecDeque::new(),
            last_reconciliation: None,
            last_error: None,
            finalized: false,
        }
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<RouterMsg>) {
        info!(mode = %self.mode, "ExecutionRouter started");

        while let Some(msg) = rx.recv().await {
            if !self.handle_message(msg).await {
                break;
            }
        }

        if !self.finalized {
            if let Err(e) = self.shutdown() {
                error!(error = %e, "Ledger finalize failed on router exit");
            }
        }
        info!("ExecutionRouter stopped");
    }

    /// Returns `false` once the router should stop.
    async fn handle_message(&mut self, msg: RouterMsg) -> bool {
        match msg {
            RouterMsg::Connect { broker, reply } => {
                let _ = reply.send(self.connect(broker).await);
            }
            RouterMsg::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            RouterMsg::Arm {
                confirm,
                live,
                reply,
            } => {
                let _ = reply.send(self.arm(confirm, live));
            }
            RouterMsg::Disarm { reply } => {
                self.disarm();
                let _ = reply.send(());
            }
            RouterMsg::RouteIntent { intent, reply } => {
                let result = self.route_intent(intent).await;
                if let Ok(outcome) = &result {
                    Metrics::intent_outcome(outcome.label());
                }
                let _ = reply.send(result);
            }
            RouterMsg::BrokerFill { fill, reply } => {
                let _ = reply.send(self.on_broker_fill(fill).await);
            }
            RouterMsg::ClosePosition {
                order_id,
                size,
                reply,
            } => {
                let _ = reply.send(self.close_position(order_id, size).await);
            }
            RouterMsg::ActivateKillSwitch {
                reason,
                close_positions,
                reply,
            } => {
                let _ = reply.send(self.activate_kill_switch(reason, close_positions).await);
            }
            RouterMsg::ResetKillSwitch { reply } => {
                let _ = reply.send(self.reset_kill_switch());
            }
            RouterMsg::Reconcile { reply } => {
                let _ = reply.send(self.reconcile().await);
            }
            RouterMsg::RunPrelive { reply } => {
                let _ = reply.send(self.run_prelive().await);
            }
            RouterMsg::LiveStep { step, reply } => {
                let now = self.clock.now();
                let result = self.gate.advance(step, self.kill_switch.is_active(), now);
                let _ = reply.send(result);
            }
            RouterMsg::ConfirmLive {
                phrase,
                token,
                account_id,
                reply,
            } => {
                let now = self.clock.now();
                let result = self.gate.confirm_live(
                    &phrase,
                    &token,
                    &account_id,
                    self.kill_switch.is_active(),
                    now,
                );
                let _ = reply.send(result);
            }
            RouterMsg::RevokeLive { reply } => {
                let _ = reply.send(self.gate.revoke());
            }
            RouterMsg::GetGateStatus { reply } => {
                let _ = reply.send(self.gate_status());
            }
            RouterMsg::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
            RouterMsg::GetModeFlags { reply } => {
                let _ = reply.send(self.flags.clone());
            }
            RouterMsg::SetModeFlags { flags, reply } => {
                info!(
                    signals_enabled = flags.signals_enabled,
                    demo_arm_enabled = flags.demo_arm_enabled,
                    "Mode flags updated"
                );
                self.flags = flags;
                let _ = reply.send(());
            }
            RouterMsg::GetAllowlist { reply } => {
                let _ = reply.send(self.allowlist.clone());
            }
            RouterMsg::SetAllowlist { symbols, reply } => {
                info!(symbols = ?symbols, "Allowlist updated");
                self.allowlist = symbols;
                let _ = reply.send(());
            }
            RouterMsg::FlushSnapshots { reply } => {
                let result = self.ledger.flush_snapshots().map_err(ExecutorError::from);
                let _ = reply.send(result);
            }
            RouterMsg::Shutdown { reply } => {
                let _ = reply.send(self.shutdown());
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Connection and arming
    // ------------------------------------------------------------------------

    async fn connect(&mut self, broker: DynBroker) -> ExecutorResult<AccountInfo> {
        let limit = self.config.timeouts.read();
        let policy = self.config.read_retry.clone();
        let adapter = broker.as_ref();

        let info = retry_read("account", &policy, limit, || adapter.fetch_account()).await?;
        let now = self.clock.now();
        self.account.apply(info.clone(), now);
        self.account_verified_at = Some(now);

        if self.positions.is_empty() {
            let existing = retry_read("positions", &policy, limit, || adapter.fetch_positions()).await?;
            if !existing.is_empty() {
                warn!(count = existing.len(), "Adopting open broker positions at connect");
                for p in existing {
                    self.positions.open(OpenPosition {
                        order_id: p.order_id,
                        symbol: p.symbol,
                        direction: p.direction,
                        size: p.size,
                        entry_price: p.open_level,
                        opened_at: now,
                    });
                }
                self.record_snapshot(now)?;
                Metrics::open_positions(self.positions.len());
            }
        }

        info!(
            broker = broker.name(),
            account_id = %info.account_id,
            balance = %info.balance,
            "Connected to broker"
        );
        self.broker = Some(broker);
        Ok(info)
    }

    fn disconnect(&mut self) {
        if self.broker.take().is_some() {
            info!("Disconnected from broker");
        }
        self.armed = false;
    }

    fn arm(&mut self, confirm: bool, live: bool) -> ArmResult {
        let refuse = |mode, message: String| {
            warn!(reason = %message, "Arm refused");
            ArmResult {
                ok: false,
                message,
                mode,
            }
        };

        if self.config.require_arm_confirmation && !confirm {
            return refuse(self.mode, "Arming requires explicit confirmation".into());
        }
        if self.broker.is_none() {
            return refuse(self.mode, "Not connected to broker".into());
        }
        if self.kill_switch.is_active() {
            return refuse(self.mode, "Kill switch is active".into());
        }

        let target = if live {
            TradingMode::Live
        } else {
            TradingMode::Demo
        };
        if live {
            let status = self.gate_status_for(TradingMode::Live);
            if !status.allowed {
                return refuse(self.mode, format!("LIVE trading blocked: {}", status.reason()));
            }
        }

        self.mode = target;
        self.armed = true;
        info!(mode = %target, "Execution ARMED");
        ArmResult {
            ok: true,
            message: format!("Armed in {target} mode"),
            mode: target,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
        self.gate.revoke();
        self.mode = TradingMode::Demo;
        info!("Execution disarmed, LIVE confirmation revoked");
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    async fn route_intent(&mut self, intent: Intent) -> ExecutorResult<RouteOutcome> {
        let now = self.clock.now();
        self.roll_day(now);

        if let Some(age_s) = self.idempotency.check_and_register(intent.intent_id, now) {
            Metrics::rejection(RejectionKind::Duplicate.as_str());
            return Ok(RouteOutcome::Rejected(Rejection::new(
                RejectionKind::Duplicate,
                format!("Duplicate intent_id (seen {age_s}s ago)"),
            )));
        }

        self.append(LedgerEvent::IntentLogged {
            intent: intent.clone(),
        })?;
        debug!(
            intent_id = %intent.intent_id,
            symbol = %intent.symbol,
            direction = %intent.direction,
            size = %intent.size,
            source = %intent.bot_source,
            "Intent logged"
        );

        if let Some(rejection) = self.precheck(&intent, now) {
            return self.reject(&intent, rejection);
        }
        let Some(broker) = self.broker.clone() else {
            return self.reject(
                &intent,
                Rejection::new(RejectionKind::NotConnected, "Not connected to broker"),
            );
        };

        let limit = self.config.timeouts.read();
        match self
            .account
            .ensure_fresh(broker.as_ref(), &self.config.balance, limit, now)
            .await
        {
            Freshness::Fresh | Freshness::Refreshed => {}
            Freshness::StaleUsable { error, .. } => {
                self.last_error = Some(format!("Balance refresh failed: {error}"));
            }
            Freshness::TooStale { age_s, error } => {
                let ceiling = self.config.balance.hard_ceiling_s();
                let reason = match age_s {
                    Some(age) => format!(
                        "Account balance is {age}s old (limit {ceiling}s) and refresh failed: {error}"
                    ),
                    None => format!("Account balance unavailable and refresh failed: {error}"),
                };
                return self.reject(&intent, Rejection::new(RejectionKind::StaleAccount, reason));
            }
        }

        if let Some(rejection) = self.check_risk(&intent, now) {
            Metrics::risk_rejection(rejection.limit_name());
            if let RiskRejection::DailyLoss {
                loss_pct,
                limit_pct,
                ..
            } = &rejection
            {
                let reason = KillSwitchReason::DailyLossLimit {
                    loss_pct: *loss_pct,
                    limit_pct: *limit_pct,
                };
                self.activate_kill_switch(reason, None).await?;
            }
            return self.reject(&intent, Rejection::risk(rejection));
        }

        let may_trade = self.armed || (!self.mode.is_live() && self.flags.demo_arm_enabled);
        if !may_trade {
            return self.reject(
                &intent,
                Rejection::new(
                    RejectionKind::NotArmed,
                    "Router not armed; intent recorded only",
                ),
            );
        }

        self.submit(&intent, broker, now).await
    }

    /// Synchronous checks that need no broker round trip.
    fn precheck(&mut self, intent: &Intent, now: DateTime<Utc>) -> Option<Rejection> {
        if !self.allowlist.contains(&intent.symbol) {
            return Some(Rejection::new(
                RejectionKind::Allowlist,
                format!("SYMBOL_NOT_ALLOWLISTED: {}", intent.symbol),
            ));
        }
        if !intent.size.is_positive() {
            return Some(Rejection::new(
                RejectionKind::InvalidIntent,
                format!("Order size must be positive, got {}", intent.size),
            ));
        }
        if let Some(target) = &intent.closes {
            match self.positions.get(target) {
                None => {
                    return Some(Rejection::new(
                        RejectionKind::InvalidIntent,
                        format!("Closing intent targets unknown position {target}"),
                    ))
                }
                Some(p) if p.direction != intent.direction.opposite() => {
                    return Some(Rejection::new(
                        RejectionKind::InvalidIntent,
                        format!("Closing intent direction {} does not offset {target}", intent.direction),
                    ))
                }
                Some(_) => {}
            }
        }
        if self.kill_switch.is_active() {
            let reason = self
                .kill_switch
                .state()
                .reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unspecified".to_string());
            return Some(Rejection::new(
                RejectionKind::KillSwitch,
                format!("Kill switch active: {reason}"),
            ));
        }
        if self.mode.is_live() {
            let status = self.gate_status_for(TradingMode::Live);
            for warning in &status.warnings {
                warn!(warning = %warning, "LIVE gate warning");
            }
            if !status.allowed {
                return Some(Rejection::new(
                    RejectionKind::Gate,
                    format!("LIVE gate blocked: {}", status.reason()),
                ));
            }
        }
        if self.broker.is_none() {
            return Some(Rejection::new(
                RejectionKind::NotConnected,
                "Not connected to broker",
            ));
        }
        if let Some(remaining) = self.breaker.open_for(now) {
            return Some(Rejection::new(
                RejectionKind::CircuitBreaker,
                format!("Circuit breaker open after repeated broker errors ({remaining}s cooldown left)"),
            ));
        }
        None
    }

    fn check_risk(&mut self, intent: &Intent, now: DateTime<Utc>) -> Option<RiskRejection> {
        let cutoff = now - RATE_WINDOW;
        while self.recent_trades.front().is_some_and(|t| *t < cutoff) {
            self.recent_trades.pop_front();
        }

        // In-flight opening orders count as exposure until they settle.
        let mut exposure = self.positions.snapshot();
        exposure.extend(
            self.orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending && o.closes.is_none())
                .map(|o| OpenPosition {
                    order_id: o.order_id.clone(),
                    symbol: o.symbol.clone(),
                    direction: o.direction,
                    size: o.size,
                    entry_price: o.entry_price.unwrap_or(Price::UNIT),
                    opened_at: o.created_at,
                }),
        );
        let trades: Vec<DateTime<Utc>> = self.recent_trades.iter().copied().collect();

        let ctx = RiskContext {
            balance: self.account.balance,
            open_positions: &exposure,
            realized_pnl_today: self.realized_pnl_today,
            recent_trades: &trades,
            now,
        };
        self.risk.check(intent, &ctx).reason
    }

    fn reject(&mut self, intent: &Intent, rejection: Rejection) -> ExecutorResult<RouteOutcome> {
        info!(
            intent_id = %intent.intent_id,
            symbol = %intent.symbol,
            kind = %rejection.kind,
            reason = %rejection.reason,
            "Intent rejected"
        );
        Metrics::rejection(rejection.kind.as_str());
        self.append(LedgerEvent::IntentRejected {
            intent_id: intent.intent_id,
            kind: rejection.kind.as_str().to_string(),
            reason: rejection.reason.clone(),
        })?;
        Ok(RouteOutcome::Rejected(rejection))
    }

    async fn submit(
        &mut self,
        intent: &Intent,
        broker: DynBroker,
        now: DateTime<Utc>,
    ) -> ExecutorResult<RouteOutcome> {
        let order = Order::from_intent(intent, now);
        let order_id = order.order_id.clone();
        let request = OrderRequest::from(&order);

        self.append(LedgerEvent::OrderCreated {
            order: order.clone(),
        })?;
        self.orders.insert(order_id.clone(), order);

        match self.transition(&order_id, OrderStatus::Pending, None) {
            Ok(()) => {}
            Err(ExecutorError::KillSwitchActive) => {
                let reason = "Kill switch active at submission";
                self.transition(&order_id, OrderStatus::Rejected, Some(reason.to_string()))?;
                Metrics::rejection(RejectionKind::KillSwitch.as_str());
                return Ok(RouteOutcome::Rejected(Rejection::new(
                    RejectionKind::KillSwitch,
                    reason,
                )));
            }
            Err(e) => return Err(e),
        }

        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            direction = %request.direction,
            size = %request.size,
            mode = %self.mode,
            "Submitting order"
        );
        let result = with_timeout(
            "submit",
            self.config.timeouts.submit(),
            broker.submit_order(request),
        )
        .await;

        match result {
            Ok(SubmitAck::Filled { price, size }) => {
                self.breaker.record_success();
                let ts = self.clock.now();
                let fill = self.apply_fill(&order_id, price, size, ts).await?;
                Ok(RouteOutcome::Filled { order_id, fill })
            }
            Ok(SubmitAck::Working) => {
                self.breaker.record_success();
                debug!(order_id = %order_id, "Order working at broker");
                Ok(RouteOutcome::Submitted { order_id })
            }
            Ok(SubmitAck::Rejected { reason }) => {
                self.transition(&order_id, OrderStatus::Rejected, Some(reason.clone()))?;
                Metrics::rejection(RejectionKind::Broker.as_str());
                Ok(RouteOutcome::Rejected(Rejection::new(
                    RejectionKind::Broker,
                    format!("Broker rejected order: {reason}"),
                )))
            }
            Err(e) => self.mark_unknown(order_id, &e),
        }
    }

    /// Submit failed in a way that leaves the broker's view unknown.
    fn mark_unknown(&mut self, order_id: OrderId, e: &BrokerError) -> ExecutorResult<RouteOutcome> {
        let detail = e.to_string();
        let now = self.clock.now();
        self.breaker.record_error(&detail, now);
        self.last_error = Some(detail.clone());
        self.append(LedgerEvent::SubmissionUnknown {
            order_id: order_id.clone(),
            detail: detail.clone(),
        })?;
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.outcome_unknown = true;
        }
        error!(
            order_id = %order_id,
            error = %detail,
            "Submit outcome UNKNOWN; order stays pending until reconciliation"
        );
        Ok(RouteOutcome::Unknown { order_id, detail })
    }

    // ------------------------------------------------------------------------
    // Order state machine
    // ------------------------------------------------------------------------

    /// Ledger first, then apply.
    fn transition(
        &mut self,
        order_id: &OrderId,
        to: OrderStatus,
        reason: Option<String>,
    ) -> ExecutorResult<()> {
        let from = self.ensure_transition(order_id, to)?;
        self.append_transition(order_id, from, to, reason)?;
        self.apply_transition(order_id, to)
    }

    /// Check a transition without recording or applying it. Returns the
    /// current status.
    fn ensure_transition(&self, order_id: &OrderId, to: OrderStatus) -> ExecutorResult<OrderStatus> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| ExecutorError::UnknownOrder(order_id.clone()))?;
        if let Err(e) = order.check_transition(to) {
            error!(
                order_id = %order_id,
                from = %order.status,
                to = %to,
                "INVARIANT VIOLATION: illegal order transition"
            );
            return Err(e.into());
        }
        if to == OrderStatus::Pending && self.kill_switch.is_active() {
            warn!(order_id = %order_id, "Pending transition refused: kill switch active");
            return Err(ExecutorError::KillSwitchActive);
        }
        Ok(order.status)
    }

    fn append_transition(
        &mut self,
        order_id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    ) -> ExecutorResult<()> {
        self.append(LedgerEvent::OrderTransitioned {
            order_id: order_id.clone(),
            from,
            to,
            reason,
        })
        .map(|_| ())
    }

    /// Apply a recorded transition. Terminal orders leave the in-memory map;
    /// the ledger keeps their history.
    fn apply_transition(&mut self, order_id: &OrderId, to: OrderStatus) -> ExecutorResult<()> {
        let now = self.clock.now();
        if let Some(order) = self.orders.get_mut(order_id) {
            let from = order.apply_transition(to, now)?;
            debug!(order_id = %order_id, %from, %to, "Order transitioned");
        }
        if to.is_terminal() {
            self.orders.remove(order_id);
        }
        Ok(())
    }

    /// Settle a pending order as filled.
    ///
    /// Every ledger record of the fill is appended before the order, the
    /// position book or realized PnL change.
    async fn apply_fill(
        &mut self,
        order_id: &OrderId,
        price: Price,
        size: Size,
        ts: DateTime<Utc>,
    ) -> ExecutorResult<Fill> {
        let order = self
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownOrder(order_id.clone()))?;
        let from = self.ensure_transition(order_id, OrderStatus::Filled)?;

        let fill = match &order.closes {
            Some(target) => {
                let plan = self.plan_close(target, order_id.clone(), price, size, ts)?;
                self.append_transition(order_id, from, OrderStatus::Filled, None)?;
                self.record_close(&plan)?;
                self.mark_filled(order_id, price)?;
                // A closing order owns no position once filled.
                self.orders.remove(order_id);
                self.apply_close(plan)?
            }
            None => {
                let fill = Fill {
                    order_id: order_id.clone(),
                    price,
                    size,
                    ts,
                    is_close: false,
                    pnl: None,
                };
                self.append_transition(order_id, from, OrderStatus::Filled, None)?;
                self.append(LedgerEvent::FillRecorded { fill: fill.clone() })?;
                self.mark_filled(order_id, price)?;
                self.positions.open(OpenPosition {
                    order_id: order_id.clone(),
                    symbol: order.symbol.clone(),
                    direction: order.direction,
                    size,
                    entry_price: price,
                    opened_at: ts,
                });
                info!(order_id = %order_id, symbol = %order.symbol, %price, %size, "Order filled");
                fill
            }
        };

        self.recent_trades.push_back(ts);
        Metrics::open_positions(self.positions.len());

        if self.account.record_fill(&self.config.balance) {
            self.refresh_account("fill count").await;
        }
        Ok(fill)
    }

    fn mark_filled(&mut self, order_id: &OrderId, price: Price) -> ExecutorResult<()> {
        self.apply_transition(order_id, OrderStatus::Filled)?;
        if let Some(order) = self.orders.get_mut(order_id) {
            order.fill_price = Some(price);
            order.outcome_unknown = false;
        }
        Ok(())
    }

    /// Book a close of `target` outside an order fill (operator close or
    /// kill-switch sweep).
    fn settle_close(
        &mut self,
        target: &OrderId,
        fill_order_id: OrderId,
        price: Price,
        size: Size,
        ts: DateTime<Utc>,
    ) -> ExecutorResult<Fill> {
        let plan = self.plan_close(target, fill_order_id, price, size, ts)?;
        self.record_close(&plan)?;
        self.apply_close(plan)
    }

    /// Work out a close of `target` without touching any state.
    fn plan_close(
        &self,
        target: &OrderId,
        fill_order_id: OrderId,
        price: Price,
        size: Size,
        ts: DateTime<Utc>,
    ) -> ExecutorResult<ClosePlan> {
        let Some(position) = self.positions.get(target) else {
            warn!(target = %target, "Close fill for a position no longer tracked");
            return Ok(ClosePlan {
                target: target.clone(),
                fill: Fill {
                    order_id: fill_order_id,
                    price,
                    size,
                    ts,
                    is_close: true,
                    pnl: None,
                },
                target_transition: None,
            });
        };

        let closed = size.min(position.size);
        let pnl = position.pnl_at(price, closed);
        let target_transition = if self.orders.contains_key(target) {
            let to = if closed >= position.size {
                OrderStatus::Closed
            } else {
                OrderStatus::PartiallyClosed
            };
            Some((self.ensure_transition(target, to)?, to))
        } else {
            None
        };
        Ok(ClosePlan {
            target: target.clone(),
            fill: Fill {
                order_id: fill_order_id,
                price,
                size: closed,
                ts,
                is_close: true,
                pnl: Some(pnl),
            },
            target_transition,
        })
    }

    fn record_close(&mut self, plan: &ClosePlan) -> ExecutorResult<()> {
        self.append(LedgerEvent::FillRecorded {
            fill: plan.fill.clone(),
        })?;
        if let Some((from, to)) = plan.target_transition {
            let reason = format!("closed {} at {}", plan.fill.size, plan.fill.price);
            self.append_transition(&plan.target, from, to, Some(reason))?;
        }
        Ok(())
    }

    fn apply_close(&mut self, plan: ClosePlan) -> ExecutorResult<Fill> {
        let Some(pnl) = plan.fill.pnl else {
            return Ok(plan.fill);
        };
        let closed = self.positions.reduce(&plan.target, plan.fill.size);
        self.realized_pnl_today += pnl;
        if let Some((_, to)) = plan.target_transition {
            self.apply_transition(&plan.target, to)?;
            if let Some(order) = self.orders.get_mut(&plan.target) {
                order.closed_size = order.closed_size + closed;
            }
        }

        Metrics::open_positions(self.positions.len());
        info!(
            position = %plan.target,
            price = %plan.fill.price,
            size = %closed,
            pnl = %pnl,
            realized_today = %self.realized_pnl_today,
            "Position reduced"
        );
        Ok(plan.fill)
    }

    async fn refresh_account(&mut self, trigger: &'static str) {
        let Some(broker) = self.broker.clone() else {
            return;
        };
        let now = self.clock.now();
        let limit = self.config.timeouts.read();
        match self.account.refresh(broker.as_ref(), limit, now).await {
            Ok(()) => {
                self.account_verified_at = Some(now);
                debug!(trigger, balance = %self.account.balance, "Balance refreshed");
            }
            Err(e) => warn!(trigger, error = %e, "Balance refresh failed"),
        }
    }

    async fn on_broker_fill(&mut self, fill: BrokerFill) -> ExecutorResult<()> {
        let Some(order) = self.orders.get(&fill.order_id) else {
            warn!(order_id = %fill.order_id, "Fill for unknown or settled order ignored");
            return Err(ExecutorError::UnknownOrder(fill.order_id));
        };
        if order.status != OrderStatus::Pending {
            debug!(order_id = %fill.order_id, status = %order.status, "Late or duplicate fill ignored");
            return Ok(());
        }
        self.apply_fill(&fill.order_id, fill.price, fill.size, fill.ts)
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------------

    async fn close_position(&mut self, order_id: OrderId, size: Option<Size>) -> ExecutorResult<Fill> {
        let broker = self.broker.clone().ok_or(ExecutorError::NotConnected)?;
        let position = self
            .positions
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownOrder(order_id.clone()))?;
        let request = CloseRequest {
            order_id: order_id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            size: size.unwrap_or(position.size).min(position.size),
        };
        info!(order_id = %order_id, size = %request.size, "Closing position");
        let ack = with_timeout(
            "close",
            self.config.timeouts.read(),
            broker.close_position(request),
        )
        .await?;
        let now = self.clock.now();
        self.settle_close(&order_id, order_id.clone(), ack.price, ack.size, now)
    }

    // ------------------------------------------------------------------------
    // Kill switch
    // ------------------------------------------------------------------------

    async fn activate_kill_switch(
        &mut self,
        reason: KillSwitchReason,
        close_positions: Option<bool>,
    ) -> ExecutorResult<KillSwitchOutcome> {
        let now = self.clock.now();
        let text = reason.to_string();

        // Durable before anything reports it as active.
        let activated = self.kill_switch.activate(reason, now)?;
        Metrics::kill_switch(true);
        self.armed = false;

        if activated
            && self
                .append(LedgerEvent::KillSwitchChanged {
                    active: true,
                    reason: Some(text),
                })
                .is_err()
        {
            warn!("Kill switch is active and persisted, but its ledger entry was not written");
        }

        let sweep = if close_positions.unwrap_or(self.config.close_on_kill_switch) {
            Some(self.sweep_positions().await)
        } else {
            None
        };

        Ok(KillSwitchOutcome {
            activated,
            state: self.kill_switch.state().clone(),
            sweep,
        })
    }

    fn reset_kill_switch(&mut self) -> ExecutorResult<bool> {
        let now = self.clock.now();
        let changed = self.kill_switch.reset(now)?;
        if changed {
            Metrics::kill_switch(false);
            if self
                .append(LedgerEvent::KillSwitchChanged {
                    active: false,
                    reason: None,
                })
                .is_err()
            {
                warn!("Kill switch reset persisted, but its ledger entry was not written");
            }
        }
        Ok(changed)
    }

    /// Close every open position concurrently, each with bounded retries.
    async fn sweep_positions(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.positions.is_empty() {
            return report;
        }

        if let Some(broker) = self.broker.clone() {
            let policy = self.config.sweep.as_retry();
            let limit = self.config.timeouts.read();
            let mut tasks = JoinSet::new();
            for p in self.positions.iter() {
                let request = CloseRequest {
                    order_id: p.order_id.clone(),
                    symbol: p.symbol.clone(),
                    direction: p.direction,
                    size: p.size,
                };
                tasks.spawn(close_with_retry(broker.clone(), request, policy.clone(), limit));
            }
            info!(count = tasks.len(), "Closing all positions after kill switch");

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((request, Ok(ack))) => {
                        let now = self.clock.now();
                        let id = request.order_id;
                        match self.settle_close(&id, id.clone(), ack.price, ack.size, now) {
                            Ok(_) if self.positions.get(&id).is_none() => report.closed.push(id),
                            Ok(_) => {}
                            Err(e) => error!(order_id = %id, error = %e, "Close executed but not recorded"),
                        }
                    }
                    Ok((request, Err(e))) => {
                        error!(order_id = %request.order_id, error = %e, "Close attempts exhausted");
                    }
                    Err(e) => error!(error = %e, "Close task aborted"),
                }
            }
        }

        report.left_open = self.positions.iter().map(|p| p.order_id.clone()).collect();
        for id in &report.left_open {
            error!(order_id = %id, "Position LEFT OPEN after kill switch sweep; manual action required");
        }
        report
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    async fn reconcile(&mut self) -> ExecutorResult<ReconciliationReport> {
        let broker = self.broker.clone().ok_or(ExecutorError::NotConnected)?;
        let adapter = broker.as_ref();
        let broker_positions = retry_read(
            "positions",
            &self.config.read_retry,
            self.config.timeouts.read(),
            || adapter.fetch_positions(),
        )
        .await?;

        let resolved = self.resolve_unknown(&broker_positions).await?;

        let now = self.clock.now();
        let in_flight: HashSet<OrderId> = self
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .map(|o| o.order_id.clone())
            .collect();
        let local = self.positions.snapshot();
        let drift = compare(
            &local,
            &broker_positions,
            &in_flight,
            self.config.reconcile.size_tolerance,
        );
        self.record_snapshot(now)?;

        let mut kill_switch_triggered = false;
        if !drift.is_empty() {
            Metrics::reconciliation_drift();
            for d in &drift {
                warn!(
                    kind = ?d.kind,
                    order_id = %d.order_id,
                    symbol = %d.symbol,
                    local_size = ?d.local_size,
                    broker_size = ?d.broker_size,
                    "Position drift"
                );
            }
            self.append(LedgerEvent::ReconciliationDrift {
                drift: drift.clone(),
            })?;

            let tolerance = self.config.reconcile.drift_tolerance;
            if self.config.reconcile.kill_on_drift && drift.len() > tolerance {
                let outcome = self
                    .activate_kill_switch(
                        KillSwitchReason::ReconciliationDrift {
                            drifted: drift.len(),
                            tolerance,
                        },
                        None,
                    )
                    .await?;
                kill_switch_triggered = outcome.activated;
            }
        }

        self.last_reconciliation = Some(now);
        Ok(ReconciliationReport {
            ran_at: now,
            local_count: local.len(),
            broker_count: broker_positions.len(),
            drift,
            resolved_unknown: resolved,
            kill_switch_triggered,
        })
    }

    /// Settle orders whose submit outcome was unknown using broker truth.
    async fn resolve_unknown(
        &mut self,
        broker_positions: &[BrokerPosition],
    ) -> ExecutorResult<Vec<ResolvedOrder>> {
        let unknown: Vec<Order> = self
            .orders
            .values()
            .filter(|o| o.outcome_unknown && o.status == OrderStatus::Pending)
            .cloned()
            .collect();

        let mut resolved = Vec::with_capacity(unknown.len());
        for order in unknown {
            let now = self.clock.now();
            let executed = match &order.closes {
                None => broker_positions
                    .iter()
                    .find(|p| p.order_id == order.order_id)
                    .map(|p| (p.open_level, p.size)),
                Some(target) => {
                    let remote = broker_positions
                        .iter()
                        .find(|p| &p.order_id == target)
                        .map_or(Size::ZERO, |p| p.size);
                    self.positions
                        .get(target)
                        .filter(|local| remote < local.size)
                        .map(|local| {
                            let price = order.entry_price.unwrap_or(local.entry_price);
                            (price, local.size - remote)
                        })
                }
            };

            let status = match executed {
                Some((price, size)) => {
                    self.apply_fill(&order.order_id, price, size, now).await?;
                    OrderStatus::Filled
                }
                None => {
                    self.transition(
                        &order.order_id,
                        OrderStatus::Rejected,
                        Some(NOT_FOUND_AFTER_TIMEOUT.to_string()),
                    )?;
                    OrderStatus::Rejected
                }
            };
            info!(order_id = %order.order_id, %status, "Unknown submit outcome resolved");
            resolved.push(ResolvedOrder {
                order_id: order.order_id,
                status,
            });
        }
        Ok(resolved)
    }

    // ------------------------------------------------------------------------
    // Gate and status
    // ------------------------------------------------------------------------

    async fn run_prelive(&mut self) -> PreliveReport {
        let broker_account = match self.broker.clone() {
            None => Err("Not connected to broker".to_string()),
            Some(broker) => with_timeout("account", self.config.timeouts.read(), broker.fetch_account())
                .await
                .map_err(|e| e.to_string()),
        };
        let now = self.clock.now();
        if let Ok(info) = &broker_account {
            self.account.apply(info.clone(), now);
            self.account_verified_at = Some(now);
        }
        let inputs = PreliveInputs {
            broker_account,
            kill_switch_active: self.kill_switch.is_active(),
        };
        self.gate.record_prelive(&inputs, now)
    }

    fn gate_status(&self) -> GateStatus {
        self.gate_status_for(self.mode)
    }

    fn gate_status_for(&self, mode: TradingMode) -> GateStatus {
        self.gate.evaluate(
            mode,
            self.kill_switch.is_active(),
            self.account_verified_at,
            self.clock.now(),
        )
    }

    fn status(&self) -> ExecutionStatus {
        let now = self.clock.now();
        ExecutionStatus {
            connected: self.broker.is_some(),
            broker: self.broker.as_ref().map(|b| b.name().to_string()),
            armed: self.armed,
            mode: self.mode,
            kill_switch_active: self.kill_switch.is_active(),
            kill_switch_reason: self
                .kill_switch
                .state()
                .reason
                .as_ref()
                .map(ToString::to_string),
            open_positions: self.positions.len(),
            pending_orders: self
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending)
                .count(),
            unknown_orders: self.orders.values().filter(|o| o.outcome_unknown).count(),
            tracked_orders: self.orders.len(),
            realized_pnl_today: self.realized_pnl_today,
            account_id: self.account.account_id.clone(),
            balance: self.account.balance,
            balance_age_s: self.account.age_s(now),
            signals_enabled: self.flags.signals_enabled,
            demo_arm_enabled: self.flags.demo_arm_enabled,
            circuit_breaker_open: self.breaker.is_open(),
            buffered_snapshots: self.ledger.buffered_snapshots(),
            last_reconciliation: self.last_reconciliation,
            last_error: self.last_error.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------------

    fn append(&mut self, event: LedgerEvent) -> ExecutorResult<u64> {
        let kind = event.kind();
        match self.ledger.append(event) {
            Ok(seq) => Ok(seq),
            Err(e) => {
                Metrics::ledger_append_failure();
                error!(event = kind, error = %e, "Ledger append FAILED; operation aborted");
                self.last_error = Some(format!("Ledger append failed: {e}"));
                Err(e.into())
            }
        }
    }

    fn record_snapshot(&mut self, now: DateTime<Utc>) -> ExecutorResult<()> {
        let snapshot = PositionSnapshot {
            ts: now,
            positions: self.positions.snapshot(),
        };
        self.ledger.record_snapshot(snapshot).map_err(|e| {
            Metrics::ledger_append_failure();
            error!(error = %e, "Snapshot append failed");
            ExecutorError::from(e)
        })
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.pnl_day {
            info!(
                previous = %self.pnl_day,
                realized = %self.realized_pnl_today,
                "New trading day, daily PnL reset"
            );
            self.pnl_day = today;
            self.realized_pnl_today = Decimal::ZERO;
        }
    }

    fn shutdown(&mut self) -> ExecutorResult<()> {
        info!("ExecutionRouter shutting down");
        self.armed = false;
        self.finalized = true;
        self.ledger.finalize()?;
        Ok(())
    }
}

async fn close_with_retry(
    broker: DynBroker,
    request: CloseRequest,
    policy: RetryPolicy,
    limit: Duration,
) -> (CloseRequest, BrokerResult<CloseAck>) {
    let attempts = policy.attempts();
    let mut last = BrokerError::Unavailable("no close attempt made".to_string());
    for attempt in 1..=attempts {
        match with_timeout("close", limit, broker.close_position(request.clone())).await {
            Ok(ack) => return (request, Ok(ack)),
            Err(e) => {
                warn!(order_id = %request.order_id, attempt, error = %e, "Close attempt failed");
                last = e;
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff_delay(attempt)).await;
                }
            }
        }
    }
    (request, Err(last))
}

// ============================================================================
// RouterHandle
// ============================================================================

/// Cloneable handle to the router task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterMsg>,
}

impl RouterHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> RouterMsg) -> ExecutorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ExecutorError::RouterClosed)?;
        rx.await.map_err(|_| ExecutorError::RouterClosed)
    }

    pub async fn connect(&self, broker: DynBroker) -> ExecutorResult<AccountInfo> {
        self.request(|reply| RouterMsg::Connect { broker, reply })
            .await?
    }

    pub async fn disconnect(&self) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::Disconnect { reply }).await
    }

    pub async fn arm(&self, confirm: bool, live: bool) -> ExecutorResult<ArmResult> {
        self.request(|reply| RouterMsg::Arm {
            confirm,
            live,
            reply,
        })
        .await
    }

    /// Disarm and revoke any LIVE confirmation.
    pub async fn disarm(&self) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::Disarm { reply }).await
    }

    pub async fn route_intent(&self, intent: Intent) -> ExecutorResult<RouteOutcome> {
        self.request(|reply| RouterMsg::RouteIntent { intent, reply })
            .await?
    }

    pub async fn on_broker_fill(&self, fill: BrokerFill) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::BrokerFill { fill, reply })
            .await?
    }

    /// Close all (`size = None`) or part of a position directly at the broker.
    pub async fn close_position(&self, order_id: OrderId, size: Option<Size>) -> ExecutorResult<Fill> {
        self.request(|reply| RouterMsg::ClosePosition {
            order_id,
            size,
            reply,
        })
        .await?
    }

    pub async fn activate_kill_switch(
        &self,
        reason: KillSwitchReason,
        close_positions: Option<bool>,
    ) -> ExecutorResult<KillSwitchOutcome> {
        self.request(|reply| RouterMsg::ActivateKillSwitch {
            reason,
            close_positions,
            reply,
        })
        .await?
    }

    /// Clear the kill switch. Does not re-arm.
    pub async fn reset_kill_switch(&self) -> ExecutorResult<bool> {
        self.request(|reply| RouterMsg::ResetKillSwitch { reply })
            .await?
    }

    pub async fn reconcile(&self) -> ExecutorResult<ReconciliationReport> {
        self.request(|reply| RouterMsg::Reconcile { reply }).await?
    }

    pub async fn run_prelive_check(&self) -> ExecutorResult<PreliveReport> {
        self.request(|reply| RouterMsg::RunPrelive { reply }).await
    }

    pub async fn live_step(
        &self,
        step: LiveStep,
    ) -> ExecutorResult<Result<ConfirmationStep, GateRejection>> {
        self.request(|reply| RouterMsg::LiveStep { step, reply }).await
    }

    pub async fn confirm_live(
        &self,
        phrase: impl Into<String>,
        token: impl Into<String>,
        account_id: impl Into<String>,
    ) -> ExecutorResult<ConfirmLiveResult> {
        let (phrase, token, account_id) = (phrase.into(), token.into(), account_id.into());
        self.request(|reply| RouterMsg::ConfirmLive {
            phrase,
            token,
            account_id,
            reply,
        })
        .await
    }

    /// Revoke LIVE confirmation without changing mode or arming.
    pub async fn revoke_live(&self) -> ExecutorResult<bool> {
        self.request(|reply| RouterMsg::RevokeLive { reply }).await
    }

    pub async fn gate_status(&self) -> ExecutorResult<GateStatus> {
        self.request(|reply| RouterMsg::GetGateStatus { reply }).await
    }

    pub async fn status(&self) -> ExecutorResult<ExecutionStatus> {
        self.request(|reply| RouterMsg::GetStatus { reply }).await
    }

    pub async fn mode_flags(&self) -> ExecutorResult<ModeFlags> {
        self.request(|reply| RouterMsg::GetModeFlags { reply }).await
    }

    pub async fn set_mode_flags(&self, flags: ModeFlags) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::SetModeFlags { flags, reply })
            .await
    }

    pub async fn allowlist(&self) -> ExecutorResult<BTreeSet<String>> {
        self.request(|reply| RouterMsg::GetAllowlist { reply }).await
    }

    pub async fn set_allowlist(&self, symbols: BTreeSet<String>) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::SetAllowlist { symbols, reply })
            .await
    }

    pub async fn flush_snapshots(&self) -> ExecutorResult<usize> {
        self.request(|reply| RouterMsg::FlushSnapshots { reply })
            .await?
    }

    /// Finalize the ledger and stop the task.
    pub async fn shutdown(&self) -> ExecutorResult<()> {
        self.request(|reply| RouterMsg::Shutdown { reply }).await?
    }
}

/// Spawn the router task.
#[must_use]
pub fn spawn_router(router: ExecutionRouter) -> (RouterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(router.config.channel_capacity.max(1));
    let join_handle = tokio::spawn(router.run(rx));
    (RouterHandle { tx }, join_handle)
}

// ============================================================================
// Tests
// ============================================================================
