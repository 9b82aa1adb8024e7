//! Application wiring and startup sequencing.
//!
//! Startup order matters:
//! 1. Validate configuration (LIVE gaps are fatal)
//! 2. Restore the kill switch from disk
//! 3. Open a fresh ledger run
//! 4. Spawn the router, then connect the broker
//! 5. Start reconciliation and the snapshot flush ticker
//!
//! The router cannot be built without a restored kill switch, so no intent
//! is ever evaluated against a default "inactive" state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use solat_core::{SharedClock, SystemClock};
use solat_executor::{
    spawn_router, DynBroker, ExecutionRouter, ExecutorError, PaperBroker, ReconciliationService,
    RouterHandle,
};
use solat_gate::Gate;
use solat_persistence::Ledger;
use solat_risk::{KillSwitch, RiskEngine};

use crate::config::AppConfig;
use crate::error::AppResult;

pub struct Application {
    config: AppConfig,
    handle: RouterHandle,
    router_task: JoinHandle<()>,
    run_dir: PathBuf,
    ledger_path: PathBuf,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl Application {
    /// Start against the paper broker described in `config.paper_broker`.
    pub async fn start(config: AppConfig) -> AppResult<Self> {
        let broker = PaperBroker::new(
            config.paper_broker.account_id.clone(),
            config.paper_broker.balance,
        );
        for mark in &config.paper_broker.marks {
            broker.set_mark(mark.symbol.clone(), mark.price);
        }
        Self::start_with(config, Arc::new(broker), Arc::new(SystemClock)).await
    }

    /// Start against any broker and clock.
    pub async fn start_with(
        config: AppConfig,
        broker: DynBroker,
        clock: SharedClock,
    ) -> AppResult<Self> {
        let limits = config.validate()?;

        let kill_switch = KillSwitch::restore(&config.persistence.kill_switch_path)?;
        info!(
            path = %config.persistence.kill_switch_path.display(),
            active = kill_switch.is_active(),
            "Kill switch restored"
        );

        let ledger = Ledger::open(
            &config.persistence.data_dir,
            config.mode,
            serde_json::to_value(&config)?,
            config.persistence.snapshot_flush_every,
        )?;
        let run_dir = ledger.run_dir().to_path_buf();
        let ledger_path = ledger.ledger_path();

        let router = ExecutionRouter::new(
            config.execution_config(),
            kill_switch,
            Gate::new(config.live.clone(), config.risk.clone()),
            RiskEngine::new(limits),
            Box::new(ledger),
            clock,
        );
        let (handle, router_task) = spawn_router(router);

        let account = handle.connect(broker).await?;
        info!(
            mode = %config.mode,
            account_id = %account.account_id,
            run_dir = %run_dir.display(),
            "Engine started"
        );

        Ok(Self {
            config,
            handle,
            router_task,
            run_dir,
            ledger_path,
            cancel: CancellationToken::new(),
            background: Vec::new(),
        })
    }

    #[must_use]
    pub fn handle(&self) -> RouterHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Start reconciliation and periodic snapshot flushing.
    pub fn spawn_background(&mut self) {
        let interval = Duration::from_secs(self.config.execution.reconcile.interval_s);
        let reconciler =
            ReconciliationService::new(self.handle.clone(), interval, self.cancel.clone());
        self.background.push(reconciler.spawn());

        let flush_every = Duration::from_secs(self.config.persistence.snapshot_flush_interval_s.max(1));
        self.background
            .push(tokio::spawn(flush_loop(self.handle.clone(), flush_every, self.cancel.clone())));
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn run(mut self) -> AppResult<()> {
        self.spawn_background();
        info!("Engine running, press Ctrl-C to stop");

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            () = self.cancel.cancelled() => {}
        }
        self.shutdown().await
    }

    /// Stop background tasks, finalize the ledger and wait for the router.
    pub async fn shutdown(self) -> AppResult<()> {
        self.cancel.cancel();
        for task in self.background {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        match self.handle.shutdown().await {
            Ok(()) | Err(ExecutorError::RouterClosed) => {}
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = self.router_task.await {
            error!(error = %e, "Router task panicked");
        }
        info!(run_dir = %self.run_dir.display(), "Engine stopped");
        Ok(())
    }
}

async fn flush_loop(handle: RouterHandle, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => match handle.flush_snapshots().await {
                Ok(0) => {}
                Ok(flushed) => debug!(flushed, "Periodic snapshot flush"),
                Err(ExecutorError::RouterClosed) => break,
                Err(e) => warn!(error = %e, "Periodic snapshot flush failed; snapshots retained"),
            },
        }
    }
}
