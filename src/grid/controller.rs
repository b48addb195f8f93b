//! Controller facade - serializes every callback behind one async mutex

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::config::MartingaleConfig;
use super::errors::{GridError, GridResult};
use super::executor::TradingEngine;
use super::lifecycle::OrderLifecycleController;
use super::round::RoundManager;
use super::state::{ControllerSnapshot, Round, SnapshotStore};
use super::stats::StatsAccumulator;
use super::types::{ControllerStatus, MarketEvent, OrderEvent, OrderState};

/// Everything the controller mutates
struct ControllerCore {
    status: ControllerStatus,
    lifecycle: OrderLifecycleController,
    last_price: Option<f64>,
}

/// Grid/martingale controller.
///
/// Market and order callbacks may arrive from any task; each one takes the
/// core lock for its whole duration, including the engine calls it makes.
pub struct GridController<E: TradingEngine> {
    engine: Arc<E>,
    core: Mutex<ControllerCore>,
    store: SnapshotStore,
    instrument: String,
}

impl<E: TradingEngine> GridController<E> {
    pub fn new(config: MartingaleConfig, engine: Arc<E>) -> GridResult<Self> {
        config.validate()?;

        let store = SnapshotStore::new(config.state_file.clone());
        let instrument = config.instrument.name.clone();
        let rounds = RoundManager::new(config);
        info!("Controller created for {} (run {})", instrument, rounds.run_id());

        Ok(Self {
            engine,
            core: Mutex::new(ControllerCore {
                status: ControllerStatus::WaitingForPrice,
                lifecycle: OrderLifecycleController::new(rounds),
                last_price: None,
            }),
            store,
            instrument,
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Tick or bar. The first accepted price starts round 1.
    pub async fn on_market_event(&self, event: &MarketEvent) -> GridResult<()> {
        let mut core = self.core.lock().await;
        if !core.status.accepts_events() {
            return Err(GridError::Stopped);
        }

        if event.instrument() != self.instrument {
            debug!("Ignoring price for {}", event.instrument());
            return Ok(());
        }
        if let MarketEvent::Bar { period_secs, .. } = event {
            let wanted = core.lifecycle.rounds().config().bar_period_secs;
            if wanted.is_some_and(|p| p != *period_secs) {
                return Ok(());
            }
        }

        let price = event.price();
        if !(price > 0.0) {
            warn!("Ignoring invalid price {}", price);
            return Ok(());
        }
        core.last_price = Some(price);

        if core.status == ControllerStatus::WaitingForPrice {
            let result = core.lifecycle.rounds_mut().start_round(self.engine.as_ref(), price).await;
            match result {
                Ok(()) => core.status = ControllerStatus::Running,
                Err(e) => {
                    error!("Failed to start trading at {}: {}", price, e);
                    if e.is_fatal() {
                        self.begin_stop(&mut core).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Fill / close / cancel notification from the engine. While stopping,
    /// closes and cancels are still booked so the final stats are complete.
    pub async fn on_order_event(&self, event: &OrderEvent) -> GridResult<()> {
        let mut core = self.core.lock().await;
        match core.status {
            ControllerStatus::Stopped => return Err(GridError::Stopped),
            ControllerStatus::Stopping => return Self::settle(&mut core, event),
            ControllerStatus::WaitingForPrice | ControllerStatus::Running => {}
        }

        let engine = self.engine.as_ref();
        let result = match event.state {
            OrderState::Filled => core.lifecycle.on_fill(engine, &event.label, event.open_price).await,
            OrderState::Closed => core.lifecycle.on_close(engine, event).await,
            OrderState::Canceled => core.lifecycle.on_cancel(engine, &event.label).await,
            OrderState::Submitted => {
                debug!("Ignoring submission notice for {}", event.label);
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e @ GridError::DuplicateEvent(_)) => {
                warn!("{}", e);
                Err(e)
            }
            Err(e) if e.is_fatal() => {
                error!("Fatal error on {:?} event for {}: {}", event.state, event.label, e);
                self.begin_stop(&mut core).await;
                Err(e)
            }
            Err(e) => {
                error!("Error on {:?} event for {}: {}", event.state, event.label, e);
                Err(e)
            }
        }
    }

    fn settle(core: &mut ControllerCore, event: &OrderEvent) -> GridResult<()> {
        let result = match event.state {
            OrderState::Closed => core.lifecycle.settle_close(event).map(|_| ()),
            OrderState::Canceled => core.lifecycle.settle_cancel(&event.label).map(|_| ()),
            OrderState::Filled | OrderState::Submitted => {
                debug!("Ignoring {:?} for {} while stopping", event.state, event.label);
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!("Failed to settle {} while stopping: {}", event.label, e);
        }
        result
    }

    /// Enter `Stopping` and ask the engine to close every tracked order.
    /// The closes and cancels that follow are still booked; `stop` finishes.
    pub async fn close_all(&self) -> GridResult<()> {
        let mut core = self.core.lock().await;
        self.begin_stop(&mut core).await;
        Ok(())
    }

    /// Close every tracked order, report and persist. Idempotent.
    ///
    /// Terminal events for the closes are booked only if they were fed back
    /// between `close_all` and this call; the runner does that.
    pub async fn stop(&self) -> GridResult<()> {
        let mut core = self.core.lock().await;
        self.begin_stop(&mut core).await;
        self.finish_stop(&mut core).await;
        Ok(())
    }

    async fn begin_stop(&self, core: &mut ControllerCore) {
        if !core.status.accepts_events() {
            return;
        }
        core.status = ControllerStatus::Stopping;
        info!("Stopping controller");

        for label in core.lifecycle.rounds().book().open_labels() {
            if let Err(e) = self.engine.close_order(&label).await {
                warn!("Failed to close {}: {}", label, e);
            }
        }
    }

    async fn finish_stop(&self, core: &mut ControllerCore) {
        if core.status == ControllerStatus::Stopped {
            return;
        }

        let unsettled = core.lifecycle.rounds().book().open_count();
        if unsettled > 0 {
            warn!("{} orders had no close reported before stop", unsettled);
        }
        info!("Run summary: {}", core.lifecycle.stats().summary());
        match self.engine.account_equity().await {
            Ok(equity) => info!("Account equity: {:.2}", equity),
            Err(e) => warn!("Failed to read account equity: {}", e),
        }

        core.status = ControllerStatus::Stopped;
        if let Err(e) = self.store.save(&Self::snapshot_of(core)) {
            warn!("Failed to save snapshot: {}", e);
        }
        info!("Controller stopped");
    }

    fn snapshot_of(core: &ControllerCore) -> ControllerSnapshot {
        let rounds = core.lifecycle.rounds();
        ControllerSnapshot {
            run_id: rounds.run_id().to_string(),
            status: core.status,
            round: rounds.round().clone(),
            slots: rounds.slots().to_vec(),
            stats: core.lifecycle.stats().clone(),
            open_orders: rounds.book().open_entries(),
            last_price: core.last_price,
            taken_at: Utc::now(),
        }
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        Self::snapshot_of(&*self.core.lock().await)
    }

    /// Persist the current state, if a state file is configured
    pub async fn save_snapshot(&self) -> GridResult<()> {
        let snapshot = self.snapshot().await;
        self.store.save(&snapshot)
    }

    pub async fn status(&self) -> ControllerStatus {
        self.core.lock().await.status
    }

    pub async fn stats(&self) -> StatsAccumulator {
        self.core.lock().await.lifecycle.stats().clone()
    }

    pub async fn round(&self) -> Round {
        self.core.lock().await.lifecycle.rounds().round().clone()
    }

    /// Orders still waiting for a close or cancel
    pub async fn open_orders(&self) -> usize {
        self.core.lock().await.lifecycle.rounds().book().open_count()
    }
}
