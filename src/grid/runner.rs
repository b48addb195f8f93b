//! Controller runner - main execution loop

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::{interval, timeout_at, Instant};

use super::controller::GridController;
use super::errors::{GridError, GridResult};
use super::executor::{MarketFeed, OrderEventFeed, TradingEngine};
use super::types::OrderEvent;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub state_save_interval_secs: u64,
    pub max_consecutive_errors: u32,
    /// How long a stop waits for the engine to report the closes it asked for
    pub stop_settle_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_save_interval_secs: 30,
            max_consecutive_errors: 5,
            stop_settle_timeout_ms: 2_000,
        }
    }
}

/// Funnels both feeds through one loop so events reach the controller in
/// arrival order.
pub struct ControllerRunner<E: TradingEngine, M: MarketFeed, O: OrderEventFeed> {
    controller: Arc<GridController<E>>,
    market_feed: M,
    order_feed: O,
    runner_config: RunnerConfig,
    processed: watch::Sender<u64>,
}

impl<E: TradingEngine + 'static, M: MarketFeed + 'static, O: OrderEventFeed + 'static> ControllerRunner<E, M, O> {
    pub fn new(controller: Arc<GridController<E>>, market_feed: M, order_feed: O, runner_config: RunnerConfig) -> Self {
        Self {
            controller,
            market_feed,
            order_feed,
            runner_config,
            processed: watch::channel(0).0,
        }
    }

    pub fn controller(&self) -> &Arc<GridController<E>> {
        &self.controller
    }

    /// Count of market events fully handled, including the order events
    /// queued behind each one. Closes when the runner is dropped.
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }

    /// Run until the market feed ends, the controller stops or too many
    /// consecutive events fail. The controller is stopped on the way out.
    pub async fn run(&mut self) -> GridResult<()> {
        info!("Starting controller runner for {}", self.controller.instrument());
        let mut market_rx = self.market_feed.subscribe(self.controller.instrument()).await?;
        let mut order_rx = self.order_feed.subscribe().await?;
        let mut save_timer = interval(Duration::from_secs(self.runner_config.state_save_interval_secs.max(1)));
        let mut consecutive_errors = 0u32;
        let mut market_open = true;

        while market_open {
            tokio::select! {
                // Order events queued before a price are handled before it
                biased;

                Some(event) = order_rx.recv() => {
                    let result = self.controller.on_order_event(&event).await;
                    track(result, &mut consecutive_errors, "order event");
                }
                event = market_rx.recv() => match event {
                    Some(event) => {
                        let result = self.controller.on_market_event(&event).await;
                        track(result, &mut consecutive_errors, "market event");
                        self.drain(&mut order_rx).await;
                        self.processed.send_modify(|n| *n += 1);
                    }
                    None => {
                        info!("Market feed ended");
                        market_open = false;
                    }
                },
                _ = save_timer.tick() => {
                    if let Err(e) = self.controller.save_snapshot().await {
                        warn!("Failed to save state: {}", e);
                    }
                }
            }

            if !self.controller.status().await.accepts_events() {
                info!("Controller stopping");
                break;
            }
            if consecutive_errors >= self.runner_config.max_consecutive_errors {
                error!("Too many errors, shutting down");
                self.shutdown(&mut order_rx).await?;
                return Err(GridError::Engine("Too many errors".into()));
            }
        }

        if !market_open {
            self.drain(&mut order_rx).await;
        }

        self.shutdown(&mut order_rx).await?;
        self.market_feed.unsubscribe().await?;
        self.order_feed.unsubscribe().await?;
        Ok(())
    }

    /// Close everything, book the resulting events, then stop the controller
    async fn shutdown(&self, order_rx: &mut UnboundedReceiver<OrderEvent>) -> GridResult<()> {
        self.controller.close_all().await?;
        self.settle(order_rx).await;
        self.controller.stop().await
    }

    /// Process order events already queued, including the ones their
    /// handling produces.
    async fn drain(&self, order_rx: &mut UnboundedReceiver<OrderEvent>) {
        let mut drained = 0usize;
        while let Ok(event) = order_rx.try_recv() {
            if let Err(e) = self.controller.on_order_event(&event).await {
                if matches!(e, GridError::Stopped) {
                    break;
                }
            }
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} pending order events", drained);
        }
    }

    /// Feed close/cancel events to a stopping controller until every
    /// tracked order is settled or the settle timeout passes
    async fn settle(&self, order_rx: &mut UnboundedReceiver<OrderEvent>) {
        let deadline = Instant::now() + Duration::from_millis(self.runner_config.stop_settle_timeout_ms);
        let mut settled = 0usize;

        while self.controller.open_orders().await > 0 {
            match timeout_at(deadline, order_rx.recv()).await {
                Ok(Some(event)) => {
                    let _ = self.controller.on_order_event(&event).await;
                    settled += 1;
                }
                Ok(None) => {
                    warn!("Order feed closed while stopping");
                    break;
                }
                Err(_) => {
                    warn!("Timed out waiting for {} orders to settle", self.controller.open_orders().await);
                    break;
                }
            }
        }
        debug!("Settled {} order events at stop", settled);
    }
}

/// Count consecutive failures; duplicates and post-stop rejections are benign
fn track(result: GridResult<()>, consecutive_errors: &mut u32, what: &str) {
    match result {
        Ok(()) => *consecutive_errors = 0,
        Err(GridError::DuplicateEvent(_)) | Err(GridError::Stopped) => {}
        Err(e) => {
            error!("Error handling {}: {}", what, e);
            *consecutive_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::config::test_config;
    use crate::grid::executor::mock::{market_feed, order_feed, MockEngine};
    use crate::grid::types::{ControllerStatus, MarketEvent, OrderSide};

    fn quick_stop() -> RunnerConfig {
        RunnerConfig {
            stop_settle_timeout_ms: 50,
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_runs_until_market_feed_ends() {
        let controller = Arc::new(GridController::new(test_config(), Arc::new(MockEngine::new(1.1))).unwrap());
        let (market, market_tx) = market_feed();
        let (orders, order_tx) = order_feed();
        let mut runner = ControllerRunner::new(controller.clone(), market, orders, quick_stop());

        market_tx.send(MarketEvent::tick("EURUSD", 1.1)).unwrap();
        drop(market_tx);
        let _order_tx = order_tx;

        runner.run().await.unwrap();
        assert_eq!(controller.status().await, ControllerStatus::Stopped);
        assert_eq!(controller.round().await.number, 1);
    }

    #[tokio::test]
    async fn test_stops_after_fatal_order_event() {
        let controller = Arc::new(GridController::new(test_config(), Arc::new(MockEngine::new(1.1))).unwrap());
        let (market, market_tx) = market_feed();
        let (orders, order_tx) = order_feed();
        let mut runner = ControllerRunner::new(controller.clone(), market, orders, quick_stop());

        controller.on_market_event(&MarketEvent::tick("EURUSD", 1.1)).await.unwrap();
        order_tx
            .send(OrderEvent::closed("ghost", OrderSide::Buy, 1.1, 1.0, -1000.0, -1.0))
            .unwrap();

        runner.run().await.unwrap();
        assert_eq!(controller.status().await, ControllerStatus::Stopped);
        drop(market_tx);
    }

    #[tokio::test]
    async fn test_stop_books_closes_reported_after_it() {
        let controller = Arc::new(GridController::new(test_config(), Arc::new(MockEngine::new(1.1))).unwrap());
        let (market, market_tx) = market_feed();
        let (orders, order_tx) = order_feed();
        let mut runner = ControllerRunner::new(controller.clone(), market, orders, RunnerConfig::default());

        controller.on_market_event(&MarketEvent::tick("EURUSD", 1.1)).await.unwrap();
        let snapshot = controller.snapshot().await;
        drop(market_tx);

        let first = snapshot.slots[0].pending_label.clone().unwrap();
        order_tx.send(OrderEvent::filled(first.as_str(), OrderSide::Buy, 1.101)).unwrap();
        let handle = tokio::spawn(async move { runner.run().await });
        while controller.status().await != ControllerStatus::Stopping {
            tokio::task::yield_now().await;
        }

        // Stand-in for the engine answering the stop's close requests
        order_tx
            .send(OrderEvent::closed(first.as_str(), OrderSide::Buy, 1.101, 1.1, -10.0, -1.0))
            .unwrap();
        for slot in &snapshot.slots[1..] {
            let label = slot.pending_label.clone().unwrap();
            order_tx.send(OrderEvent::canceled(label.as_str(), slot.next_side)).unwrap();
        }

        handle.await.unwrap().unwrap();
        assert_eq!(controller.status().await, ControllerStatus::Stopped);
        assert_eq!(controller.open_orders().await, 0);
        let stats = controller.stats().await;
        assert_eq!(stats.losses, 1);
        assert!((stats.equity + 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_progress_counts_market_events() {
        let controller = Arc::new(GridController::new(test_config(), Arc::new(MockEngine::new(1.1))).unwrap());
        let (market, market_tx) = market_feed();
        let (orders, _order_tx) = order_feed();
        let mut runner = ControllerRunner::new(controller.clone(), market, orders, quick_stop());
        let mut progress = runner.progress();
        let handle = tokio::spawn(async move { runner.run().await });

        market_tx.send(MarketEvent::tick("EURUSD", 1.1)).unwrap();
        progress.wait_for(|n| *n >= 1).await.unwrap();
        assert_eq!(controller.round().await.number, 1);

        market_tx.send(MarketEvent::tick("GBPUSD", 1.3)).unwrap();
        market_tx.send(MarketEvent::tick("EURUSD", 1.2)).unwrap();
        progress.wait_for(|n| *n >= 3).await.unwrap();
        assert_eq!(controller.snapshot().await.last_price, Some(1.2));

        drop(market_tx);
        handle.await.unwrap().unwrap();
        assert_eq!(controller.status().await, ControllerStatus::Stopped);
    }

    #[test]
    fn test_duplicates_do_not_count_as_errors() {
        let mut errors = 3;
        track(Err(GridError::DuplicateEvent("a".into())), &mut errors, "order event");
        assert_eq!(errors, 3);
        track(Err(GridError::OrderRejected("a".into())), &mut errors, "order event");
        assert_eq!(errors, 4);
        track(Ok(()), &mut errors, "market event");
        assert_eq!(errors, 0);
    }
}
