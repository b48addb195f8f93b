//! Trading engine abstraction - the broker boundary, mockable for tests

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use super::errors::{GridError, GridResult};
use super::types::{FillAck, MarketEvent, OrderEvent, OrderHandle, OrderRequest, Protection};

/// Order operations the controller needs from the external trading engine
#[async_trait]
pub trait TradingEngine: Send + Sync {
    /// Submit an order. `price == 0.0` is a market order, anything else a
    /// pending stop at that price.
    async fn submit(&self, order: &OrderRequest) -> GridResult<OrderHandle>;

    /// Attach stop-loss / take-profit to a filled order
    async fn set_protection(&self, label: &str, protection: Protection) -> GridResult<()>;

    /// Close a filled order at market, or cancel it while still pending
    async fn close_order(&self, label: &str) -> GridResult<()>;

    /// Resolve once the order is filled. Unbounded: callers add the timeout.
    async fn wait_for_fill(&self, label: &str) -> GridResult<FillAck>;

    /// Current account equity
    async fn account_equity(&self) -> GridResult<f64>;
}

/// Tick/bar source for one instrument
#[async_trait]
pub trait MarketFeed: Send {
    async fn subscribe(&mut self, instrument: &str) -> GridResult<UnboundedReceiver<MarketEvent>>;

    async fn unsubscribe(&mut self) -> GridResult<()>;
}

/// Fill/close/cancel notifications from the engine
#[async_trait]
pub trait OrderEventFeed: Send {
    async fn subscribe(&mut self) -> GridResult<UnboundedReceiver<OrderEvent>>;

    async fn unsubscribe(&mut self) -> GridResult<()>;
}

/// Feed over an already-created channel; subscribing hands the receiver out once.
pub struct ChannelFeed<T> {
    rx: Option<UnboundedReceiver<T>>,
}

impl<T> ChannelFeed<T> {
    pub fn new(rx: UnboundedReceiver<T>) -> Self {
        Self { rx: Some(rx) }
    }

    fn take(&mut self) -> GridResult<UnboundedReceiver<T>> {
        self.rx
            .take()
            .ok_or_else(|| GridError::ChannelClosed("feed already subscribed".into()))
    }
}

#[async_trait]
impl MarketFeed for ChannelFeed<MarketEvent> {
    async fn subscribe(&mut self, _instrument: &str) -> GridResult<UnboundedReceiver<MarketEvent>> {
        self.take()
    }

    async fn unsubscribe(&mut self) -> GridResult<()> {
        Ok(())
    }
}

#[async_trait]
impl OrderEventFeed for ChannelFeed<OrderEvent> {
    async fn subscribe(&mut self) -> GridResult<UnboundedReceiver<OrderEvent>> {
        self.take()
    }

    async fn unsubscribe(&mut self) -> GridResult<()> {
        Ok(())
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock engine for testing the controller without a broker connection.
pub mod mock {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::sync::Mutex;

    /// Records every call; fills market orders at `fill_price` when set,
    /// otherwise `wait_for_fill` never resolves.
    pub struct MockEngine {
        pub submitted: Arc<Mutex<Vec<OrderRequest>>>,
        pub protections: Arc<Mutex<Vec<(String, Protection)>>>,
        pub closed: Arc<Mutex<Vec<String>>>,
        pub equity: Arc<Mutex<f64>>,
        pub fill_price: Arc<Mutex<Option<f64>>>,
        pub should_reject: Arc<Mutex<bool>>,
    }

    impl MockEngine {
        pub fn new(fill_price: f64) -> Self {
            Self {
                submitted: Arc::new(Mutex::new(Vec::new())),
                protections: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(Mutex::new(Vec::new())),
                equity: Arc::new(Mutex::new(10_000.0)),
                fill_price: Arc::new(Mutex::new(Some(fill_price))),
                should_reject: Arc::new(Mutex::new(false)),
            }
        }

        /// Market orders are accepted but never acknowledged
        pub fn unresponsive() -> Self {
            Self {
                fill_price: Arc::new(Mutex::new(None)),
                ..Self::new(0.0)
            }
        }

        pub async fn set_fill_price(&self, price: Option<f64>) {
            *self.fill_price.lock().await = price;
        }

        pub async fn set_should_reject(&self, reject: bool) {
            *self.should_reject.lock().await = reject;
        }

        pub async fn set_equity(&self, equity: f64) {
            *self.equity.lock().await = equity;
        }

        pub async fn submitted(&self) -> Vec<OrderRequest> {
            self.submitted.lock().await.clone()
        }

        pub async fn last_submitted(&self) -> Option<OrderRequest> {
            self.submitted.lock().await.last().cloned()
        }
    }

    #[async_trait]
    impl TradingEngine for MockEngine {
        async fn submit(&self, order: &OrderRequest) -> GridResult<OrderHandle> {
            if *self.should_reject.lock().await {
                return Err(GridError::OrderRejected("Mock rejection".into()));
            }

            self.submitted.lock().await.push(order.clone());
            Ok(OrderHandle {
                label: order.label.clone(),
            })
        }

        async fn set_protection(&self, label: &str, protection: Protection) -> GridResult<()> {
            self.protections.lock().await.push((label.to_string(), protection));
            Ok(())
        }

        async fn close_order(&self, label: &str) -> GridResult<()> {
            self.closed.lock().await.push(label.to_string());
            Ok(())
        }

        async fn wait_for_fill(&self, _label: &str) -> GridResult<FillAck> {
            let price = *self.fill_price.lock().await;
            match price {
                Some(open_price) => Ok(FillAck {
                    open_price,
                    fill_time: Utc::now(),
                }),
                None => std::future::pending().await,
            }
        }

        async fn account_equity(&self) -> GridResult<f64> {
            Ok(*self.equity.lock().await)
        }
    }

    /// Market feed backed by a channel the test keeps the sender of
    pub fn market_feed() -> (ChannelFeed<MarketEvent>, UnboundedSender<MarketEvent>) {
        let (tx, rx) = unbounded_channel();
        (ChannelFeed::new(rx), tx)
    }

    /// Order event feed backed by a channel the test keeps the sender of
    pub fn order_feed() -> (ChannelFeed<OrderEvent>, UnboundedSender<OrderEvent>) {
        let (tx, rx) = unbounded_channel();
        (ChannelFeed::new(rx), tx)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::grid::types::OrderSide;

    #[tokio::test]
    async fn test_mock_records_orders() {
        let engine = MockEngine::new(1.1);
        let order = OrderRequest::market("mg_1", "EURUSD", OrderSide::Buy, 0.01);
        let handle = engine.submit(&order).await.unwrap();

        assert_eq!(handle.label, "mg_1");
        assert_eq!(engine.submitted().await.len(), 1);

        let ack = engine.wait_for_fill("mg_1").await.unwrap();
        assert!((ack.open_price - 1.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_mock_rejects() {
        let engine = MockEngine::new(1.1);
        engine.set_should_reject(true).await;
        let order = OrderRequest::market("mg_1", "EURUSD", OrderSide::Buy, 0.01);
        assert!(matches!(engine.submit(&order).await, Err(GridError::OrderRejected(_))));
        assert!(engine.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_channel_feed_subscribes_once() {
        let (mut feed, tx) = market_feed();
        let mut rx = MarketFeed::subscribe(&mut feed, "EURUSD").await.unwrap();
        assert!(MarketFeed::subscribe(&mut feed, "EURUSD").await.is_err());

        tx.send(MarketEvent::tick("EURUSD", 1.2)).unwrap();
        assert_eq!(rx.recv().await.unwrap().price(), 1.2);
    }

    #[tokio::test]
    async fn test_unresponsive_engine_times_out() {
        let engine = MockEngine::unresponsive();
        let wait = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            engine.wait_for_fill("mg_1"),
        )
        .await;
        assert!(wait.is_err());
    }
}
