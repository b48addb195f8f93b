//! Core data types shared by the controller and the trading engine boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order direction (the engine's "command")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// How an order enters the market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Executed immediately at the current price (`price == 0`)
    Market,
    /// Pending stop order that triggers when price crosses `price`
    Stop,
}

/// Lifecycle of an order as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Submitted,
    Filled,
    Closed,
    Canceled,
}

impl OrderState {
    /// Allowed transitions: Submitted -> Filled -> Closed, and
    /// Submitted/Filled -> Canceled.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        matches!(
            (self, next),
            (OrderState::Submitted, OrderState::Filled)
                | (OrderState::Filled, OrderState::Closed)
                | (OrderState::Submitted, OrderState::Canceled)
                | (OrderState::Filled, OrderState::Canceled)
        )
    }
}

/// Controller execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerStatus {
    /// Waiting for the first tick or bar to lay out round 1
    WaitingForPrice,
    /// Rounds are being traded
    Running,
    /// Closing every tracked order
    Stopping,
    /// Fully stopped, events are rejected
    Stopped,
}

impl ControllerStatus {
    pub fn accepts_events(&self) -> bool {
        matches!(self, ControllerStatus::WaitingForPrice | ControllerStatus::Running)
    }
}

/// Request handed to the engine's submit call
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub label: String,
    pub instrument: String,
    pub side: OrderSide,
    pub lot: f64,
    /// 0.0 for market orders, trigger price for pending stop orders
    pub price: f64,
    /// Allowed slippage in pips
    pub slippage: f64,
}

impl OrderRequest {
    pub fn market(label: impl Into<String>, instrument: impl Into<String>, side: OrderSide, lot: f64) -> Self {
        Self {
            label: label.into(),
            instrument: instrument.into(),
            side,
            lot,
            price: 0.0,
            slippage: 0.0,
        }
    }

    pub fn stop(
        label: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        lot: f64,
        price: f64,
    ) -> Self {
        Self {
            label: label.into(),
            instrument: instrument.into(),
            side,
            lot,
            price,
            slippage: 0.0,
        }
    }

    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn kind(&self) -> OrderKind {
        if self.price == 0.0 {
            OrderKind::Market
        } else {
            OrderKind::Stop
        }
    }
}

/// Handle returned by the engine for an accepted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub label: String,
}

/// Synchronous fill acknowledgement for market orders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillAck {
    pub open_price: f64,
    pub fill_time: DateTime<Utc>,
}

/// Stop-loss / take-profit prices attached after a fill
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Protection {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Order event delivered by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub label: String,
    pub state: OrderState,
    pub side: OrderSide,
    pub open_price: f64,
    pub close_price: f64,
    pub fill_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub profit_pips: f64,
    pub profit_usd: f64,
    pub commission_usd: f64,
}

impl OrderEvent {
    pub fn filled(label: impl Into<String>, side: OrderSide, open_price: f64) -> Self {
        Self {
            label: label.into(),
            state: OrderState::Filled,
            side,
            open_price,
            close_price: 0.0,
            fill_time: Some(Utc::now()),
            close_time: None,
            profit_pips: 0.0,
            profit_usd: 0.0,
            commission_usd: 0.0,
        }
    }

    pub fn closed(
        label: impl Into<String>,
        side: OrderSide,
        open_price: f64,
        close_price: f64,
        profit_pips: f64,
        profit_usd: f64,
    ) -> Self {
        Self {
            label: label.into(),
            state: OrderState::Closed,
            side,
            open_price,
            close_price,
            fill_time: None,
            close_time: Some(Utc::now()),
            profit_pips,
            profit_usd,
            commission_usd: 0.0,
        }
    }

    pub fn canceled(label: impl Into<String>, side: OrderSide) -> Self {
        Self {
            label: label.into(),
            state: OrderState::Canceled,
            side,
            open_price: 0.0,
            close_price: 0.0,
            fill_time: None,
            close_time: Some(Utc::now()),
            profit_pips: 0.0,
            profit_usd: 0.0,
            commission_usd: 0.0,
        }
    }

    pub fn with_commission(mut self, commission_usd: f64) -> Self {
        self.commission_usd = commission_usd;
        self
    }
}

/// Price update from the market feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketEvent {
    Tick {
        instrument: String,
        price: f64,
        #[serde(default = "Utc::now")]
        time: DateTime<Utc>,
    },
    Bar {
        instrument: String,
        period_secs: u64,
        close: f64,
        #[serde(default = "Utc::now")]
        time: DateTime<Utc>,
    },
}

impl MarketEvent {
    pub fn tick(instrument: impl Into<String>, price: f64) -> Self {
        MarketEvent::Tick {
            instrument: instrument.into(),
            price,
            time: Utc::now(),
        }
    }

    pub fn bar(instrument: impl Into<String>, period_secs: u64, close: f64) -> Self {
        MarketEvent::Bar {
            instrument: instrument.into(),
            period_secs,
            close,
            time: Utc::now(),
        }
    }

    pub fn instrument(&self) -> &str {
        match self {
            MarketEvent::Tick { instrument, .. } | MarketEvent::Bar { instrument, .. } => instrument,
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            MarketEvent::Tick { price, .. } => *price,
            MarketEvent::Bar { close, .. } => *close,
        }
    }
}
