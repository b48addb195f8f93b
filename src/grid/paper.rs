//! Paper trading engine - simulated fills for running without a broker
//!
//! Pending stops trigger when a price update crosses them, open positions
//! close once price reaches their stop-loss or take-profit, and every state
//! change is reported on the order event channel like a broker would.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};

use super::config::InstrumentSpec;
use super::errors::{GridError, GridResult};
use super::executor::TradingEngine;
use super::types::{FillAck, OrderEvent, OrderHandle, OrderRequest, OrderSide, Protection};

/// Paper account parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_initial_equity")]
    pub initial_equity: f64,
    /// Account-currency value of one pip for one lot
    #[serde(default = "default_pip_value_per_lot")]
    pub pip_value_per_lot: f64,
    /// Round-turn commission charged per lot on close
    #[serde(default)]
    pub commission_per_lot: f64,
}

fn default_initial_equity() -> f64 {
    10_000.0
}

fn default_pip_value_per_lot() -> f64 {
    10.0
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_equity: default_initial_equity(),
            pip_value_per_lot: default_pip_value_per_lot(),
            commission_per_lot: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingStop {
    side: OrderSide,
    lot: f64,
    trigger: f64,
}

#[derive(Debug, Clone)]
struct Position {
    side: OrderSide,
    lot: f64,
    open_price: f64,
    fill_time: DateTime<Utc>,
    protection: Option<Protection>,
}

#[derive(Debug, Default)]
struct PaperBook {
    last_price: Option<f64>,
    pending: HashMap<String, PendingStop>,
    positions: HashMap<String, Position>,
    realized: f64,
}

pub struct PaperEngine {
    instrument: InstrumentSpec,
    config: PaperConfig,
    book: Mutex<PaperBook>,
    events: UnboundedSender<OrderEvent>,
    fills: Notify,
}

impl PaperEngine {
    /// Create the engine and the receiving end of its order event stream
    pub fn new(instrument: InstrumentSpec, config: PaperConfig) -> (Self, UnboundedReceiver<OrderEvent>) {
        let (events, rx) = unbounded_channel();
        let engine = Self {
            instrument,
            config,
            book: Mutex::new(PaperBook::default()),
            events,
            fills: Notify::new(),
        };
        (engine, rx)
    }

    pub fn instrument(&self) -> &InstrumentSpec {
        &self.instrument
    }

    pub async fn last_price(&self) -> Option<f64> {
        self.book.lock().await.last_price
    }

    pub async fn open_positions(&self) -> usize {
        self.book.lock().await.positions.len()
    }

    pub async fn pending_orders(&self) -> usize {
        self.book.lock().await.pending.len()
    }

    /// Feed a price: trigger crossed stops, then close positions whose
    /// protection was reached.
    pub async fn on_price(&self, price: f64) {
        let mut book = self.book.lock().await;
        book.last_price = Some(price);

        let mut triggered: Vec<String> = book
            .pending
            .iter()
            .filter(|(_, stop)| match stop.side {
                OrderSide::Buy => price >= stop.trigger,
                OrderSide::Sell => price <= stop.trigger,
            })
            .map(|(label, _)| label.clone())
            .collect();
        triggered.sort();

        let mut exits: Vec<String> = book
            .positions
            .iter()
            .filter(|(_, pos)| match (pos.side, pos.protection) {
                (_, None) => false,
                (OrderSide::Buy, Some(p)) => price >= p.take_profit || price <= p.stop_loss,
                (OrderSide::Sell, Some(p)) => price <= p.take_profit || price >= p.stop_loss,
            })
            .map(|(label, _)| label.clone())
            .collect();
        exits.sort();

        for label in exits {
            self.close_position(&mut book, &label, price);
        }

        for label in triggered {
            if let Some(stop) = book.pending.remove(&label) {
                debug!("Paper stop {} triggered at {} (trigger {})", label, price, stop.trigger);
                self.open_position(&mut book, &label, stop.side, stop.lot, price);
            }
        }

        if !book.positions.is_empty() {
            self.fills.notify_waiters();
        }
    }

    fn open_position(&self, book: &mut PaperBook, label: &str, side: OrderSide, lot: f64, price: f64) {
        let fill_time = Utc::now();
        book.positions.insert(
            label.to_string(),
            Position {
                side,
                lot,
                open_price: price,
                fill_time,
                protection: None,
            },
        );
        let _ = self.events.send(OrderEvent::filled(label, side, price));
    }

    fn close_position(&self, book: &mut PaperBook, label: &str, price: f64) {
        let Some(pos) = book.positions.remove(label) else {
            return;
        };

        let pips = (price - pos.open_price) * pos.side.sign() / self.instrument.pip_value;
        let pips = (pips * 10.0).round() / 10.0;
        let usd = pips * self.config.pip_value_per_lot * pos.lot;
        let commission = self.config.commission_per_lot * pos.lot;
        book.realized += usd - commission;

        info!("Paper close {} {} @ {} ({:+.1} pips)", label, pos.side.as_str(), price, pips);
        let event = OrderEvent::closed(label, pos.side, pos.open_price, price, pips, usd).with_commission(commission);
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl TradingEngine for PaperEngine {
    async fn submit(&self, order: &OrderRequest) -> GridResult<OrderHandle> {
        if order.instrument != self.instrument.name {
            return Err(GridError::OrderRejected(format!("unknown instrument {}", order.instrument)));
        }
        if order.lot <= 0.0 {
            return Err(GridError::OrderRejected(format!("invalid lot {}", order.lot)));
        }

        let mut book = self.book.lock().await;
        if order.price == 0.0 {
            let price = book
                .last_price
                .ok_or_else(|| GridError::OrderRejected("no market price yet".into()))?;
            self.open_position(&mut book, &order.label, order.side, order.lot, price);
            self.fills.notify_waiters();
        } else {
            book.pending.insert(
                order.label.clone(),
                PendingStop {
                    side: order.side,
                    lot: order.lot,
                    trigger: order.price,
                },
            );
        }

        Ok(OrderHandle {
            label: order.label.clone(),
        })
    }

    async fn set_protection(&self, label: &str, protection: Protection) -> GridResult<()> {
        let mut book = self.book.lock().await;
        let pos = book
            .positions
            .get_mut(label)
            .ok_or_else(|| GridError::Engine(format!("no open position {}", label)))?;
        pos.protection = Some(protection);
        Ok(())
    }

    async fn close_order(&self, label: &str) -> GridResult<()> {
        let mut book = self.book.lock().await;
        if let Some(stop) = book.pending.remove(label) {
            let _ = self.events.send(OrderEvent::canceled(label, stop.side));
            return Ok(());
        }

        let price = book
            .last_price
            .ok_or_else(|| GridError::Engine("no market price yet".into()))?;
        if !book.positions.contains_key(label) {
            return Err(GridError::Engine(format!("no order {}", label)));
        }
        self.close_position(&mut book, label, price);
        Ok(())
    }

    async fn wait_for_fill(&self, label: &str) -> GridResult<FillAck> {
        loop {
            let notified = self.fills.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let book = self.book.lock().await;
                if let Some(pos) = book.positions.get(label) {
                    return Ok(FillAck {
                        open_price: pos.open_price,
                        fill_time: pos.fill_time,
                    });
                }
                if !book.pending.contains_key(label) {
                    return Err(GridError::Engine(format!("no order {}", label)));
                }
            }

            notified.await;
        }
    }

    async fn account_equity(&self) -> GridResult<f64> {
        Ok(self.config.initial_equity + self.book.lock().await.realized)
    }
}
