//! Order lifecycle - reacts to fills, closes and cancels
//!
//! ```text
//! Submitted --fill--> Filled --close--> Closed
//!     \                  |
//!      `----cancel-------+--> Canceled
//! ```
//!
//! A close walks the slot's loss ladder and either rotates the round or
//! replaces the order at market. Market orders are acknowledged through a
//! bounded fill wait; an order that is not acknowledged in time is canceled
//! and stays tracked until the engine's own close or cancel for it arrives.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::timeout;

use super::errors::{GridError, GridResult};
use super::executor::TradingEngine;
use super::round::RoundManager;
use super::state::OrderEntry;
use super::stats::StatsAccumulator;
use super::types::{OrderEvent, OrderSide, OrderState, Protection};

/// Resubmissions tried for one canceled order before the slot pauses
const MAX_RESUBMIT_ATTEMPTS: u32 = 3;

pub struct OrderLifecycleController {
    rounds: RoundManager,
    stats: StatsAccumulator,
}

impl OrderLifecycleController {
    pub fn new(rounds: RoundManager) -> Self {
        Self {
            rounds,
            stats: StatsAccumulator::new(),
        }
    }

    pub fn rounds(&self) -> &RoundManager {
        &self.rounds
    }

    pub fn rounds_mut(&mut self) -> &mut RoundManager {
        &mut self.rounds
    }

    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    /// Stop-loss / take-profit for a position opened at `open_price`
    pub fn protection_for(&self, side: OrderSide, open_price: f64) -> Protection {
        let config = self.rounds.config();
        let instrument = &config.instrument;
        let tp = instrument.pips(config.take_profit_pips);
        let sl = instrument.pips(config.stop_loss_pips());

        Protection {
            stop_loss: instrument.round_price(open_price - side.sign() * sl),
            take_profit: instrument.round_price(open_price + side.sign() * tp),
        }
    }

    /// Submitted -> Filled: attach protection once
    pub async fn on_fill<E: TradingEngine + ?Sized>(&mut self, engine: &E, label: &str, open_price: f64) -> GridResult<()> {
        let entry = self.rounds.book().lookup(label)?;
        if entry.state == OrderState::Filled {
            debug!("Ignoring repeated fill for {}", label);
            return Ok(());
        }
        let side = entry.side;

        let protection = self.protection_for(side, open_price);
        engine.set_protection(label, protection).await?;

        if let Some(entry) = self.rounds.book_mut().get_mut(label) {
            entry.transition(label, OrderState::Filled)?;
            entry.open_price = Some(open_price);
        }

        info!(
            "{} {} filled @ {} (sl {}, tp {})",
            label,
            side.as_str(),
            open_price,
            protection.stop_loss,
            protection.take_profit
        );
        Ok(())
    }

    /// Filled -> Closed: book the result, walk the ladder, rotate or replace
    pub async fn on_close<E: TradingEngine + ?Sized>(&mut self, engine: &E, event: &OrderEvent) -> GridResult<()> {
        let label = event.label.as_str();
        let entry = self.settle_close(event)?;

        if entry.cancel_requested {
            info!("{} closed after it was given up on, result booked", label);
            return Ok(());
        }

        let current_round = self.rounds.round().number;
        let max_losses = self.rounds.config().max_consecutive_losses;
        let slot = self.rounds.slot_mut(entry.slot_index)?;

        if entry.round == current_round {
            if event.profit_pips >= 0.0 {
                slot.reset_losses();
            } else {
                slot.consecutive_losses += 1;
                slot.next_side = slot.next_side.opposite();
                if slot.consecutive_losses > max_losses {
                    slot.reset_losses();
                    self.stats.record_final_loss();
                    info!(
                        "Slot {} hit {} consecutive losses, ladder reset",
                        entry.slot_index,
                        max_losses + 1
                    );
                }
            }
        }

        info!(
            "{} closed @ {} ({:+.1} pips, {:+.2} usd), slot {} losses {}",
            label,
            event.close_price,
            event.profit_pips,
            event.profit_usd,
            entry.slot_index,
            self.rounds.slot(entry.slot_index)?.consecutive_losses
        );

        if self.rounds.should_rotate() {
            return self.rounds.start_round(engine, event.close_price).await;
        }

        if entry.round != current_round {
            debug!("{} belonged to round {}, no replacement", label, entry.round);
            return Ok(());
        }

        self.replace(engine, entry.slot_index).await
    }

    /// Canceled: log, free the slot, optionally place the same order again
    pub async fn on_cancel<E: TradingEngine + ?Sized>(&mut self, engine: &E, label: &str) -> GridResult<()> {
        let entry = self.settle_cancel(label)?;
        if entry.cancel_requested {
            debug!("Engine confirmed cancel of {}", label);
            return Ok(());
        }

        error!("Order {} canceled (slot {}, round {})", label, entry.slot_index, entry.round);
        self.resubmit(engine, &entry).await
    }

    /// Book a close and stop tracking the label. Leaves the ladder alone.
    pub fn settle_close(&mut self, event: &OrderEvent) -> GridResult<OrderEntry> {
        let label = event.label.as_str();
        let state = self.rounds.book().lookup(label)?.state;

        if state == OrderState::Submitted {
            warn!("Close for {} arrived before its fill", label);
            if let Some(entry) = self.rounds.book_mut().get_mut(label) {
                entry.transition(label, OrderState::Filled)?;
            }
        }
        if let Some(entry) = self.rounds.book_mut().get_mut(label) {
            entry.transition(label, OrderState::Closed)?;
        }

        let entry = self
            .rounds
            .book_mut()
            .retire(label)
            .ok_or_else(|| GridError::UnknownOrder(label.to_string()))?;
        self.stats
            .record_close(event.profit_pips, event.profit_usd, event.commission_usd);
        self.rounds.slot_mut(entry.slot_index)?.release(label);
        Ok(entry)
    }

    /// Stop tracking a canceled label and free its slot
    pub fn settle_cancel(&mut self, label: &str) -> GridResult<OrderEntry> {
        self.rounds.book().lookup(label)?;
        if let Some(entry) = self.rounds.book_mut().get_mut(label) {
            entry.transition(label, OrderState::Canceled)?;
        }

        let entry = self
            .rounds
            .book_mut()
            .retire(label)
            .ok_or_else(|| GridError::UnknownOrder(label.to_string()))?;
        self.rounds.slot_mut(entry.slot_index)?.release(label);
        Ok(entry)
    }

    /// Market replacement for a slot after a close
    async fn replace<E: TradingEngine + ?Sized>(&mut self, engine: &E, index: u32) -> GridResult<()> {
        let side = self.rounds.slot(index)?.next_side;
        let lot = self.rounds.lot_for(index)?;

        let label = match self.rounds.place_order(engine, index, side, lot, 0.0).await {
            Ok(label) => label,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Replacement for slot {} rejected, slot paused: {}", index, e);
                return Ok(());
            }
        };
        info!("Slot {} replaced with {} {} {}", index, label, side.as_str(), lot);

        if !self.await_fill(engine, &label).await? {
            let entry = self.abandon(&label)?;
            self.resubmit(engine, &entry).await?;
        }
        Ok(())
    }

    /// Place a canceled order's side and lot again at market while the
    /// policy allows
    async fn resubmit<E: TradingEngine + ?Sized>(&mut self, engine: &E, entry: &OrderEntry) -> GridResult<()> {
        if !self.rounds.config().resubmit_on_cancel {
            return Ok(());
        }
        if entry.round != self.rounds.round().number {
            debug!("Not resubmitting for slot {} from round {}", entry.slot_index, entry.round);
            return Ok(());
        }

        for attempt in 1..=MAX_RESUBMIT_ATTEMPTS {
            let label = match self
                .rounds
                .place_order(engine, entry.slot_index, entry.side, entry.lot, 0.0)
                .await
            {
                Ok(label) => label,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Resubmission for slot {} rejected: {}", entry.slot_index, e);
                    return Ok(());
                }
            };
            info!("Resubmitted canceled {} as {} (attempt {})", entry.side.as_str(), label, attempt);

            if self.await_fill(engine, &label).await? {
                return Ok(());
            }
            self.abandon(&label)?;
        }

        error!("Slot {} paused after {} resubmissions", entry.slot_index, MAX_RESUBMIT_ATTEMPTS);
        Ok(())
    }

    /// Give up on an unacknowledged order: free its slot but keep the label
    /// tracked until the engine reports how it ended
    fn abandon(&mut self, label: &str) -> GridResult<OrderEntry> {
        let entry = self
            .rounds
            .book_mut()
            .get_mut(label)
            .ok_or_else(|| GridError::UnknownOrder(label.to_string()))?;
        entry.cancel_requested = true;
        let entry = entry.clone();

        self.rounds.slot_mut(entry.slot_index)?.release(label);
        error!("Order {} canceled (slot {}, round {})", label, entry.slot_index, entry.round);
        Ok(entry)
    }

    /// Wait for a market order's acknowledgement, bounded by the fill
    /// timeout. Returns false when the engine was asked to cancel it instead.
    async fn await_fill<E: TradingEngine + ?Sized>(&mut self, engine: &E, label: &str) -> GridResult<bool> {
        let timeout_ms = self.rounds.config().fill_timeout_ms;
        let err = match timeout(Duration::from_millis(timeout_ms), engine.wait_for_fill(label)).await {
            Ok(Ok(ack)) => {
                self.on_fill(engine, label, ack.open_price).await?;
                return Ok(true);
            }
            Ok(Err(e)) => e,
            Err(_) => GridError::FillTimeout {
                label: label.to_string(),
                timeout_ms,
            },
        };

        error!("{}", err);
        if let Err(e) = engine.close_order(label).await {
            warn!("Failed to cancel unacknowledged {}: {}", label, e);
        }
        Ok(false)
    }
}
