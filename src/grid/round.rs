//! Round manager - owns the slots, the round counter and the order side table
//!
//! A round lays out one pending stop order per slot around a base price and
//! then lets the lifecycle controller replace orders until the round's order
//! budget is spent.

use log::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{LotSizing, MartingaleConfig};
use super::errors::{GridError, GridResult};
use super::executor::TradingEngine;
use super::sizer::{round_lot, PositionSizer};
use super::state::{OrderBook, OrderEntry, Round, Slot};
use super::types::{OrderRequest, OrderSide};

pub struct RoundManager {
    config: MartingaleConfig,
    sizer: PositionSizer,
    slots: Vec<Slot>,
    round: Round,
    book: OrderBook,
    run_id: String,
    seq: u64,
    base_lot: f64,
}

impl RoundManager {
    pub fn new(config: MartingaleConfig) -> Self {
        let mut run_id = Uuid::new_v4().simple().to_string();
        run_id.truncate(8);

        let base_lot = match config.lot_sizing {
            LotSizing::Fixed { lot } => lot,
            LotSizing::EquityFraction { .. } => 0.0,
        };

        Self {
            sizer: PositionSizer::new(config.growth_factor),
            slots: (0..config.slots).map(Slot::new).collect(),
            round: Round::initial(config.round_budget),
            book: OrderBook::new(),
            run_id,
            seq: 0,
            base_lot,
            config,
        }
    }

    pub fn config(&self) -> &MartingaleConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut OrderBook {
        &mut self.book
    }

    pub fn base_lot(&self) -> f64 {
        self.base_lot
    }

    pub fn slot(&self, index: u32) -> GridResult<&Slot> {
        self.slots.get(index as usize).ok_or(GridError::SlotNotFound(index))
    }

    pub fn slot_mut(&mut self, index: u32) -> GridResult<&mut Slot> {
        self.slots.get_mut(index as usize).ok_or(GridError::SlotNotFound(index))
    }

    /// Unique label for the next order
    fn next_label(&mut self) -> String {
        self.seq += 1;
        format!("{}_{}_{}", self.config.label_prefix, self.run_id, self.seq)
    }

    /// Budget spent: the next close starts a new round
    pub fn should_rotate(&self) -> bool {
        self.round.budget_exhausted()
    }

    /// Escalated lot for a slot's current loss count
    pub fn lot_for(&self, index: u32) -> GridResult<f64> {
        let slot = self.slot(index)?;
        let lot = self.sizer.size(slot.consecutive_losses, self.base_lot);
        if lot <= 0.0 {
            return Err(GridError::ZeroLot {
                slot: index,
                base_lot: self.base_lot,
                losses: slot.consecutive_losses,
            });
        }
        Ok(lot)
    }

    /// Start a new round around `base_price` and lay out the stop grid
    pub async fn start_round<E: TradingEngine + ?Sized>(&mut self, engine: &E, base_price: f64) -> GridResult<()> {
        if self.config.close_orphans_on_rotation {
            for label in self.book.open_labels() {
                debug!("Closing order {} left from round {}", label, self.round.number);
                if let Err(e) = engine.close_order(&label).await {
                    warn!("Failed to close leftover order {}: {}", label, e);
                }
            }
        }

        if let LotSizing::EquityFraction { lots_per_unit } = self.config.lot_sizing {
            let equity = engine.account_equity().await?;
            self.base_lot = round_lot(equity * lots_per_unit);
            debug!("Base lot {} from equity {:.2}", self.base_lot, equity);
        }

        self.round = self.round.next(base_price);
        for slot in &mut self.slots {
            slot.reset_losses();
            slot.next_side = Slot::grid_leg(slot.index);
            slot.pending_label = None;
        }

        let leftovers = self.book.orphans(self.round.number).len();
        info!(
            "Round {} started at base price {} ({} slots, budget {}, {} leftover orders)",
            self.round.number, base_price, self.config.slots, self.round.budget, leftovers
        );

        let step = self.config.instrument.pips(self.config.grid_step_pips);
        for index in 0..self.config.slots {
            let side = Slot::grid_leg(index);
            let distance = Slot::grid_step(index) as f64 * step;
            let price = self
                .config
                .instrument
                .round_price(base_price + side.sign() * distance);
            let lot = self.lot_for(index)?;

            match self.place_order(engine, index, side, lot, price).await {
                Ok(label) => debug!("Slot {} {} stop {} @ {} -> {}", index, side.as_str(), lot, price, label),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("Slot {} grid order rejected: {}", index, e),
            }
        }

        Ok(())
    }

    /// Submit an order for `index`, record it in the side table and hand the
    /// slot its label. `price == 0.0` submits at market.
    pub async fn place_order<E: TradingEngine + ?Sized>(
        &mut self,
        engine: &E,
        index: u32,
        side: OrderSide,
        lot: f64,
        price: f64,
    ) -> GridResult<String> {
        if let Some(label) = &self.slot(index)?.pending_label {
            return Err(GridError::SlotBusy {
                slot: index,
                label: label.clone(),
            });
        }

        let label = self.next_label();
        let instrument = &self.config.instrument;
        let request = if price == 0.0 {
            OrderRequest::market(label.as_str(), instrument.name.as_str(), side, lot)
                .with_slippage(self.config.slippage_pips)
        } else {
            OrderRequest::stop(label.as_str(), instrument.name.as_str(), side, lot, price)
        };

        let handle = engine.submit(&request).await?;

        self.round.orders_placed += 1;
        self.book.register(
            handle.label.clone(),
            OrderEntry::new(index, self.round.number, side, lot, price),
        );
        self.slot_mut(index)?.pending_label = Some(handle.label.clone());

        debug!(
            "Placed {} (slot {}, round {}, {}/{} orders)",
            handle.label, index, self.round.number, self.round.orders_placed, self.round.budget
        );
        Ok(handle.label)
    }
}
