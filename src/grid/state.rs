//! Slot, round and order bookkeeping, plus JSON snapshots of it

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::stats::StatsAccumulator;
use super::types::{ControllerStatus, OrderKind, OrderSide, OrderState};

/// One independent position-management lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Stable identity within a round
    pub index: u32,
    /// Losses since the last win or ladder reset
    pub consecutive_losses: u32,
    /// Label of the order this slot currently owns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_label: Option<String>,
    /// Direction of the slot's next order
    pub next_side: OrderSide,
}

impl Slot {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            consecutive_losses: 0,
            pending_label: None,
            next_side: Self::grid_leg(index),
        }
    }

    /// Even slots take the upward (buy-stop) leg, odd slots the downward one
    pub fn grid_leg(index: u32) -> OrderSide {
        if index % 2 == 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    /// Grid step multiple for this slot's leg: pairs share a distance
    pub fn grid_step(index: u32) -> u32 {
        index / 2 + 1
    }

    pub fn has_open_order(&self) -> bool {
        self.pending_label.is_some()
    }

    pub fn reset_losses(&mut self) {
        self.consecutive_losses = 0;
    }

    /// Release the slot if it still owns `label`
    pub fn release(&mut self, label: &str) -> bool {
        if self.pending_label.as_deref() == Some(label) {
            self.pending_label = None;
            true
        } else {
            false
        }
    }
}

/// A bounded batch of grid orders sharing a base price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub number: u64,
    pub base_price: f64,
    pub orders_placed: u32,
    pub budget: u32,
    pub started_at: DateTime<Utc>,
}

impl Round {
    /// Round 0: nothing traded yet
    pub fn initial(budget: u32) -> Self {
        Self {
            number: 0,
            base_price: 0.0,
            orders_placed: 0,
            budget,
            started_at: Utc::now(),
        }
    }

    /// The next round, counters zeroed
    pub fn next(&self, base_price: f64) -> Self {
        Self {
            number: self.number + 1,
            base_price,
            orders_placed: 0,
            budget: self.budget,
            started_at: Utc::now(),
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.orders_placed > self.budget
    }
}

/// Side-table entry: what the controller knows about one tracked label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub slot_index: u32,
    pub round: u64,
    pub side: OrderSide,
    pub lot: f64,
    /// Trigger price for stops, 0.0 for market orders
    pub price: f64,
    pub kind: OrderKind,
    pub state: OrderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_price: Option<f64>,
    /// Given up on locally; the engine was asked to close it and its
    /// terminal event is still expected
    #[serde(default)]
    pub cancel_requested: bool,
}

impl OrderEntry {
    pub fn new(slot_index: u32, round: u64, side: OrderSide, lot: f64, price: f64) -> Self {
        Self {
            slot_index,
            round,
            side,
            lot,
            price,
            kind: if price == 0.0 { OrderKind::Market } else { OrderKind::Stop },
            state: OrderState::Submitted,
            open_price: None,
            cancel_requested: false,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, label: &str, next: OrderState) -> GridResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(GridError::InvalidTransition {
                label: label.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Label -> entry map, with a memory of retired labels so replays of a
/// terminal event can be told apart from labels that were never ours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    open: HashMap<String, OrderEntry>,
    #[serde(default)]
    retired: HashSet<String>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, label: impl Into<String>, entry: OrderEntry) {
        self.open.insert(label.into(), entry);
    }

    pub fn get(&self, label: &str) -> Option<&OrderEntry> {
        self.open.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut OrderEntry> {
        self.open.get_mut(label)
    }

    /// Look a label up for an incoming event
    pub fn lookup(&self, label: &str) -> GridResult<&OrderEntry> {
        match self.open.get(label) {
            Some(entry) => Ok(entry),
            None if self.retired.contains(label) => Err(GridError::DuplicateEvent(label.to_string())),
            None => Err(GridError::UnknownOrder(label.to_string())),
        }
    }

    /// Stop tracking a label after its terminal event
    pub fn retire(&mut self, label: &str) -> Option<OrderEntry> {
        let entry = self.open.remove(label)?;
        self.retired.insert(label.to_string());
        debug!("Retired order {} (slot {}, round {})", label, entry.slot_index, entry.round);
        Some(entry)
    }

    pub fn is_retired(&self, label: &str) -> bool {
        self.retired.contains(label)
    }

    pub fn open_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.open.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Labels still tracked from rounds before `current_round`
    pub fn orphans(&self, current_round: u64) -> Vec<String> {
        let mut labels: Vec<String> = self
            .open
            .iter()
            .filter(|(_, e)| e.round < current_round)
            .map(|(l, _)| l.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn open_entries(&self) -> Vec<(String, OrderEntry)> {
        let mut entries: Vec<(String, OrderEntry)> =
            self.open.iter().map(|(l, e)| (l.clone(), e.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Point-in-time copy of the controller state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub run_id: String,
    pub status: ControllerStatus,
    pub round: Round,
    pub slots: Vec<Slot>,
    pub stats: StatsAccumulator,
    pub open_orders: Vec<(String, OrderEntry)>,
    pub last_price: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl ControllerSnapshot {
    /// Load snapshot from file
    pub fn load_from_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content)?;
        Ok(snapshot)
    }

    /// Save snapshot atomically (write to temp, then rename)
    pub fn save_to_file_atomic(&self, path: impl AsRef<Path>) -> GridResult<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }
}

/// Where snapshots go, if anywhere
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    path: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn save(&self, snapshot: &ControllerSnapshot) -> GridResult<()> {
        if let Some(path) = &self.path {
            snapshot.save_to_file_atomic(path)?;
            debug!("Snapshot saved to {:?}", path);
        }
        Ok(())
    }
}
