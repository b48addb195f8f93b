//! Controller error types

use thiserror::Error;

/// Errors that can occur while managing slots, rounds and orders
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid controller configuration: {0}")]
    InvalidConfig(String),

    #[error("Lot size computed to zero for slot {slot} (base lot {base_lot}, {losses} losses)")]
    ZeroLot { slot: u32, base_lot: f64, losses: u32 },

    #[error("Order event for untracked label: {0}")]
    UnknownOrder(String),

    #[error("Duplicate terminal event for label: {0}")]
    DuplicateEvent(String),

    #[error("Invalid order transition for {label}: {from:?} -> {to:?}")]
    InvalidTransition {
        label: String,
        from: super::types::OrderState,
        to: super::types::OrderState,
    },

    #[error("Slot not found: index {0}")]
    SlotNotFound(u32),

    #[error("Slot {slot} already owns order {label}")]
    SlotBusy { slot: u32, label: String },

    #[error("Order rejected by engine: {0}")]
    OrderRejected(String),

    #[error("No fill acknowledgement for {label} within {timeout_ms}ms")]
    FillTimeout { label: String, timeout_ms: u64 },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("State persistence error: {0}")]
    StatePersistence(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Controller is stopped")]
    Stopped,
}

impl GridError {
    /// Errors that mean the sizing or bookkeeping invariants no longer hold.
    ///
    /// The controller stops (closing every tracked order) instead of
    /// continuing on corrupted state when one of these surfaces.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GridError::ZeroLot { .. }
                | GridError::UnknownOrder(_)
                | GridError::SlotNotFound(_)
                | GridError::SlotBusy { .. }
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::StatePersistence(err.to_string())
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::InvalidConfig(err.to_string())
    }
}

/// Result type for controller operations
pub type GridResult<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GridError::ZeroLot { slot: 0, base_lot: 0.0001, losses: 0 }.is_fatal());
        assert!(GridError::UnknownOrder("mg_1".into()).is_fatal());
        assert!(!GridError::DuplicateEvent("mg_1".into()).is_fatal());
        assert!(!GridError::OrderRejected("margin".into()).is_fatal());
        assert!(!GridError::FillTimeout { label: "mg_1".into(), timeout_ms: 10 }.is_fatal());
    }

    #[test]
    fn test_display_mentions_label() {
        let err = GridError::UnknownOrder("mg_abc_7".into());
        assert!(err.to_string().contains("mg_abc_7"));
    }
}
