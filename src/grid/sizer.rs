//! Loss-ladder position sizing

/// Lots are quoted with this many decimals
pub const LOT_DECIMALS: i32 = 3;

/// Maps a slot's consecutive-loss count to a lot size.
///
/// `size = round_half_up(base_lot * (1 + growth_factor)^losses, 3)`. With a
/// growth factor of 1.0 each loss doubles the lot, so the next win recovers
/// the previous losses plus one unit of profit. Callers guarantee
/// `growth_factor > 0`; `MartingaleConfig::validate` enforces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub growth_factor: f64,
}

impl PositionSizer {
    pub fn new(growth_factor: f64) -> Self {
        Self { growth_factor }
    }

    /// Lot for a slot that has lost `consecutive_losses` times in a row
    pub fn size(&self, consecutive_losses: u32, base_lot: f64) -> f64 {
        size(consecutive_losses, base_lot, self.growth_factor)
    }
}

/// Unrounded escalated lot
pub fn raw_size(consecutive_losses: u32, base_lot: f64, growth_factor: f64) -> f64 {
    base_lot * (1.0 + growth_factor).powi(consecutive_losses as i32)
}

/// Escalated lot rounded half-up to [`LOT_DECIMALS`] places
pub fn size(consecutive_losses: u32, base_lot: f64, growth_factor: f64) -> f64 {
    round_lot(raw_size(consecutive_losses, base_lot, growth_factor))
}

/// Round half-up to the lot precision. Lots are never negative, so
/// `f64::round` (half away from zero) is half-up here.
pub fn round_lot(lot: f64) -> f64 {
    let factor = 10f64.powi(LOT_DECIMALS);
    // The nudge keeps values like 0.0045 (stored as 0.00449999..) on the upper side
    ((lot * factor) + 1e-9).round() / factor
}
