//! Win/loss and P&L tallies, read at shutdown

use serde::{Deserialize, Serialize};

/// Monotonic accumulators over closed orders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsAccumulator {
    pub wins: u32,
    pub losses: u32,
    /// Sum of realized P&L in account currency
    pub equity: f64,
    /// Sum of commissions in account currency
    pub commission: f64,
    /// Loss ladders that capped out and reset
    #[serde(default)]
    pub final_losses: u32,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one close. Callers dedupe by label through the order book.
    pub fn record_close(&mut self, profit_pips: f64, pnl_usd: f64, commission_usd: f64) {
        if profit_pips >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.equity += pnl_usd;
        self.commission += commission_usd;
    }

    pub fn record_final_loss(&mut self) {
        self.final_losses += 1;
    }

    pub fn trades(&self) -> u32 {
        self.wins + self.losses
    }

    /// wins / (wins + losses), 0 when nothing closed yet
    pub fn win_rate(&self) -> f64 {
        let trades = self.trades();
        if trades == 0 {
            0.0
        } else {
            self.wins as f64 / trades as f64
        }
    }

    /// Net result after commission
    pub fn net(&self) -> f64 {
        self.equity - self.commission
    }

    /// End-of-run narration line
    pub fn summary(&self) -> String {
        format!(
            "trades={} wins={} losses={} win_rate={:.1}% final_losses={} pnl={:.2} commission={:.2} net={:.2}",
            self.trades(),
            self.wins,
            self.losses,
            self.win_rate() * 100.0,
            self.final_losses,
            self.equity,
            self.commission,
            self.net()
        )
    }
}
