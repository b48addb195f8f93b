//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::{GridError, GridResult};

/// Where the un-escalated lot comes from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LotSizing {
    /// Constant base lot
    Fixed { lot: f64 },
    /// Base lot = account equity * lots_per_unit, read when a round starts
    EquityFraction { lots_per_unit: f64 },
}

impl Default for LotSizing {
    fn default() -> Self {
        Self::Fixed { lot: 0.001 }
    }
}

/// Instrument the controller trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Instrument name as understood by the engine (e.g. "EURUSD")
    pub name: String,
    /// Price value of one pip (e.g. 0.0001 for EURUSD, 0.01 for USDJPY)
    pub pip_value: f64,
    /// Decimal places prices are rounded to
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
}

fn default_price_decimals() -> u32 {
    5
}

impl InstrumentSpec {
    pub fn new(name: impl Into<String>, pip_value: f64, price_decimals: u32) -> Self {
        Self {
            name: name.into(),
            pip_value,
            price_decimals,
        }
    }

    /// Round a price to the instrument precision (half away from zero)
    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.price_decimals as i32);
        (price * factor).round() / factor
    }

    /// Convert a pip distance to a price distance
    pub fn pips(&self, pips: f64) -> f64 {
        pips * self.pip_value
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MartingaleConfig {
    pub instrument: InstrumentSpec,

    /// Number of independent slots (the `maxTrades` / `segments` of a grid)
    pub slots: u32,

    /// Distance between successive grid legs, in pips
    pub grid_step_pips: f64,

    #[serde(default)]
    pub lot_sizing: LotSizing,

    /// Lot multiplier after each loss is `1 + growth_factor`
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    /// Loss ladder height; the ladder resets once it would exceed this
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Orders a round may place before the next close rotates it
    #[serde(default = "default_round_budget")]
    pub round_budget: u32,

    /// Fixed take-profit distance, in pips
    pub take_profit_pips: f64,

    /// Stop distance = take_profit_pips * risk_reward
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,

    /// Slippage allowed on market orders, in pips
    #[serde(default)]
    pub slippage_pips: f64,

    /// Bar period the controller reacts to (ticks are always accepted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_period_secs: Option<u64>,

    /// Upper bound on the synchronous fill wait for market orders
    #[serde(default = "default_fill_timeout")]
    pub fill_timeout_ms: u64,

    /// Place an identical order again when the engine cancels one
    #[serde(default)]
    pub resubmit_on_cancel: bool,

    /// Close orders left over from the previous round when a new one starts
    #[serde(default)]
    pub close_orphans_on_rotation: bool,

    /// Prefix of every order label
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// State snapshot file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

fn default_growth_factor() -> f64 {
    1.0
}

fn default_max_consecutive_losses() -> u32 {
    6
}

fn default_round_budget() -> u32 {
    50
}

fn default_risk_reward() -> f64 {
    1.0
}

fn default_fill_timeout() -> u64 {
    5_000
}

fn default_label_prefix() -> String {
    "mg".to_string()
}

impl MartingaleConfig {
    /// Create a configuration with the required parameters; everything else
    /// takes its default and can be changed with the builder methods.
    pub fn new(
        instrument: InstrumentSpec,
        slots: u32,
        grid_step_pips: f64,
        base_lot: f64,
        take_profit_pips: f64,
    ) -> Self {
        Self {
            instrument,
            slots,
            grid_step_pips,
            lot_sizing: LotSizing::Fixed { lot: base_lot },
            growth_factor: default_growth_factor(),
            max_consecutive_losses: default_max_consecutive_losses(),
            round_budget: default_round_budget(),
            take_profit_pips,
            risk_reward: default_risk_reward(),
            slippage_pips: 0.0,
            bar_period_secs: None,
            fill_timeout_ms: default_fill_timeout(),
            resubmit_on_cancel: false,
            close_orphans_on_rotation: false,
            label_prefix: default_label_prefix(),
            state_file: None,
        }
    }

    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    pub fn with_max_consecutive_losses(mut self, max: u32) -> Self {
        self.max_consecutive_losses = max;
        self
    }

    pub fn with_round_budget(mut self, budget: u32) -> Self {
        self.round_budget = budget;
        self
    }

    pub fn with_lot_sizing(mut self, sizing: LotSizing) -> Self {
        self.lot_sizing = sizing;
        self
    }

    pub fn with_risk_reward(mut self, risk_reward: f64) -> Self {
        self.risk_reward = risk_reward;
        self
    }

    pub fn with_slippage(mut self, pips: f64) -> Self {
        self.slippage_pips = pips;
        self
    }

    pub fn with_bar_period(mut self, secs: u64) -> Self {
        self.bar_period_secs = Some(secs);
        self
    }

    pub fn with_fill_timeout_ms(mut self, ms: u64) -> Self {
        self.fill_timeout_ms = ms;
        self
    }

    pub fn with_resubmit_on_cancel(mut self, enabled: bool) -> Self {
        self.resubmit_on_cancel = enabled;
        self
    }

    pub fn with_close_orphans_on_rotation(mut self, enabled: bool) -> Self {
        self.close_orphans_on_rotation = enabled;
        self
    }

    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Validate preconditions once, before any event is processed
    pub fn validate(&self) -> GridResult<()> {
        if self.instrument.name.is_empty() {
            return Err(GridError::InvalidConfig("instrument name cannot be empty".into()));
        }

        if self.instrument.pip_value <= 0.0 {
            return Err(GridError::InvalidConfig("pip_value must be positive".into()));
        }

        if self.slots == 0 {
            return Err(GridError::InvalidConfig("slots must be at least 1".into()));
        }

        if self.grid_step_pips <= 0.0 {
            return Err(GridError::InvalidConfig("grid_step_pips must be positive".into()));
        }

        match self.lot_sizing {
            LotSizing::Fixed { lot } if lot <= 0.0 => {
                return Err(GridError::InvalidConfig("fixed lot must be positive".into()));
            }
            LotSizing::EquityFraction { lots_per_unit } if lots_per_unit <= 0.0 => {
                return Err(GridError::InvalidConfig("lots_per_unit must be positive".into()));
            }
            _ => {}
        }

        if !(self.growth_factor > 0.0) {
            return Err(GridError::InvalidConfig("growth_factor must be positive".into()));
        }

        if self.round_budget == 0 {
            return Err(GridError::InvalidConfig("round_budget must be at least 1".into()));
        }

        if self.round_budget < self.slots {
            return Err(GridError::InvalidConfig(format!(
                "round_budget ({}) must cover the initial grid of {} orders",
                self.round_budget, self.slots
            )));
        }

        if self.take_profit_pips <= 0.0 {
            return Err(GridError::InvalidConfig("take_profit_pips must be positive".into()));
        }

        if self.risk_reward <= 0.0 {
            return Err(GridError::InvalidConfig("risk_reward must be positive".into()));
        }

        if self.slippage_pips < 0.0 {
            return Err(GridError::InvalidConfig("slippage_pips cannot be negative".into()));
        }

        if self.fill_timeout_ms == 0 {
            return Err(GridError::InvalidConfig("fill_timeout_ms must be at least 1".into()));
        }

        if self.label_prefix.is_empty() {
            return Err(GridError::InvalidConfig("label_prefix cannot be empty".into()));
        }

        Ok(())
    }

    /// Stop-loss distance in pips
    pub fn stop_loss_pips(&self) -> f64 {
        self.take_profit_pips * self.risk_reward
    }

    /// Load config from JSON file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to JSON file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> GridResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> MartingaleConfig {
    MartingaleConfig::new(InstrumentSpec::new("EURUSD", 0.0001, 5), 4, 10.0, 0.001, 20.0)
        .with_growth_factor(1.1)
        .with_max_consecutive_losses(7)
        .with_round_budget(50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());

        let mut config = test_config();
        config.growth_factor = -0.5;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.growth_factor = 0.0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.round_budget = 0;
        assert!(config.validate().is_err());

        // Budget smaller than the initial grid
        let mut config = test_config();
        config.round_budget = 3;
        assert!(config.validate().is_err());

        let config = test_config().with_lot_sizing(LotSizing::Fixed { lot: 0.0 });
        assert!(config.validate().is_err());

        let config = test_config().with_label_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_defaults_and_builders() {
        let config = MartingaleConfig::new(InstrumentSpec::new("EURUSD", 0.0001, 5), 4, 10.0, 0.01, 20.0);
        assert_eq!(config.growth_factor, 1.0);
        assert_eq!(config.max_consecutive_losses, 6);
        assert_eq!(config.round_budget, 50);
        assert_eq!(config.slippage_pips, 0.0);
        assert!(config.validate().is_ok());

        let config = config
            .with_growth_factor(0.5)
            .with_max_consecutive_losses(3)
            .with_round_budget(12)
            .with_slippage(1.5);
        assert_eq!(config.growth_factor, 0.5);
        assert_eq!(config.max_consecutive_losses, 3);
        assert_eq!(config.round_budget, 12);
        assert_eq!(config.slippage_pips, 1.5);

        assert!(config.with_slippage(-1.0).validate().is_err());
    }

    #[test]
    fn test_stop_loss_from_risk_reward() {
        let config = test_config().with_risk_reward(1.5);
        assert!((config.stop_loss_pips() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_price() {
        let instrument = InstrumentSpec::new("USDJPY", 0.01, 3);
        assert!((instrument.round_price(151.23449) - 151.234).abs() < 1e-9);
        assert!((instrument.round_price(151.23461) - 151.235).abs() < 1e-9);
        assert!((instrument.pips(15.0) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let json = r#"{
            "instrument": {"name": "EURUSD", "pip_value": 0.0001},
            "slots": 2,
            "grid_step_pips": 5.0,
            "lot_sizing": {"mode": "equity_fraction", "lots_per_unit": 0.00001},
            "growth_factor": 1.0,
            "max_consecutive_losses": 5,
            "round_budget": 20,
            "take_profit_pips": 10.0
        }"#;
        let config: MartingaleConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.instrument.price_decimals, 5);
        assert_eq!(config.label_prefix, "mg");
        assert!(!config.resubmit_on_cancel);
        assert_eq!(config.lot_sizing, LotSizing::EquityFraction { lots_per_unit: 0.00001 });
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        let config = test_config().with_resubmit_on_cancel(true);
        config.save_to_file(&path).unwrap();

        let loaded = MartingaleConfig::load_from_file(&path).unwrap();
        assert!(loaded.resubmit_on_cancel);
        assert_eq!(loaded.slots, 4);
    }
}
