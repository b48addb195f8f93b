use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::grid::{GridResult, MartingaleConfig, PaperConfig, RunnerConfig};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Controller parameters (instrument, grid, ladder, policies)
    pub strategy: MartingaleConfig,
    /// Paper account used by the replay binary
    #[serde(default)]
    pub paper: PaperConfig,
    /// Event loop tuning
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file (TOML, JSON or YAML by
    /// extension), with `MGRID__SECTION__KEY` environment overrides.
    pub fn new(config_path: impl AsRef<Path>) -> GridResult<Self> {
        let s = Config::builder()
            .add_source(File::from(config_path.as_ref()))
            // e.g. MGRID__STRATEGY__ROUND_BUDGET=80
            .add_source(Environment::with_prefix("MGRID").separator("__").try_parsing(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.strategy.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::LotSizing;

    const TOML: &str = r#"
[strategy]
slots = 6
grid_step_pips = 15.0
growth_factor = 1.0
max_consecutive_losses = 5
round_budget = 40
take_profit_pips = 25.0
resubmit_on_cancel = true

[strategy.instrument]
name = "GBPUSD"
pip_value = 0.0001

[strategy.lot_sizing]
mode = "fixed"
lot = 0.01

[paper]
initial_equity = 5000.0
commission_per_lot = 7.0

[log]
level = "debug"
"#;

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, TOML).unwrap();

        let settings = Settings::new(&path).unwrap();
        assert_eq!(settings.strategy.slots, 6);
        assert_eq!(settings.strategy.instrument.name, "GBPUSD");
        assert_eq!(settings.strategy.lot_sizing, LotSizing::Fixed { lot: 0.01 });
        assert!(settings.strategy.resubmit_on_cancel);
        assert!((settings.paper.initial_equity - 5000.0).abs() < 1e-9);
        assert!((settings.paper.pip_value_per_lot - 10.0).abs() < 1e-9);
        assert_eq!(settings.runner.max_consecutive_errors, 5);
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, TOML.replace("round_budget = 40", "round_budget = 2")).unwrap();

        assert!(Settings::new(&path).is_err());
    }
}
