pub mod config;
pub mod grid;

pub use config::{LogConfig, Settings};
pub use grid::{GridController, GridError, GridResult, MartingaleConfig};
