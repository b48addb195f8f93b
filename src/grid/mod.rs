//! Grid / martingale position management
//!
//! A fixed set of *slots* each runs its own loss ladder: every losing close
//! grows the slot's next lot by `1 + growth_factor` and flips its direction,
//! every winning close resets it. Slots are laid out as a symmetric stop grid
//! around a base price and traded in *rounds*; once a round has placed more
//! orders than its budget, the next close starts a fresh round around the
//! close price.
//!
//! # Architecture
//!
//! - [`config`] - Controller configuration and validation
//! - [`types`] - Core data types (OrderSide, OrderEvent, MarketEvent, ...)
//! - [`errors`] - Controller error types
//! - [`sizer`] - Loss ladder lot sizing
//! - [`state`] - Slots, rounds, the order side table and JSON snapshots
//! - [`stats`] - Win/loss and P&L accumulators
//! - [`executor`] - Trading engine abstraction (mockable for testing)
//! - [`round`] - Round layout and order placement
//! - [`lifecycle`] - Fill / close / cancel handling
//! - [`controller`] - Public facade, one lock around all state
//! - [`paper`] - Simulated engine for running without a broker
//! - [`runner`] - Main execution loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use martingale_grid::grid::{
//!     ControllerRunner, GridController, InstrumentSpec, MartingaleConfig, PaperConfig,
//!     PaperEngine, RunnerConfig,
//! };
//!
//! // 4 slots, 10 pip grid, 0.01 base lot doubling per loss, 20 pip target
//! let config = MartingaleConfig::new(InstrumentSpec::new("EURUSD", 0.0001, 5), 4, 10.0, 0.01, 20.0)
//!     .with_growth_factor(1.0)
//!     .with_max_consecutive_losses(6)
//!     .with_round_budget(50)
//!     .with_state_file("grid_state.json");
//!
//! let (engine, order_rx) = PaperEngine::new(config.instrument.clone(), PaperConfig::default());
//! let controller = Arc::new(GridController::new(config, Arc::new(engine))?);
//!
//! let mut runner = ControllerRunner::new(
//!     controller,
//!     ChannelFeed::new(market_rx),
//!     ChannelFeed::new(order_rx),
//!     RunnerConfig::default(),
//! );
//! runner.run().await?;
//! ```
//!
//! # Testing
//!
//! ```rust,ignore
//! use martingale_grid::grid::executor::mock::{market_feed, order_feed, MockEngine};
//!
//! let engine = MockEngine::new(1.1);
//! let (market, market_tx) = market_feed();
//! let (orders, order_tx) = order_feed();
//! ```

pub mod config;
pub mod controller;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod paper;
pub mod round;
pub mod runner;
pub mod sizer;
pub mod state;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::{InstrumentSpec, LotSizing, MartingaleConfig};
pub use controller::GridController;
pub use errors::{GridError, GridResult};
pub use executor::{ChannelFeed, MarketFeed, OrderEventFeed, TradingEngine};
pub use lifecycle::OrderLifecycleController;
pub use paper::{PaperConfig, PaperEngine};
pub use round::RoundManager;
pub use runner::{ControllerRunner, RunnerConfig};
pub use sizer::PositionSizer;
pub use state::{ControllerSnapshot, OrderBook, OrderEntry, Round, Slot, SnapshotStore};
pub use stats::StatsAccumulator;
pub use types::{
    ControllerStatus, FillAck, MarketEvent, OrderEvent, OrderHandle, OrderKind, OrderRequest, OrderSide,
    OrderState, Protection,
};
