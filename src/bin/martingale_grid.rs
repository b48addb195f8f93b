//! Martingale Grid Replay Binary
//!
//! Runs the controller against the paper engine, replaying prices from a
//! JSON-lines file (one `MarketEvent` per line).
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin martingale_grid -- --config config.toml --ticks ticks.jsonl
//! ```
//!
//! Tick lines look like `{"type":"tick","instrument":"EURUSD","price":1.10125}`.
//! Settings can be overridden with `MGRID__SECTION__KEY` variables, also
//! read from a `.env` file.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::watch;

use martingale_grid::grid::{
    ChannelFeed, ControllerRunner, GridController, MarketEvent, PaperEngine,
};
use martingale_grid::Settings;

#[tokio::main]
async fn main() {
    // Load .env before settings so its variables can override them
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    let config_path = arg_value(&args, "--config").unwrap_or_else(|| PathBuf::from("config.toml"));
    let ticks_path = match arg_value(&args, "--ticks") {
        Some(path) => path,
        None => {
            eprintln!("Usage: martingale_grid [--config <settings>] --ticks <prices.jsonl>");
            std::process::exit(2);
        }
    };

    let settings = match Settings::new(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str())).init();
    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let strategy = settings.strategy;
    info!("Starting martingale grid for {}", strategy.instrument.name);
    info!(
        "Slots: {}, grid step: {} pips, take profit: {} pips",
        strategy.slots, strategy.grid_step_pips, strategy.take_profit_pips
    );
    info!(
        "Growth factor: {}, max losses: {}, round budget: {}",
        strategy.growth_factor, strategy.max_consecutive_losses, strategy.round_budget
    );

    let (engine, order_rx) = PaperEngine::new(strategy.instrument.clone(), settings.paper);
    let engine = Arc::new(engine);

    let controller = match GridController::new(strategy, engine.clone()) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            error!("Failed to create controller: {}", e);
            std::process::exit(1);
        }
    };

    let (market_tx, market_rx) = unbounded_channel();
    let mut runner = ControllerRunner::new(
        controller.clone(),
        ChannelFeed::new(market_rx),
        ChannelFeed::new(order_rx),
        settings.runner,
    );
    let replay = tokio::spawn(replay_ticks(ticks_path, engine, market_tx, runner.progress()));

    if let Err(e) = runner.run().await {
        error!("Runner error: {}", e);
    }
    // Releases a replay still waiting on progress
    drop(runner);

    match replay.await {
        Ok(count) => info!("Replayed {} price events", count),
        Err(e) => error!("Replay task failed: {}", e),
    }

    let stats = controller.stats().await;
    info!("Final: {}", stats.summary());
}

fn arg_value(args: &[String], flag: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Push every price through the paper engine first, so stops and
/// protection resolve before the controller sees the same price. The next
/// price waits until the runner has handled this one.
async fn replay_ticks(
    path: PathBuf,
    engine: Arc<PaperEngine>,
    market_tx: UnboundedSender<MarketEvent>,
    mut progress: watch::Receiver<u64>,
) -> usize {
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open {}: {}", path.display(), e);
            return 0;
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut count = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: MarketEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed line {}: {}", count + 1, e);
                continue;
            }
        };

        if event.instrument() == engine.instrument().name {
            engine.on_price(event.price()).await;
        }
        if market_tx.send(event).is_err() {
            break;
        }
        count += 1;
        if progress.wait_for(|n| *n >= count as u64).await.is_err() {
            warn!("Runner exited after {} price events", count);
            break;
        }
    }

    count
}
