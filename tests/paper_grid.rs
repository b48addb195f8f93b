use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use martingale_grid::grid::{
    ChannelFeed, ControllerRunner, ControllerSnapshot, ControllerStatus, GridController, InstrumentSpec,
    MarketEvent, MartingaleConfig, OrderEvent, OrderSide, PaperConfig, PaperEngine, RunnerConfig, TradingEngine,
};

fn eurusd_config() -> MartingaleConfig {
    MartingaleConfig::new(InstrumentSpec::new("EURUSD", 0.0001, 5), 4, 10.0, 0.001, 20.0)
        .with_growth_factor(1.1)
        .with_max_consecutive_losses(7)
        .with_round_budget(50)
}

async fn pump(controller: &GridController<PaperEngine>, rx: &mut UnboundedReceiver<OrderEvent>) {
    while let Ok(event) = rx.try_recv() {
        let _ = controller.on_order_event(&event).await;
    }
}

#[tokio::test]
async fn test_paper_ladder_walkthrough() {
    let config = eurusd_config();
    let (engine, mut order_rx) = PaperEngine::new(config.instrument.clone(), PaperConfig::default());
    let engine = Arc::new(engine);
    let controller = GridController::new(config, engine.clone()).unwrap();

    // Round 1 laid out around 1.1000
    engine.on_price(1.1).await;
    controller.on_market_event(&MarketEvent::tick("EURUSD", 1.1)).await.unwrap();
    assert_eq!(engine.pending_orders().await, 4);

    // Slot 0 buy stop (1.1010) triggers
    engine.on_price(1.1012).await;
    pump(&controller, &mut order_rx).await;
    assert_eq!(engine.open_positions().await, 1);

    // Take profit at 1.1032 (+20 pips); slot 2 buy stop (1.1020) triggers on the same move
    engine.on_price(1.1032).await;
    pump(&controller, &mut order_rx).await;

    let stats = controller.stats().await;
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.losses, 0);
    assert_eq!(controller.round().await.orders_placed, 5);
    // Slot 0 replacement plus slot 2
    assert_eq!(engine.open_positions().await, 2);

    // Both longs stop out at -50 pips; slot 1 sell stop (1.0990) triggers
    engine.on_price(1.0982).await;
    pump(&controller, &mut order_rx).await;

    let stats = controller.stats().await;
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.losses, 2);
    assert!((stats.equity - (0.2 - 1.0)).abs() < 1e-9);

    let snapshot = controller.snapshot().await;
    for index in [0, 2] {
        assert_eq!(snapshot.slots[index].consecutive_losses, 1);
        assert_eq!(snapshot.slots[index].next_side, OrderSide::Sell);
    }
    assert_eq!(snapshot.round.orders_placed, 7);
    assert_eq!(engine.open_positions().await, 3);

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, ControllerStatus::Stopped);
    assert_eq!(engine.open_positions().await, 0);
    assert_eq!(engine.pending_orders().await, 0);
}

#[tokio::test]
async fn test_runner_replays_prices_over_paper_engine() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("grid_state.json");
    let config = eurusd_config().with_state_file(&state_path);

    let (engine, order_rx) = PaperEngine::new(config.instrument.clone(), PaperConfig::default());
    let engine = Arc::new(engine);
    let controller = Arc::new(GridController::new(config, engine.clone()).unwrap());

    let (market_tx, market_rx) = unbounded_channel();
    let mut runner = ControllerRunner::new(
        controller.clone(),
        ChannelFeed::new(market_rx),
        ChannelFeed::new(order_rx),
        RunnerConfig::default(),
    );
    let mut progress = runner.progress();
    let handle = tokio::spawn(async move { runner.run().await });

    for (count, price) in [1.1, 1.1012, 1.1032, 1.0982].into_iter().enumerate() {
        engine.on_price(price).await;
        market_tx.send(MarketEvent::tick("EURUSD", price)).unwrap();
        progress.wait_for(|n| *n > count as u64).await.unwrap();
    }

    // Same state as the hand-pumped walkthrough
    let stats = controller.stats().await;
    assert_eq!((stats.wins, stats.losses), (1, 2));
    assert_eq!(controller.round().await.orders_placed, 7);
    assert_eq!(engine.open_positions().await, 3);
    drop(market_tx);

    handle.await.unwrap().unwrap();

    assert_eq!(controller.status().await, ControllerStatus::Stopped);
    assert_eq!(engine.open_positions().await, 0);
    assert_eq!(engine.pending_orders().await, 0);

    // The three positions closed at stop are booked too
    let stats = controller.stats().await;
    assert_eq!(stats.trades(), 6);
    let realized = engine.account_equity().await.unwrap() - PaperConfig::default().initial_equity;
    assert!((stats.net() - realized).abs() < 1e-9);

    let snapshot = ControllerSnapshot::load_from_file(&state_path).unwrap();
    assert_eq!(snapshot.status, ControllerStatus::Stopped);
    assert_eq!(snapshot.stats.trades(), 6);
    assert!(snapshot.open_orders.is_empty());
}

#[tokio::test]
async fn test_stop_books_positions_it_closes() {
    let config = eurusd_config();
    let paper = PaperConfig {
        commission_per_lot: 7.0,
        ..PaperConfig::default()
    };
    let (engine, mut order_rx) = PaperEngine::new(config.instrument.clone(), paper.clone());
    let engine = Arc::new(engine);
    let controller = GridController::new(config, engine.clone()).unwrap();

    engine.on_price(1.1).await;
    controller.on_market_event(&MarketEvent::tick("EURUSD", 1.1)).await.unwrap();

    // Slot 0 buy stop triggers, then slot 2 on the way up to 1.1025
    engine.on_price(1.1012).await;
    pump(&controller, &mut order_rx).await;
    engine.on_price(1.1025).await;
    pump(&controller, &mut order_rx).await;
    assert_eq!(engine.open_positions().await, 2);
    assert_eq!(controller.stats().await.trades(), 0);

    controller.close_all().await.unwrap();
    assert_eq!(controller.status().await, ControllerStatus::Stopping);
    pump(&controller, &mut order_rx).await;
    assert_eq!(controller.open_orders().await, 0);
    controller.stop().await.unwrap();

    // +13 pips on slot 0, flat on slot 2, both at 0.001 lots
    let stats = controller.stats().await;
    assert_eq!(stats.wins, 2);
    assert!((stats.equity - 0.13).abs() < 1e-9);
    assert!((stats.commission - 0.014).abs() < 1e-9);

    let realized = engine.account_equity().await.unwrap() - paper.initial_equity;
    assert!((stats.net() - realized).abs() < 1e-9);
}
