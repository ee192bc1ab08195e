//! End-to-end executor tests, grounded in the teacher's
//! `tests/e2e_trading_flow.rs` shape: assemble the real adapters against
//! an in-memory database, drive signals through the queue, and assert on
//! the resulting persisted state.

use signalforge::application::executor::OrderExecutor;
use signalforge::config::AppConfig;
use signalforge::domain::ports::{OrderStore, SignalQueue, StopStore};
use signalforge::domain::types::{Indicators, Signal, SignalKind, StopStatus};
use signalforge::infrastructure::observability::Metrics;
use signalforge::infrastructure::persistence::{Database, SqliteOrderStore, SqliteQueue, SqliteStopStore};
use signalforge::infrastructure::{MockBroker, MockQuoteSource, WebhookNotifier};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env().expect("default env config should always load");
    config.worker_count = 1;
    config.visibility_timeout_secs = 30;
    config
}

fn buy_signal(symbol: &str) -> Signal {
    Signal {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: symbol.to_string(),
        kind: SignalKind::StrongBuy,
        score: 80.0,
        reference_price: 100.0,
        indicators: Indicators::default(),
        stop_loss: 94.0,
        take_profit: 115.0,
        generated_at: chrono::Utc::now().timestamp(),
    }
}

async fn build_executor(symbol: &str) -> (Arc<OrderExecutor>, Arc<dyn SignalQueue>, Arc<dyn StopStore>, Arc<dyn OrderStore>) {
    let db = Database::new("sqlite::memory:").await.expect("in-memory db");
    let queue: Arc<dyn SignalQueue> = Arc::new(SqliteQueue::new(db.pool.clone(), Duration::from_secs(30)));
    let stops: Arc<dyn StopStore> = Arc::new(SqliteStopStore::new(db.pool.clone()));
    let order_store: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::new(db.pool.clone()));
    let quotes = Arc::new(MockQuoteSource::new(&[symbol.to_string()]));
    let broker = Arc::new(MockBroker::new());
    let notifier = Arc::new(WebhookNotifier::spawn(None));
    let metrics = Arc::new(Metrics::new().expect("metrics"));

    let executor = Arc::new(OrderExecutor {
        quotes,
        broker,
        stops: stops.clone(),
        order_store: order_store.clone(),
        queue: queue.clone(),
        notifier,
        metrics,
        config: test_config(),
        worker_id: 0,
    });

    (executor, queue, stops, order_store)
}

#[tokio::test]
async fn buy_signal_opens_a_position_and_an_active_stop_contract() {
    let symbol = "TEST.US";
    let (executor, queue, stops, order_store) = build_executor(symbol).await;

    queue.publish(buy_signal(symbol)).await.expect("publish buy");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(executor.clone().run(cancel.clone()));

    let contract = wait_for(|| async { stops.get_active(symbol).await.ok().flatten() }).await;
    cancel.cancel();
    let _ = handle.await;

    assert!(contract.is_some(), "expected an active stop contract after a filled buy");
    let contract = contract.unwrap();
    assert_eq!(contract.status, StopStatus::Active);
    assert!(contract.quantity > rust_decimal::Decimal::ZERO);

    let today_buys = order_store.today_buy_symbols().await.expect("today buys");
    assert!(today_buys.contains(symbol));
}

#[tokio::test]
async fn a_second_buy_for_an_already_held_symbol_acks_without_a_second_fill() {
    // A fresh signal (distinct id) for a symbol that already has an open
    // position must dedup-ack rather than place a second order — the
    // generator is expected to filter these out itself, but the executor
    // re-checks before spending buy power as a second line of defense.
    let symbol = "DEDUP.US";
    let (executor, queue, stops, order_store) = build_executor(symbol).await;

    queue.publish(buy_signal(symbol)).await.expect("publish first buy");
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(executor.clone().run(cancel.clone()));
    wait_for(|| async { stops.get_active(symbol).await.ok().flatten() }).await;

    let qty_after_first = executor.broker.positions().await.expect("positions")[0].qty;

    queue.publish(buy_signal(symbol)).await.expect("publish second buy, same symbol");
    let stats_before = queue.stats().await.expect("stats");
    wait_for(|| async {
        let stats = queue.stats().await.ok()?;
        (stats.succeeded > stats_before.succeeded).then_some(())
    })
    .await;
    cancel.cancel();
    let _ = handle.await;

    let positions = executor.broker.positions().await.expect("positions");
    let position = positions.iter().find(|p| p.symbol == symbol).expect("position still exists");
    assert_eq!(position.qty, qty_after_first, "the second buy must not add to the position");

    let today_buys = order_store.today_buy_symbols().await.expect("today buys");
    assert!(today_buys.contains(symbol));
}

async fn wait_for<F, Fut, T>(mut poll: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..40 {
        if let Some(v) = poll().await {
            return Some(v);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}
