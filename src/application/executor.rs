//! Order Executor Worker (C9). Grounded in the teacher's
//! `agents::executor::Executor::handle_order` idempotency-via-pre-persist
//! pattern and its `tokio::select!`-driven consume loop.

use crate::config::AppConfig;
use crate::domain::errors::ExecutionError;
use crate::domain::ports::{BrokerClient, Notifier, OrderStore, QuoteSource, SignalQueue, StopStore};
use crate::domain::tick;
use crate::domain::types::{
    market_of, Depth, Market, OrderRecord, OrderSide, OrderState, OrderType, Signal,
    StopContract, StopStatus, TimeInForce,
};
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const LOT_SIZE: Decimal = rust_decimal_macros::dec!(100);
const CONSUME_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_NATIVE_BUY_POWER: Decimal = rust_decimal_macros::dec!(1000);

pub struct OrderExecutor {
    pub quotes: Arc<dyn QuoteSource>,
    pub broker: Arc<dyn BrokerClient>,
    pub stops: Arc<dyn StopStore>,
    pub order_store: Arc<dyn OrderStore>,
    pub queue: Arc<dyn SignalQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
    pub config: AppConfig,
    pub worker_id: usize,
}

impl OrderExecutor {
    async fn depth_or_reference(&self, symbol: &str, reference_price: Decimal) -> Depth {
        match self.quotes.depth(symbol).await {
            Ok(depth) => depth,
            Err(_) => Depth { bid: reference_price, ask: reference_price },
        }
    }

    #[instrument(skip(self, cancel), fields(worker = self.worker_id))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!("executor worker shutting down");
                return;
            }
            let signal = match self.queue.consume(CONSUME_TIMEOUT).await {
                Ok(Some(signal)) => signal,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "consume failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let signal_id = signal.id.clone();
            let result = if signal.kind.is_buy() {
                self.handle_buy(&signal).await
            } else {
                self.handle_sell(&signal).await
            };

            match result {
                Ok(Disposition::Ack) => {
                    if let Err(e) = self.queue.ack(&signal_id).await {
                        warn!(error = %e, %signal_id, "ack failed");
                    }
                }
                Err(e) => {
                    let retryable = e.retryable();
                    warn!(error = %e, %signal_id, retryable, "signal handling failed");
                    if let Err(e) = self.queue.fail(&signal_id, retryable).await {
                        warn!(error = %e, %signal_id, "fail failed");
                    }
                }
            }
        }
    }

    /// §4.9 BUY handling, 9 steps.
    #[instrument(skip(self, signal), fields(symbol = %signal.symbol, score = signal.score))]
    async fn handle_buy(&self, signal: &Signal) -> Result<Disposition, ExecutionError> {
        let market = market_of(&signal.symbol)
            .ok_or_else(|| ExecutionError::PriceRejected(format!("unknown market for {}", signal.symbol)))?;

        // Step 1: re-check position/same-day dedup; a hit is not a failure.
        let positions = self.broker.positions().await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        let open_positions: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        if open_positions.contains(&signal.symbol) {
            return Ok(Disposition::Ack);
        }
        let today_buy = self.order_store.today_buy_symbols().await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        if today_buy.contains(&signal.symbol) {
            return Ok(Disposition::Ack);
        }

        // Idempotency (§5): resume polling rather than resubmit if this
        // signal already produced an order.
        if let Ok(Some(existing)) = self.order_store.find_by_client_id(&signal.id).await
            && let Some(broker_order_id) = &existing.broker_order_id
        {
            return self.poll_and_finish_buy(signal, existing.clone(), broker_order_id.clone()).await;
        }

        // Step 2: effective buy power with HK->USD fallback.
        let account = self.broker.account_balance().await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        let native_currency = match market {
            Market::Hk => "HKD",
            Market::Us => "USD",
        };
        let native = account.buy_power_by_currency.get(native_currency);
        let buy_power = match native {
            Some(balance) if balance.buy_power >= MIN_NATIVE_BUY_POWER => balance.buy_power,
            _ => {
                let fallback_currency = if native_currency == "HKD" { "USD" } else { "HKD" };
                let fallback = account
                    .buy_power_by_currency
                    .get(fallback_currency)
                    .ok_or(ExecutionError::InsufficientFunds { need: MIN_NATIVE_BUY_POWER, available: Decimal::ZERO })?;
                let fx = Decimal::try_from(self.config.fx_hkd_per_usd).unwrap_or(Decimal::ONE);
                let converted = if fallback_currency == "USD" && native_currency == "HKD" {
                    fallback.buy_power * fx
                } else {
                    fallback.buy_power / fx
                };
                if converted < MIN_NATIVE_BUY_POWER {
                    return Err(ExecutionError::InsufficientFunds { need: MIN_NATIVE_BUY_POWER, available: converted });
                }
                converted
            }
        };

        // Step 3-4: dynamic budget fraction, linear over [30,100] -> [min,max].
        let fraction = budget_fraction(signal.score, self.config.budget_fraction_min, self.config.budget_fraction_max);
        let target_value = buy_power * Decimal::try_from(fraction).unwrap_or(Decimal::ZERO);

        // Step 5: price at min(ask, reference+one_tick), reject if >1% above reference.
        let reference_price = Decimal::try_from(signal.reference_price).unwrap_or(Decimal::ZERO);
        let depth = self.depth_or_reference(&signal.symbol, reference_price).await;
        let one_tick = tick_size_of(market, reference_price);
        let candidate_price = depth.ask.min(reference_price + one_tick);
        let price = tick::round_to_tick(market, candidate_price);
        if price > reference_price * rust_decimal_macros::dec!(1.01) {
            return Err(ExecutionError::PriceRejected(format!("{price} is more than 1% above reference {reference_price}")));
        }
        if price <= Decimal::ZERO {
            return Err(ExecutionError::PriceRejected("non-positive price".to_string()));
        }

        // Step 6: quantity, lot-quantized.
        let raw_qty = target_value / price;
        let quantity = (raw_qty / LOT_SIZE).floor() * LOT_SIZE;
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::QuantityZero);
        }

        // Step 7: submit, persist pending, poll status.
        let broker_order_id = {
            let _guard = self.metrics.latency_guard();
            self.broker
                .submit_order(&signal.id, &signal.symbol, OrderSide::Buy, quantity, price, OrderType::Limit, TimeInForce::Day)
                .await?
        };

        let mut record = OrderRecord {
            id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            side: OrderSide::Buy,
            quantity,
            price,
            state: OrderState::PendingSubmit,
            submitted_at: now_unix(),
            broker_order_id: Some(broker_order_id.clone()),
        };
        self.order_store.save(&record).await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;

        record.state = self.poll_order_state(&broker_order_id).await?;
        self.order_store.save(&record).await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        self.metrics.inc_order("buy", order_state_label(record.state));

        self.finish_buy_if_filled(signal, &record).await
    }

    async fn poll_and_finish_buy(&self, signal: &Signal, mut record: OrderRecord, broker_order_id: String) -> Result<Disposition, ExecutionError> {
        if record.state == OrderState::Filled {
            return Ok(Disposition::Ack);
        }
        record.state = self.poll_order_state(&broker_order_id).await?;
        self.order_store.save(&record).await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        self.finish_buy_if_filled(signal, &record).await
    }

    async fn poll_order_state(&self, broker_order_id: &str) -> Result<OrderState, ExecutionError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let (state, _filled_qty, _avg_price) = self.broker.order_status(broker_order_id).await?;
            if matches!(state, OrderState::Filled | OrderState::Failed | OrderState::Cancelled) || tokio::time::Instant::now() >= deadline {
                return Ok(state);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Step 8-9: on fill, write the stop contract and attempt backup
    /// orders (failures there must not fail the BUY), then ack+notify.
    async fn finish_buy_if_filled(&self, signal: &Signal, record: &OrderRecord) -> Result<Disposition, ExecutionError> {
        if !matches!(record.state, OrderState::Filled | OrderState::PartiallyFilled) {
            if record.state == OrderState::Failed || record.state == OrderState::Cancelled {
                return Err(ExecutionError::PriceRejected("order did not fill".to_string()));
            }
            // Still live/pending: ack for now, the periodic reconciliation
            // will catch up via the idempotent client-id lookup.
            return Ok(Disposition::Ack);
        }

        let now = now_unix();
        let contract = StopContract {
            symbol: signal.symbol.clone(),
            entry_price: record.price,
            quantity: record.quantity,
            stop_loss: Decimal::try_from(signal.stop_loss).unwrap_or_default(),
            take_profit: Decimal::try_from(signal.take_profit).unwrap_or_default(),
            backup_stop_order_id: None,
            backup_tp_order_id: None,
            status: StopStatus::Active,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.stops.put(contract).await {
            warn!(error = %e, symbol = %signal.symbol, "failed to persist stop contract");
        }

        let stop_limit = contract_stop_limit(Decimal::try_from(signal.stop_loss).unwrap_or_default());
        let backup_stop = self
            .broker
            .submit_conditional(&signal.symbol, OrderSide::Sell, record.quantity, Decimal::try_from(signal.stop_loss).unwrap_or_default(), stop_limit)
            .await;
        let backup_tp = self
            .broker
            .submit_conditional(&signal.symbol, OrderSide::Sell, record.quantity, Decimal::try_from(signal.take_profit).unwrap_or_default(), Decimal::try_from(signal.take_profit).unwrap_or_default())
            .await;

        match (backup_stop, backup_tp) {
            (Ok(stop_id), Ok(tp_id)) => {
                if let Err(e) = self.stops.attach_backup(&signal.symbol, &stop_id, &tp_id).await {
                    warn!(error = %e, symbol = %signal.symbol, "failed to attach backup order ids");
                }
            }
            _ => warn!(symbol = %signal.symbol, "backup order submission failed; BUY still succeeds"),
        }

        self.notifier.notify(format!("BUY filled {} qty={} price={}", signal.symbol, record.quantity, record.price)).await;
        Ok(Disposition::Ack)
    }

    /// §4.9 SELL handling, 5 steps.
    #[instrument(skip(self, signal), fields(symbol = %signal.symbol))]
    async fn handle_sell(&self, signal: &Signal) -> Result<Disposition, ExecutionError> {
        let contract = self.stops.get_active(&signal.symbol).await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        let positions = self.broker.positions().await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;
        let position = positions.into_iter().find(|p| p.symbol == signal.symbol);

        let (contract, position) = match (contract, position) {
            (None, None) => return Ok(Disposition::Ack),
            (contract, position) => (contract, position),
        };

        if let Some(ref c) = contract {
            if let Some(stop_id) = &c.backup_stop_order_id {
                let _ = self.broker.cancel_order(stop_id).await;
            }
            if let Some(tp_id) = &c.backup_tp_order_id {
                let _ = self.broker.cancel_order(tp_id).await;
            }
        }

        let market = market_of(&signal.symbol).ok_or_else(|| ExecutionError::PriceRejected("unknown market".to_string()))?;
        let reference_price = Decimal::try_from(signal.reference_price).unwrap_or(Decimal::ZERO);
        let depth = self.depth_or_reference(&signal.symbol, reference_price).await;
        let one_tick = tick_size_of(market, reference_price);
        let candidate_price = depth.bid.max(reference_price - one_tick);
        let price = tick::round_to_tick(market, candidate_price);

        let quantity = position.map(|p| p.qty).or_else(|| contract.as_ref().map(|c| c.quantity)).unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            return Ok(Disposition::Ack);
        }

        let broker_order_id = {
            let _guard = self.metrics.latency_guard();
            self.broker
                .submit_order(&signal.id, &signal.symbol, OrderSide::Sell, quantity, price, OrderType::Limit, TimeInForce::Day)
                .await?
        };
        let state = self.poll_order_state(&broker_order_id).await?;
        self.metrics.inc_order("sell", order_state_label(state));

        let record = OrderRecord {
            id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            side: OrderSide::Sell,
            quantity,
            price,
            state,
            submitted_at: now_unix(),
            broker_order_id: Some(broker_order_id),
        };
        self.order_store.save(&record).await.map_err(|e| ExecutionError::TransientNetwork(e.to_string()))?;

        if matches!(state, OrderState::Filled | OrderState::PartiallyFilled) {
            if let Err(e) = self.stops.mark_closed(&signal.symbol).await {
                warn!(error = %e, symbol = %signal.symbol, "failed to mark stop contract closed");
            }
            self.notifier.notify(format!("SELL filled {} qty={} price={}", signal.symbol, quantity, price)).await;
            Ok(Disposition::Ack)
        } else {
            Err(ExecutionError::TransientNetwork("sell order did not fill within poll window".to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Ack,
}

fn order_state_label(state: OrderState) -> &'static str {
    match state {
        OrderState::Filled => "filled",
        OrderState::PartiallyFilled => "partially_filled",
        OrderState::Failed => "failed",
        OrderState::Cancelled => "cancelled",
        OrderState::Live | OrderState::PendingSubmit => "pending",
    }
}

/// §4.9 step 3: linear in [min,max] over score [30,100], clamped.
fn budget_fraction(score: f64, min: f64, max: f64) -> f64 {
    let clamped = score.clamp(30.0, 100.0);
    let t = (clamped - 30.0) / (100.0 - 30.0);
    min + t * (max - min)
}

fn contract_stop_limit(stop_loss: Decimal) -> Decimal {
    stop_loss * rust_decimal_macros::dec!(0.995)
}

fn tick_size_of(market: Market, price: Decimal) -> Decimal {
    let a = tick::round_to_tick(market, price);
    let b = tick::round_to_tick(market, price + Decimal::new(1, 2));
    if b > a { b - a } else { Decimal::new(1, 2) }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_fraction_interpolates_linearly_within_band() {
        // score 57 is 27/70 of the way from 30 to 100.
        let f = budget_fraction(57.0, 0.08, 0.20);
        assert!((f - 0.12628571428571428).abs() < 1e-9);
    }

    #[test]
    fn budget_fraction_clamps_outside_band() {
        assert_eq!(budget_fraction(10.0, 0.08, 0.20), 0.08);
        assert_eq!(budget_fraction(150.0, 0.08, 0.20), 0.20);
    }

    /// A broker that counts `submit_order` calls and never reports open
    /// positions, so the dedup pre-checks in `handle_buy` can't mask
    /// whether the per-client-id idempotency branch actually fired.
    struct CountingBroker {
        submits: std::sync::atomic::AtomicUsize,
        order_id: String,
    }

    #[async_trait::async_trait]
    impl BrokerClient for CountingBroker {
        async fn account_balance(&self) -> Result<crate::domain::types::AccountSnapshot, ExecutionError> {
            let mut balances = std::collections::HashMap::new();
            balances.insert(
                "USD".to_string(),
                crate::domain::types::CurrencyBalance { cash: Decimal::from(100_000), buy_power: Decimal::from(100_000) },
            );
            Ok(crate::domain::types::AccountSnapshot { buy_power_by_currency: balances, positions: std::collections::HashMap::new() })
        }
        async fn positions(&self) -> Result<Vec<crate::domain::types::Position>, ExecutionError> {
            Ok(vec![])
        }
        async fn submit_order(
            &self,
            _client_order_id: &str,
            _symbol: &str,
            _side: OrderSide,
            _qty: Decimal,
            _price: Decimal,
            _order_type: OrderType,
            _tif: TimeInForce,
        ) -> Result<String, ExecutionError> {
            self.submits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.order_id.clone())
        }
        async fn order_status(&self, _broker_order_id: &str) -> Result<(OrderState, Decimal, Decimal), ExecutionError> {
            Ok((OrderState::Filled, Decimal::from(200), Decimal::from(50)))
        }
        async fn cancel_order(&self, _broker_order_id: &str) -> Result<(), ExecutionError> {
            Ok(())
        }
        async fn submit_conditional(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _qty: Decimal,
            _trigger: Decimal,
            _limit: Decimal,
        ) -> Result<String, ExecutionError> {
            Ok(uuid::Uuid::new_v4().to_string())
        }
    }

    async fn in_memory_executor(broker: Arc<dyn BrokerClient>, symbol: &str) -> (Arc<OrderExecutor>, Arc<dyn OrderStore>, Arc<dyn StopStore>) {
        let db = crate::infrastructure::persistence::Database::new("sqlite::memory:").await.unwrap();
        let order_store: Arc<dyn OrderStore> = Arc::new(crate::infrastructure::persistence::SqliteOrderStore::new(db.pool.clone()));
        let stops: Arc<dyn StopStore> = Arc::new(crate::infrastructure::persistence::SqliteStopStore::new(db.pool.clone()));
        let queue: Arc<dyn SignalQueue> = Arc::new(crate::infrastructure::persistence::SqliteQueue::new(db.pool.clone(), Duration::from_secs(30)));
        let quotes: Arc<dyn QuoteSource> = Arc::new(crate::infrastructure::mock::MockQuoteSource::new(&[symbol.to_string()]));
        let notifier: Arc<dyn Notifier> = Arc::new(crate::infrastructure::notifier::WebhookNotifier::spawn(None));
        let metrics = Arc::new(Metrics::new().unwrap());
        let executor = Arc::new(OrderExecutor {
            quotes,
            broker,
            stops: stops.clone(),
            order_store: order_store.clone(),
            queue,
            notifier,
            metrics,
            config: AppConfig::from_env().unwrap(),
            worker_id: 0,
        });
        (executor, order_store, stops)
    }

    #[tokio::test]
    async fn redelivered_signal_with_a_pre_persisted_order_resumes_instead_of_resubmitting() {
        let symbol = "IDEMP.US";
        let broker_order_id = "brk-1".to_string();
        let broker = Arc::new(CountingBroker { submits: std::sync::atomic::AtomicUsize::new(0), order_id: broker_order_id.clone() });
        let (executor, order_store, stops) = in_memory_executor(broker.clone() as Arc<dyn BrokerClient>, symbol).await;

        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            kind: crate::domain::types::SignalKind::StrongBuy,
            score: 80.0,
            reference_price: 100.0,
            indicators: crate::domain::types::Indicators::default(),
            stop_loss: 94.0,
            take_profit: 115.0,
            generated_at: now_unix(),
        };

        // Order already exists for this client id (yesterday, so the
        // same-day dedup check doesn't mask the idempotency branch).
        order_store
            .save(&OrderRecord {
                id: signal.id.clone(),
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                quantity: Decimal::from(200),
                price: Decimal::from(50),
                state: OrderState::PendingSubmit,
                submitted_at: now_unix() - 25 * 3600,
                broker_order_id: Some(broker_order_id.clone()),
            })
            .await
            .unwrap();

        let disposition = executor.handle_buy(&signal).await.unwrap();
        assert!(matches!(disposition, Disposition::Ack));
        assert_eq!(
            broker.submits.load(std::sync::atomic::Ordering::SeqCst),
            0,
            "a redelivered signal with a pre-persisted order must resume, not resubmit"
        );

        let contract = stops.get_active(symbol).await.unwrap().expect("resumed buy opens a stop contract");
        assert_eq!(contract.quantity, Decimal::from(200));
    }
}
