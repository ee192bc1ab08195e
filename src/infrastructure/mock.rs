//! In-memory broker and quote-source adapters, for development and
//! integration tests. Grounded in the teacher's `MockMarketDataService`
//! random-walk simulation, reworked against the new `domain::ports`
//! contracts.

use crate::domain::errors::{ExecutionError, QuoteError};
use crate::domain::ports::{BrokerClient, QuoteSource};
use crate::domain::types::{
    AccountSnapshot, Candle, CurrencyBalance, Depth, OrderSide, OrderState, OrderType, Position,
    Quote, TimeInForce,
};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A pending or settled simulated order, keyed by the broker order id.
#[derive(Clone)]
struct MockOrder {
    state: OrderState,
    filled_qty: Decimal,
    avg_price: Decimal,
}

/// Deterministic random-walk price generator keyed by symbol, seeded from
/// a starting price so repeated runs against the same watchlist see
/// plausible-looking but reproducible candles.
pub struct MockQuoteSource {
    base_prices: HashMap<String, f64>,
    tick: AtomicU64,
}

impl MockQuoteSource {
    pub fn new(watchlist: &[String]) -> Self {
        let base_prices = watchlist
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.clone(), 50.0 + (i as f64) * 7.3))
            .collect();
        Self { base_prices, tick: AtomicU64::new(0) }
    }

    fn price_at(&self, symbol: &str, offset: u64) -> f64 {
        let base = self.base_prices.get(symbol).copied().unwrap_or(100.0);
        let seed = offset.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let wobble = (((seed / 65_536) % 1000) as f64 / 1000.0) - 0.5;
        base * (1.0 + wobble * 0.02)
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn quote(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let offset = self.tick.load(Ordering::Relaxed);
        symbols
            .iter()
            .map(|symbol| {
                let price = self.price_at(symbol, offset);
                (
                    symbol.clone(),
                    Quote {
                        symbol: symbol.clone(),
                        last_price: price,
                        volume_today: 1_000_000.0,
                        timestamp: chrono::Utc::now().timestamp(),
                    },
                )
            })
            .collect()
    }

    async fn candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>, QuoteError> {
        let now = chrono::Utc::now().timestamp();
        let offset = self.tick.fetch_add(1, Ordering::Relaxed);
        let candles = (0..count)
            .map(|i| {
                let t = offset.wrapping_add(i as u64);
                let close = self.price_at(symbol, t);
                let open = self.price_at(symbol, t.wrapping_sub(1));
                let high = open.max(close) * 1.002;
                let low = open.min(close) * 0.998;
                Candle {
                    timestamp: now - ((count - i) as i64) * 60,
                    open,
                    high,
                    low,
                    close,
                    volume: 10_000.0 + (t % 5000) as f64,
                }
            })
            .collect();
        Ok(candles)
    }

    async fn depth(&self, symbol: &str) -> Result<Depth, QuoteError> {
        let offset = self.tick.load(Ordering::Relaxed);
        let mid = self.price_at(symbol, offset);
        let half_spread = (mid * 0.0005).max(0.01);
        let mid = Decimal::from_f64(mid).unwrap_or_default();
        let half_spread = Decimal::from_f64(half_spread).unwrap_or_default();
        Ok(Depth { bid: mid - half_spread, ask: mid + half_spread })
    }
}

/// In-memory broker: every order fills immediately at the submitted
/// price, positions accumulate, and conditional orders are tracked but
/// never auto-trigger (the generator's own exit evaluation drives sells).
pub struct MockBroker {
    positions: RwLock<HashMap<String, Position>>,
    orders: RwLock<HashMap<String, MockOrder>>,
    buy_power: HashMap<String, CurrencyBalance>,
}

impl MockBroker {
    pub fn new() -> Self {
        let mut buy_power = HashMap::new();
        buy_power.insert("HKD".to_string(), CurrencyBalance { cash: Decimal::from(500_000), buy_power: Decimal::from(500_000) });
        buy_power.insert("USD".to_string(), CurrencyBalance { cash: Decimal::from(100_000), buy_power: Decimal::from(100_000) });
        Self {
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            buy_power,
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn account_balance(&self) -> Result<AccountSnapshot, ExecutionError> {
        let positions = self.positions.read().await.clone();
        Ok(AccountSnapshot { buy_power_by_currency: self.buy_power.clone(), positions })
    }

    async fn positions(&self) -> Result<Vec<Position>, ExecutionError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn submit_order(
        &self,
        _client_order_id: &str,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        _order_type: OrderType,
        _tif: TimeInForce,
    ) -> Result<String, ExecutionError> {
        let order_id = Uuid::new_v4().to_string();
        self.orders.write().await.insert(
            order_id.clone(),
            MockOrder { state: OrderState::Filled, filled_qty: qty, avg_price: price },
        );

        let mut positions = self.positions.write().await;
        match side {
            OrderSide::Buy => {
                let entry = positions.entry(symbol.to_string()).or_insert(Position {
                    symbol: symbol.to_string(),
                    qty: Decimal::ZERO,
                    avg_cost: Decimal::ZERO,
                    currency: "USD".to_string(),
                });
                let total_qty = entry.qty + qty;
                if total_qty > Decimal::ZERO {
                    entry.avg_cost = (entry.qty * entry.avg_cost + qty * price) / total_qty;
                }
                entry.qty = total_qty;
            }
            OrderSide::Sell => {
                if let Some(entry) = positions.get_mut(symbol) {
                    entry.qty -= qty;
                    if entry.qty <= Decimal::ZERO {
                        positions.remove(symbol);
                    }
                }
            }
        }

        Ok(order_id)
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<(OrderState, Decimal, Decimal), ExecutionError> {
        let orders = self.orders.read().await;
        let order = orders
            .get(broker_order_id)
            .ok_or_else(|| ExecutionError::TransientNetwork(format!("unknown order {broker_order_id}")))?;
        Ok((order.state, order.filled_qty, order.avg_price))
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError> {
        if let Some(order) = self.orders.write().await.get_mut(broker_order_id) {
            order.state = OrderState::Cancelled;
        }
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
        let order_id = Uuid::new_v4().to_string();
        self.orders.write().await.insert(
            order_id.clone(),
            MockOrder { state: OrderState::Live, filled_qty: Decimal::ZERO, avg_price: Decimal::ZERO },
        );
        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_buy_accumulates_position() {
        let broker = MockBroker::new();
        let order_id = broker
            .submit_order("c1", "0700.HK", OrderSide::Buy, Decimal::from(100), Decimal::from(400), OrderType::Limit, TimeInForce::Day)
            .await
            .unwrap();
        let (state, filled, price) = broker.order_status(&order_id).await.unwrap();
        assert_eq!(state, OrderState::Filled);
        assert_eq!(filled, Decimal::from(100));
        assert_eq!(price, Decimal::from(400));

        let positions = broker.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].qty, Decimal::from(100));
    }

    #[tokio::test]
    async fn sell_reduces_and_clears_position() {
        let broker = MockBroker::new();
        broker
            .submit_order("c1", "AAPL.US", OrderSide::Buy, Decimal::from(10), Decimal::from(150), OrderType::Limit, TimeInForce::Day)
            .await
            .unwrap();
        broker
            .submit_order("c2", "AAPL.US", OrderSide::Sell, Decimal::from(10), Decimal::from(155), OrderType::Limit, TimeInForce::Day)
            .await
            .unwrap();
        assert!(broker.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quote_source_generates_deterministic_depth_spread() {
        let quotes = MockQuoteSource::new(&["0700.HK".to_string()]);
        let depth = quotes.depth("0700.HK").await.unwrap();
        assert!(depth.ask > depth.bid);
    }
}
