//! Ports (§6): the abstract operations the core calls on external
//! collaborators. Production adapters for these (a real broker client, a
//! relational store, config-file loading, a market-calendar holiday feed)
//! are named out of scope by the spec; this crate ships the trait plus a
//! durable SQLite adapter for the stores/queue and a mock for the broker.

use crate::domain::errors::{ExecutionError, QueueError, QuoteError, StoreError};
use crate::domain::types::{
    AccountSnapshot, Candle, Depth, OrderRecord, OrderSide, OrderState, OrderType, Position,
    Quote, Signal, StopContract, TimeInForce,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// C3's upstream collaborator: realtime + historical bars for a watchlist.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbols: &[String]) -> std::collections::HashMap<String, Quote>;
    async fn candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>, QuoteError>;
    async fn depth(&self, symbol: &str) -> Result<Depth, QuoteError>;
}

/// The broker client (§6). Out of scope as a production implementation;
/// the trait is the contract the core depends on.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn account_balance(&self) -> Result<AccountSnapshot, ExecutionError>;
    async fn positions(&self) -> Result<Vec<Position>, ExecutionError>;
    async fn submit_order(
        &self,
        client_order_id: &str,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        order_type: OrderType,
        tif: TimeInForce,
    ) -> Result<String, ExecutionError>;
    async fn order_status(
        &self,
        broker_order_id: &str,
    ) -> Result<(OrderState, Decimal, Decimal), ExecutionError>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError>;
    async fn submit_conditional(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        trigger: Decimal,
        limit: Decimal,
    ) -> Result<String, ExecutionError>;
}

/// C5: persisted `symbol -> StopContract` map.
#[async_trait]
pub trait StopStore: Send + Sync {
    async fn put(&self, contract: StopContract) -> Result<(), StoreError>;
    async fn get_active(&self, symbol: &str) -> Result<Option<StopContract>, StoreError>;
    async fn load_all_active(&self) -> Result<Vec<StopContract>, StoreError>;
    async fn mark_closed(&self, symbol: &str) -> Result<(), StoreError>;
    async fn attach_backup(
        &self,
        symbol: &str,
        stop_order_id: &str,
        tp_order_id: &str,
    ) -> Result<(), StoreError>;
}

/// C6: persisted order history, indexed for the same-day-buy query.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn save(&self, order: &OrderRecord) -> Result<(), StoreError>;
    async fn find_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError>;
    async fn today_buy_symbols(&self) -> Result<std::collections::HashSet<String>, StoreError>;
}

/// C7: the durable priority queue. `fail` implements the retry/backoff
/// policy of §4.7 internally so every caller gets the same semantics.
#[async_trait]
pub trait SignalQueue: Send + Sync {
    async fn publish(&self, signal: Signal) -> Result<(), QueueError>;
    async fn consume(&self, timeout: std::time::Duration) -> Result<Option<Signal>, QueueError>;
    async fn ack(&self, signal_id: &str) -> Result<(), QueueError>;
    async fn fail(&self, signal_id: &str, retryable: bool) -> Result<(), QueueError>;
    async fn has_pending(&self, symbol: &str, kind_label: &str) -> Result<bool, QueueError>;
    async fn stats(&self) -> Result<crate::domain::types::QueueStats, QueueError>;
    /// Background reclaim of `processing` entries stuck past the
    /// visibility timeout (§4.7 invariant).
    async fn reclaim_expired(
        &self,
        visibility_timeout: std::time::Duration,
    ) -> Result<usize, QueueError>;
}

/// C10: fire-and-forget textual notifications. Failures never propagate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: String);
}
