//! Error taxonomy (C12). One `thiserror` enum per concern, composed into
//! [`EngineError`]. Every variant knows whether it is retryable so C9's
//! `fail()` call and C7's retry policy don't have to re-derive it (§7).

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("transient network error fetching quotes: {0}")]
    TransientNetwork(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("kline symbol count out of limit")]
    QuotaExceeded,
}

impl QuoteError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            QuoteError::TransientNetwork(_) | QuoteError::RateLimited { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: Decimal },
    #[error("tick violation for {symbol}: {price} is not a multiple of the exchange tick")]
    TickViolation { symbol: String, price: Decimal },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("active stop contract already exists for {symbol}")]
    Conflict { symbol: String },
    #[error("no record found for {0}")]
    NotFound(String),
    #[error("store io error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("signal {0} not found in processing set")]
    NotFound(String),
    #[error("queue io error: {0}")]
    Io(String),
}

/// §7's execution-time error kinds. `InsufficientFunds`/`AlreadyFilled` are
/// not failures at all — the executor acks rather than retries.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },
    #[error("order quantity rounded to zero after lot sizing")]
    QuantityZero,
    #[error("margin refused by broker: {0}")]
    MarginRefusal(String),
    #[error("order already filled")]
    AlreadyFilled,
    #[error("broker rejected price: {0}")]
    PriceRejected(String),
    #[error("transient broker error: {0}")]
    TransientNetwork(String),
}

impl ExecutionError {
    pub fn retryable(&self) -> bool {
        matches!(self, ExecutionError::TransientNetwork(_))
    }

    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            ExecutionError::InsufficientFunds { .. } | ExecutionError::AlreadyFilled
        )
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Quote(#[from] QuoteError),
    #[error(transparent)]
    Tick(#[from] TickError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_network_errors_are_retryable() {
        assert!(QuoteError::TransientNetwork("timeout".into()).retryable());
        assert!(!QuoteError::QuotaExceeded.retryable());
    }

    #[test]
    fn insufficient_funds_is_benign_not_retryable() {
        let e = ExecutionError::InsufficientFunds {
            need: Decimal::from(100),
            available: Decimal::from(10),
        };
        assert!(e.is_benign());
        assert!(!e.retryable());
    }
}
