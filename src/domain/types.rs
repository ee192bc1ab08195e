//! Core trading domain entities and value objects.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `reference_price`/`stop_loss`/`take_profit` stay `f64` on [`Signal`] since
/// they are produced by the `f64` indicator pipeline (§4.1); the executor
/// converts to `Decimal` at the order-placement boundary (§4.9) where
/// fixed-point precision matters.

/// A market an equity can trade on, derived from the symbol's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Hk,
    Us,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Hk => write!(f, "HK"),
            Market::Us => write!(f, "US"),
        }
    }
}

/// Returns the market a symbol belongs to, based on its suffix (e.g. `0700.HK`, `AAPL.US`).
pub fn market_of(symbol: &str) -> Option<Market> {
    if symbol.ends_with(".HK") {
        Some(Market::Hk)
    } else if symbol.ends_with(".US") {
        Some(Market::Us)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Lit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    GoodTillCancel,
}

/// Monotonic lifecycle of a broker order. Transitions only move toward
/// `Filled`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    PendingSubmit,
    Live,
    PartiallyFilled,
    Filled,
    Failed,
    Cancelled,
}

impl OrderState {
    /// `today_buy_symbols` (C6) treats these states as "still counts as a buy today".
    pub fn counts_as_open_buy(&self) -> bool {
        matches!(
            self,
            OrderState::PendingSubmit
                | OrderState::Live
                | OrderState::PartiallyFilled
                | OrderState::Filled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub volume_today: f64,
    pub timestamp: i64,
}

/// A technical-indicator snapshot computed from the latest candle window.
/// Every field is `None` ("unknown") rather than zero when it cannot be
/// computed from the available window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub prev_macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub atr: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl Indicators {
    /// Invariant (§3, §9 Open Question #2): a snapshot reaches scoring only
    /// when every field is known. We reject incomplete snapshots rather
    /// than substitute zero.
    pub fn is_complete(&self) -> bool {
        self.rsi.is_some()
            && self.macd.is_some()
            && self.macd_signal.is_some()
            && self.macd_hist.is_some()
            && self.prev_macd_hist.is_some()
            && self.bb_upper.is_some()
            && self.bb_middle.is_some()
            && self.bb_lower.is_some()
            && self.sma20.is_some()
            && self.sma50.is_some()
            && self.atr.is_some()
            && self.volume_ratio.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    StrongBuy,
    Buy,
    /// Feature-flagged; only emitted when `AppConfig::weak_buy_enabled`.
    WeakBuy,
    SellStopLoss,
    SellTakeProfit,
    SellSmartExit,
}

impl SignalKind {
    pub fn is_buy(&self) -> bool {
        matches!(self, SignalKind::StrongBuy | SignalKind::Buy | SignalKind::WeakBuy)
    }

    /// Queue priority: lower dispatches earlier. Buys are `100 - score`;
    /// sells are fixed bands (§3).
    pub fn priority(&self, score: f64) -> i32 {
        match self {
            SignalKind::StrongBuy | SignalKind::Buy | SignalKind::WeakBuy => {
                (100.0 - score).round() as i32
            }
            SignalKind::SellStopLoss => 0,
            SignalKind::SellSmartExit => 5,
            SignalKind::SellTakeProfit => 10,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::StrongBuy => "STRONG_BUY",
            SignalKind::Buy => "BUY",
            SignalKind::WeakBuy => "WEAK_BUY",
            SignalKind::SellStopLoss => "SELL_STOP_LOSS",
            SignalKind::SellTakeProfit => "SELL_TAKE_PROFIT",
            SignalKind::SellSmartExit => "SELL_SMART_EXIT",
        };
        write!(f, "{s}")
    }
}

/// A scored, immutable decision emitted by the Signal Generator (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub kind: SignalKind,
    pub score: f64,
    pub reference_price: f64,
    pub indicators: Indicators,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub generated_at: i64,
}

impl Signal {
    pub fn priority(&self) -> i32 {
        self.kind.priority(self.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    Active,
    Closed,
}

/// The durable record binding a position to its stop-loss/take-profit and
/// optional exchange-side backup orders (C5). Money fields use `Decimal`,
/// matching the teacher's convention of fixed-point arithmetic for anything
/// that touches order sizing or cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopContract {
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub backup_stop_order_id: Option<String>,
    pub backup_tp_order_id: Option<String>,
    pub status: StopStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted order (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub state: OrderState,
    pub submitted_at: i64,
    /// Broker-assigned id once submitted; used to resume status polling
    /// idempotently across restarts (§5).
    pub broker_order_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub cash: Decimal,
    pub buy_power: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub currency: String,
}

/// Ephemeral, fetched fresh before every sizing decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub buy_power_by_currency: std::collections::HashMap<String, CurrencyBalance>,
    pub positions: std::collections::HashMap<String, Position>,
}

/// Bid/ask depth used to price limit orders (§4.9 step 5 / §4.9 SELL step 3).
#[derive(Debug, Clone, Copy)]
pub struct Depth {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Reason a candidate BUY was skipped by the deduplication filter (§4.8.3).
#[derive(Debug, Clone, PartialEq)]
pub enum DedupReason {
    QueuePending,
    AlreadyHeld,
    AlreadyOrderedToday,
    Cooldown { remaining_secs: i64 },
}

impl fmt::Display for DedupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupReason::QueuePending => write!(f, "queue-dedup: already pending"),
            DedupReason::AlreadyHeld => write!(f, "position-dedup: already held"),
            DedupReason::AlreadyOrderedToday => write!(f, "same-day-order-dedup"),
            DedupReason::Cooldown { remaining_secs } => {
                write!(f, "cooldown ({remaining_secs}s remaining)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub succeeded: i64,
}

impl QueueStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_of_reads_suffix() {
        assert_eq!(market_of("0700.HK"), Some(Market::Hk));
        assert_eq!(market_of("AAPL.US"), Some(Market::Us));
        assert_eq!(market_of("AAPL"), None);
    }

    #[test]
    fn signal_priority_buys_invert_score_sells_use_bands() {
        assert_eq!(SignalKind::Buy.priority(57.0), 43);
        assert_eq!(SignalKind::SellStopLoss.priority(0.0), 0);
        assert_eq!(SignalKind::SellSmartExit.priority(0.0), 5);
        assert_eq!(SignalKind::SellTakeProfit.priority(0.0), 10);
    }

    #[test]
    fn incomplete_indicators_rejected() {
        let mut ind = Indicators::default();
        assert!(!ind.is_complete());
        ind.rsi = Some(50.0);
        ind.macd = Some(0.0);
        ind.macd_signal = Some(0.0);
        ind.macd_hist = Some(0.0);
        ind.prev_macd_hist = Some(0.0);
        ind.bb_upper = Some(1.0);
        ind.bb_middle = Some(1.0);
        ind.bb_lower = Some(1.0);
        ind.sma20 = Some(1.0);
        ind.sma50 = Some(1.0);
        ind.atr = Some(1.0);
        ind.volume_ratio = Some(1.0);
        assert!(ind.is_complete());
    }
}
