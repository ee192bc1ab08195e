//! Four-layer BUY deduplication filter (§4.8.3). Pure over the caller's
//! snapshot of queue/position/order state plus the generator-owned
//! cooldown map — no I/O of its own.

use crate::domain::types::DedupReason;
use std::collections::{HashMap, HashSet};

/// `signal_history` is the generator's sole piece of shared mutable
/// state (§9 "Global mutable state"): `symbol -> last published unix
/// timestamp`. Owned and mutated only by the scan loop.
pub type SignalHistory = HashMap<String, i64>;

pub struct DedupContext<'a> {
    pub has_pending: bool,
    pub open_positions: &'a HashSet<String>,
    pub today_buy_symbols: &'a HashSet<String>,
    pub history: &'a SignalHistory,
    pub cooldown_sec: i64,
    pub now: i64,
}

/// Runs the four layers in order, short-circuiting on first hit.
pub fn check(symbol: &str, ctx: &DedupContext) -> Option<DedupReason> {
    if ctx.has_pending {
        return Some(DedupReason::QueuePending);
    }
    if ctx.open_positions.contains(symbol) {
        return Some(DedupReason::AlreadyHeld);
    }
    if ctx.today_buy_symbols.contains(symbol) {
        return Some(DedupReason::AlreadyOrderedToday);
    }
    if let Some(&last) = ctx.history.get(symbol) {
        let elapsed = ctx.now - last;
        if elapsed < ctx.cooldown_sec {
            return Some(DedupReason::Cooldown {
                remaining_secs: ctx.cooldown_sec - elapsed,
            });
        }
    }
    None
}

/// Stamps a successful publish into `history` (§4.8.3 "on successful
/// publish, stamp signal_history[symbol] = now").
pub fn record_publish(history: &mut SignalHistory, symbol: &str, now: i64) {
    history.insert(symbol.to_string(), now);
}

/// §4.8 step 5: "every 10th iteration, garbage-collect the cooldown map".
/// Drops entries older than `cooldown_sec` so the map does not grow
/// unboundedly over a long-running process.
pub fn gc_history(history: &mut SignalHistory, now: i64, cooldown_sec: i64) {
    history.retain(|_, &mut last| now - last < cooldown_sec);
}
