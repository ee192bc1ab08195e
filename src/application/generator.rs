//! Signal Generator (C8): the scan loop that turns quotes into scored,
//! deduplicated signals on the durable queue. Grounded in the teacher's
//! per-symbol `tokio::spawn` fan-out (`bootstrap::agents`), reworked
//! around a bounded `JoinSet` rather than one task per symbol forever.

use crate::application::dedup::{self, DedupContext, SignalHistory};
use crate::application::retry::RetryPolicy;
use crate::application::scoring::{self, ExitAction, ExitContext};
use crate::config::AppConfig;
use crate::domain::indicators;
use crate::domain::ports::{BrokerClient, Notifier, QuoteSource, SignalQueue, StopStore};
use crate::domain::tick;
use crate::domain::types::{market_of, Indicators, Market, Signal, SignalKind, StopContract, StopStatus};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const CANDLE_WINDOW: usize = 60;
const GC_EVERY_N_ITERATIONS: u64 = 10;

pub struct SignalGenerator {
    pub quotes: Arc<dyn QuoteSource>,
    pub broker: Arc<dyn BrokerClient>,
    pub stops: Arc<dyn StopStore>,
    pub order_store: Arc<dyn crate::domain::ports::OrderStore>,
    pub queue: Arc<dyn SignalQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub watchlist: Vec<String>,
    pub config: AppConfig,
}

impl SignalGenerator {
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut history: SignalHistory = SignalHistory::new();
        let mut iteration: u64 = 0;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.scan_interval_secs));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("generator shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.clone().scan_once(&mut history).await {
                warn!(error = %e, "scan iteration failed");
            }

            iteration += 1;
            if iteration.is_multiple_of(GC_EVERY_N_ITERATIONS) {
                let now = now_unix();
                dedup::gc_history(&mut history, now, self.config.cooldown_sec);
            }
        }
    }

    #[instrument(skip(self, history))]
    async fn scan_once(self: Arc<Self>, history: &mut SignalHistory) -> anyhow::Result<()> {
        let now = chrono::Utc::now();
        let active_hk = crate::domain::calendar::is_open(Market::Hk, now);
        let active_us = crate::domain::calendar::is_open(Market::Us, now);
        if !active_hk && !active_us {
            debug!("no active markets; sleeping");
            return Ok(());
        }

        let watchlist: Vec<String> = self
            .watchlist
            .iter()
            .filter(|s| match market_of(s) {
                Some(Market::Hk) => active_hk,
                Some(Market::Us) => active_us,
                None => false,
            })
            .cloned()
            .collect();

        let account = self.broker.account_balance().await.ok();
        let open_positions: HashSet<String> = match self.broker.positions().await {
            Ok(positions) => positions.into_iter().map(|p| p.symbol).collect(),
            Err(e) => {
                warn!(error = %e, "failed to refresh open positions");
                HashSet::new()
            }
        };
        let today_buy_symbols = self.order_store.today_buy_symbols().await.unwrap_or_default();
        let active_stops = self.stops.load_all_active().await.unwrap_or_default();
        let _ = &account;

        // Exits first (§4.8 step 3 "done first for safety").
        let exit_targets = self.run_exits(&active_stops).await;

        // Entries (§4.8 step 4), skipping anything targeted by an exit this tick.
        let entry_candidates: Vec<String> = watchlist
            .into_iter()
            .filter(|s| !open_positions.contains(s) && !exit_targets.contains(s))
            .collect();

        let buy_signals = self.run_entries(entry_candidates).await;

        let mut ranked = buy_signals;
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        for signal in ranked {
            let dedup_reason = self
                .dedup_check(&signal.symbol, &open_positions, &today_buy_symbols, history)
                .await;
            if let Some(reason) = dedup_reason {
                debug!(symbol = %signal.symbol, %reason, "buy signal skipped");
                continue;
            }
            match self.queue.publish(signal.clone()).await {
                Ok(()) => {
                    dedup::record_publish(history, &signal.symbol, now_unix());
                    self.notifier
                        .notify(format!("published {} {} score={:.1}", signal.kind, signal.symbol, signal.score))
                        .await;
                }
                Err(e) => warn!(error = %e, symbol = %signal.symbol, "failed to publish signal"),
            }
        }

        Ok(())
    }

    async fn dedup_check(
        &self,
        symbol: &str,
        open_positions: &HashSet<String>,
        today_buy_symbols: &HashSet<String>,
        history: &SignalHistory,
    ) -> Option<crate::domain::types::DedupReason> {
        let has_pending = self
            .queue
            .has_pending(symbol, "BUY")
            .await
            .unwrap_or(false);
        let ctx = DedupContext {
            has_pending,
            open_positions,
            today_buy_symbols,
            history,
            cooldown_sec: self.config.cooldown_sec,
            now: now_unix(),
        };
        dedup::check(symbol, &ctx)
    }

    /// Evaluates exit conditions for each active stop, publishing SELL
    /// signals, and returns the set of symbols targeted this tick.
    async fn run_exits(&self, stops: &[StopContract]) -> HashSet<String> {
        let mut targets = HashSet::new();
        let mut tasks = JoinSet::new();
        let sem = Arc::new(tokio::sync::Semaphore::new(self.config.worker_count.max(1)));

        for stop in stops.iter().cloned() {
            let quotes = self.quotes.clone();
            let weights = self.config.scoring_weights.clone();
            let atr_k_stop = self.config.atr_k_stop;
            let permit = sem.clone();
            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                evaluate_exit(quotes, stop, weights, atr_k_stop).await
            });
        }

        let mut sells = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(signal)) = joined {
                targets.insert(signal.symbol.clone());
                sells.push(signal);
            }
        }

        for signal in sells {
            match self.queue.publish(signal.clone()).await {
                Ok(()) => {
                    self.notifier
                        .notify(format!("published {} {} score={:.1}", signal.kind, signal.symbol, signal.score))
                        .await;
                }
                Err(e) => warn!(error = %e, symbol = %signal.symbol, "failed to publish exit signal"),
            }
        }

        targets
    }

    async fn run_entries(&self, candidates: Vec<String>) -> Vec<Signal> {
        let mut tasks = JoinSet::new();
        let sem = Arc::new(tokio::sync::Semaphore::new(self.config.worker_count.max(1)));

        for symbol in candidates {
            let quotes = self.quotes.clone();
            let weights = self.config.scoring_weights.clone();
            let min_buy_score = self.config.min_buy_score;
            let weak_buy_enabled = self.config.weak_buy_enabled;
            let atr_k_stop = self.config.atr_k_stop;
            let atr_k_profit = self.config.atr_k_profit;
            let permit = sem.clone();
            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                evaluate_entry(quotes, symbol, weights, min_buy_score, weak_buy_enabled, atr_k_stop, atr_k_profit).await
            });
        }

        let mut signals = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(signal)) = joined {
                signals.push(signal);
            }
        }
        signals
    }
}

async fn evaluate_exit(
    quotes: Arc<dyn QuoteSource>,
    stop: StopContract,
    weights: crate::config::ScoringWeights,
    atr_k_stop: f64,
) -> Option<Signal> {
    let _ = atr_k_stop;
    if stop.status != StopStatus::Active {
        return None;
    }
    let candles = fetch_candles_with_retry(&quotes, &stop.symbol).await.ok()?;
    if candles.len() < 3 {
        return None;
    }
    let current_price = candles.last()?.close;
    let stop_loss = stop.stop_loss.to_f64().unwrap_or(0.0);
    let take_profit = stop.take_profit.to_f64().unwrap_or(0.0);
    let entry_price = stop.entry_price.to_f64().unwrap_or(0.0);

    // Static stop-loss floor always overrides, regardless of score.
    if current_price <= stop_loss {
        return Some(make_sell_signal(&stop.symbol, SignalKind::SellStopLoss, 0.0, current_price, stop_loss, take_profit));
    }

    let indicators = indicators::compute_snapshot(&candles);
    if !indicators.is_complete() {
        return None;
    }
    let ctx = ExitContext { entry_price, current_price };
    let score = scoring::exit_score(&indicators, &ctx, &weights);
    let action = scoring::exit_action(score, take_profit, entry_price, &weights);

    match action {
        ExitAction::SmartExit => Some(make_sell_signal(&stop.symbol, SignalKind::SellSmartExit, score, current_price, stop_loss, take_profit)),
        ExitAction::TakeProfitIfAbove(threshold) => {
            if current_price >= threshold {
                Some(make_sell_signal(&stop.symbol, SignalKind::SellTakeProfit, score, current_price, stop_loss, take_profit))
            } else {
                None
            }
        }
        ExitAction::StaticBand => {
            if current_price >= take_profit {
                Some(make_sell_signal(&stop.symbol, SignalKind::SellTakeProfit, score, current_price, stop_loss, take_profit))
            } else {
                None
            }
        }
        ExitAction::DelayTakeProfit { stretched_take_profit } => {
            if current_price >= stretched_take_profit {
                Some(make_sell_signal(&stop.symbol, SignalKind::SellTakeProfit, score, current_price, stop_loss, stretched_take_profit))
            } else {
                None
            }
        }
        ExitAction::Hold => None,
    }
}

fn make_sell_signal(symbol: &str, kind: SignalKind, score: f64, price: f64, stop_loss: f64, take_profit: f64) -> Signal {
    Signal {
        id: Uuid::new_v4().to_string(),
        symbol: symbol.to_string(),
        kind,
        score,
        reference_price: price,
        indicators: Indicators::default(),
        stop_loss,
        take_profit,
        generated_at: now_unix(),
    }
}

async fn evaluate_entry(
    quotes: Arc<dyn QuoteSource>,
    symbol: String,
    weights: crate::config::ScoringWeights,
    min_buy_score: f64,
    weak_buy_enabled: bool,
    atr_k_stop: f64,
    atr_k_profit: f64,
) -> Option<Signal> {
    let candles = fetch_candles_with_retry(&quotes, &symbol).await.ok()?;
    if candles.len() < 3 {
        return None;
    }
    let price = candles.last()?.close;
    let snapshot = indicators::compute_snapshot(&candles);
    if !snapshot.is_complete() {
        return None;
    }

    let score = scoring::buy_score(price, &snapshot, &weights);
    let kind = scoring::classify_buy(score, weak_buy_enabled, &weights)?;
    if !matches!(kind, SignalKind::WeakBuy) && score < min_buy_score {
        return None;
    }

    let atr = snapshot.atr?;
    let market = market_of(&symbol)?;
    let raw_stop_loss = price - atr_k_stop * atr;
    let raw_take_profit = price + atr_k_profit * atr;
    let stop_loss = tick::round_to_tick(market, rust_decimal::Decimal::try_from(raw_stop_loss).ok()?)
        .to_f64()
        .unwrap_or(raw_stop_loss);
    let take_profit = tick::round_to_tick(market, rust_decimal::Decimal::try_from(raw_take_profit).ok()?)
        .to_f64()
        .unwrap_or(raw_take_profit);

    Some(Signal {
        id: Uuid::new_v4().to_string(),
        symbol,
        kind,
        score,
        reference_price: price,
        indicators: snapshot,
        stop_loss,
        take_profit,
        generated_at: now_unix(),
    })
}

/// Candle fetches hit the same transient-network failures the spec calls
/// out in §7, so they go through the shared backoff policy rather than
/// giving up on the first error.
async fn fetch_candles_with_retry(
    quotes: &Arc<dyn QuoteSource>,
    symbol: &str,
) -> Result<Vec<crate::domain::types::Candle>, crate::domain::errors::QuoteError> {
    RetryPolicy::default()
        .run(crate::domain::errors::QuoteError::retryable, || quotes.candles(symbol, CANDLE_WINDOW))
        .await
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
