//! Buy/exit scoring (§4.8.1, §4.8.2). Pure functions of an indicator
//! snapshot plus whatever position context the caller has on hand — no
//! I/O, no shared state, so a given snapshot always yields the same
//! score (§8 "score is a pure function of its snapshot").

use crate::config::ScoringWeights;
use crate::domain::types::{Indicators, SignalKind};

/// §4.8.1: additive buy score over independent axes, each sub-score
/// non-negative. `price` is the symbol's current close, independent of
/// `bb_middle`/`sma20` (both of which are the mean of the same trailing
/// window and so sit right on top of the price axis otherwise).
pub fn buy_score(price: f64, ind: &Indicators, w: &ScoringWeights) -> f64 {
    debug_assert!(ind.is_complete(), "buy_score requires a complete snapshot");

    let rsi = ind.rsi.unwrap();
    let bb_upper = ind.bb_upper.unwrap();
    let bb_middle = ind.bb_middle.unwrap();
    let bb_lower = ind.bb_lower.unwrap();
    let macd_hist = ind.macd_hist.unwrap();
    let prev_macd_hist = ind.prev_macd_hist.unwrap();
    let volume_ratio = ind.volume_ratio.unwrap();
    let sma20 = ind.sma20.unwrap();
    let sma50 = ind.sma50.unwrap();

    let rsi_score = if rsi <= 20.0 {
        w.rsi_oversold_20
    } else if rsi <= 30.0 {
        w.rsi_oversold_30
    } else if rsi <= 40.0 {
        w.rsi_oversold_40
    } else if rsi <= 50.0 {
        w.rsi_neutral_50
    } else {
        0.0
    };

    let band_width = if bb_middle != 0.0 {
        (bb_upper - bb_lower) / bb_middle
    } else {
        f64::INFINITY
    };
    let mut bollinger_score = if price < bb_lower {
        w.bollinger_below_lower
    } else if price < bb_lower * 1.02 {
        w.bollinger_near_lower
    } else if price < bb_middle {
        w.bollinger_below_middle
    } else {
        0.0
    };
    if band_width <= w.bollinger_squeeze_threshold {
        bollinger_score += w.bollinger_squeeze_bonus;
    }

    let crossed_up = prev_macd_hist <= 0.0 && macd_hist > 0.0;
    let macd_score = if crossed_up {
        w.macd_bullish_cross
    } else if macd_hist > 0.0 && macd_hist > prev_macd_hist {
        w.macd_rising
    } else if macd_hist > 0.0 {
        w.macd_positive
    } else {
        0.0
    };

    let volume_score = if volume_ratio >= 2.0 {
        w.volume_ratio_2
    } else if volume_ratio >= 1.5 {
        w.volume_ratio_1_5
    } else if volume_ratio >= 1.2 {
        w.volume_ratio_1_2
    } else {
        0.0
    };

    let mut trend_score = 0.0;
    if price > sma20 {
        trend_score += w.trend_above_sma20;
    }
    if sma20 > sma50 {
        trend_score += w.trend_sma20_above_sma50;
    }

    rsi_score + bollinger_score + macd_score + volume_score + trend_score
}

/// Classifies a buy score into the signal kind to emit, honoring the
/// `weak_buy_enabled` feature gate. Returns `None` below the weak-buy
/// floor, or when weak-buy scores arrive with the gate off.
pub fn classify_buy(score: f64, weak_buy_enabled: bool, w: &ScoringWeights) -> Option<SignalKind> {
    if score >= w.strong_buy_threshold {
        Some(SignalKind::StrongBuy)
    } else if score >= w.buy_threshold {
        Some(SignalKind::Buy)
    } else if weak_buy_enabled && score >= w.weak_buy_threshold {
        Some(SignalKind::WeakBuy)
    } else {
        None
    }
}

/// §4.8.2 exit score inputs not carried by [`Indicators`] alone.
pub struct ExitContext {
    pub entry_price: f64,
    pub current_price: f64,
}

impl ExitContext {
    pub fn profit_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.current_price - self.entry_price) / self.entry_price
    }
}

/// §4.8.2: signed exit score, positive meaning "lean toward exit".
pub fn exit_score(ind: &Indicators, ctx: &ExitContext, w: &ScoringWeights) -> f64 {
    debug_assert!(ind.is_complete(), "exit_score requires a complete snapshot");

    let rsi = ind.rsi.unwrap();
    let bb_upper = ind.bb_upper.unwrap();
    let macd_hist = ind.macd_hist.unwrap();
    let prev_macd_hist = ind.prev_macd_hist.unwrap();
    let volume_ratio = ind.volume_ratio.unwrap();
    let sma20 = ind.sma20.unwrap();
    let sma50 = ind.sma50.unwrap();
    let price = ctx.current_price;
    let profit = ctx.profit_pct();
    let in_profit = profit > 0.0;
    let in_loss = profit < 0.0;

    let mut s = 0.0;

    let bearish_cross = prev_macd_hist > 0.0 && macd_hist < 0.0;
    let bullish_cross = prev_macd_hist <= 0.0 && macd_hist > 0.0;
    let histogram_expanding = macd_hist > 0.0 && macd_hist > prev_macd_hist;

    if bearish_cross {
        s += w.exit_macd_bearish_cross;
    }
    if rsi > 80.0 && in_profit {
        s += w.exit_rsi_overbought_profit;
    }
    if rsi > 70.0 && profit > 0.05 {
        s += w.exit_rsi_high_profit;
    }
    if sma20 < sma50 && price < sma20 {
        s += w.exit_downtrend;
    }
    if price < sma20 && in_loss {
        s += w.exit_below_sma20_loss;
    }
    if volume_ratio < 0.5 && profit > 0.08 {
        s += w.exit_low_volume_high_profit;
    }
    if price > sma20 && sma20 > sma50 && profit > 0.05 {
        s += w.exit_strong_uptrend;
    }
    if bullish_cross {
        s += w.exit_macd_bullish_cross;
    }
    if histogram_expanding {
        s += w.exit_histogram_expanding;
    }
    if (50.0..=70.0).contains(&rsi) && profit > 0.05 {
        s += w.exit_rsi_mid_profit;
    }
    if rsi < 30.0 && in_loss {
        s += w.exit_rsi_oversold_loss;
    }
    if price > bb_upper && profit > 0.05 {
        s += w.exit_break_upper_band_profit;
    }
    if volume_ratio > 1.5 && profit > 0.05 {
        s += w.exit_high_volume_profit;
    }

    s
}

/// §4.8.2 action table outcome before the static stop-loss override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitAction {
    SmartExit,
    TakeProfitIfAbove(f64),
    StaticBand,
    DelayTakeProfit { stretched_take_profit: f64 },
    Hold,
}

/// Maps an exit score to an action, given the contract's `take_profit` and
/// `entry_price` so delayed bands can compute a stretched target.
pub fn exit_action(score: f64, take_profit: f64, entry_price: f64, w: &ScoringWeights) -> ExitAction {
    if score >= w.exit_smart_exit_threshold {
        ExitAction::SmartExit
    } else if score >= w.exit_take_profit_threshold {
        ExitAction::TakeProfitIfAbove(take_profit * 0.95)
    } else if score > w.exit_static_band_low {
        ExitAction::StaticBand
    } else if score > w.exit_delay_15_band {
        ExitAction::DelayTakeProfit {
            stretched_take_profit: entry_price * (1.0 + w.exit_delay_15_pct),
        }
    } else {
        ExitAction::DelayTakeProfit {
            stretched_take_profit: entry_price * (1.0 + w.exit_delay_20_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(rsi: f64, macd_hist: f64, prev_macd_hist: f64, sma20: f64, sma50: f64, volume_ratio: f64) -> Indicators {
        Indicators {
            rsi: Some(rsi),
            macd: Some(0.0),
            macd_signal: Some(0.0),
            macd_hist: Some(macd_hist),
            prev_macd_hist: Some(prev_macd_hist),
            bb_upper: Some(sma20 * 1.05),
            bb_middle: Some(sma20),
            bb_lower: Some(sma20 * 0.95),
            sma20: Some(sma20),
            sma50: Some(sma50),
            atr: Some(1.0),
            volume_ratio: Some(volume_ratio),
        }
    }

    #[test]
    fn buy_score_is_pure() {
        let w = ScoringWeights::default();
        let ind = complete(18.0, 0.5, 0.1, 100.0, 95.0, 2.5);
        let a = buy_score(100.0, &ind, &w);
        let b = buy_score(100.0, &ind, &w);
        assert_eq!(a, b);
        assert!(a >= w.strong_buy_threshold);
    }

    #[test]
    fn buy_score_rewards_price_below_lower_band_and_below_middle() {
        // sma20 = bb_middle = 100, bb_lower = 95, bb_upper = 105.
        let w = ScoringWeights::default();
        let ind = complete(45.0, -0.1, -0.2, 100.0, 95.0, 1.0);

        let deep_below_lower = buy_score(90.0, &ind, &w);
        let near_lower = buy_score(96.0, &ind, &w);
        let below_middle = buy_score(99.0, &ind, &w);
        let above_middle = buy_score(101.0, &ind, &w);

        assert!(deep_below_lower > near_lower);
        assert!(near_lower > below_middle);
        assert!(below_middle > above_middle);
        assert_eq!(above_middle, rsi_score_only(&ind, &w));
    }

    fn rsi_score_only(ind: &Indicators, w: &ScoringWeights) -> f64 {
        // price above both bands and above sma20/sma50 trend: only the RSI
        // axis (and any squeeze bonus) should contribute.
        buy_score(1_000.0, ind, w)
    }

    #[test]
    fn classify_buy_respects_weak_buy_gate() {
        let w = ScoringWeights::default();
        assert_eq!(classify_buy(35.0, false, &w), None);
        assert_eq!(classify_buy(35.0, true, &w), Some(SignalKind::WeakBuy));
        assert_eq!(classify_buy(50.0, false, &w), Some(SignalKind::Buy));
        assert_eq!(classify_buy(65.0, false, &w), Some(SignalKind::StrongBuy));
    }

    #[test]
    fn exit_score_stop_loss_floor_overrides_smart_exit_delay() {
        // §8 scenario 3: entry=100, stop_loss=94, take_profit=115, price=93,
        // RSI=18, MACD bullish -> exit score deep negative (DELAY), but the
        // static floor check (done by the caller, not this function) must
        // still fire regardless of this score.
        let w = ScoringWeights::default();
        let ind = complete(18.0, 0.2, -0.1, 95.0, 90.0, 1.0);
        let ctx = ExitContext { entry_price: 100.0, current_price: 93.0 };
        let score = exit_score(&ind, &ctx, &w);
        assert!(score <= w.exit_static_band_low && score > w.exit_delay_15_band);
        let action = exit_action(score, 115.0, 100.0, &w);
        assert!(matches!(action, ExitAction::DelayTakeProfit { .. }));
    }

    #[test]
    fn exit_score_delayed_take_profit_stretches_target() {
        // §8 scenario 4: profit 10.5%, RSI 62, price>SMA20>SMA50, histogram
        // expanding -> deeply negative score -> stretch target to 1.20*entry.
        let w = ScoringWeights::default();
        let ind = complete(62.0, 0.6, 0.4, 105.0, 100.0, 1.0);
        let ctx = ExitContext { entry_price: 100.0, current_price: 110.5 };
        let score = exit_score(&ind, &ctx, &w);
        assert!(score <= w.exit_delay_15_band);
        let action = exit_action(score, 110.0, 100.0, &w);
        match action {
            ExitAction::DelayTakeProfit { stretched_take_profit } => {
                assert!((stretched_take_profit - 120.0).abs() < 1e-9);
            }
            other => panic!("expected delay, got {other:?}"),
        }
    }
}
