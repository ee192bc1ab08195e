//! Indicator Library (C1). Pure, stateless functions over an OHLCV candle
//! window. Every indicator shrinks its period adaptively rather than
//! panicking on short windows, and the aggregate snapshot exposes
//! `None` ("unknown") instead of a sentinel zero when a value cannot be
//! computed — matching the teacher's `Option<_>`-based `FeatureSet`.
//!
//! The actual smoothing math is delegated to the `ta` crate's
//! incrementable indicators (`RelativeStrengthIndex`, `BollingerBands`,
//! `MovingAverageConvergenceDivergence`, `AverageTrueRange`,
//! `SimpleMovingAverage`), replayed fresh over the candle window on every
//! call rather than kept as long-lived per-symbol state, since this
//! module recomputes from a full window each scan instead of streaming
//! one tick at a time the way the teacher's `analyst.rs` does.

use crate::domain::types::{Candle, Indicators};
use ta::indicators::{
    AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::Next;

const RSI_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_K: f64 = 2.0;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const ATR_PERIOD: usize = 14;
const SMA_FAST: usize = 20;
const SMA_SLOW: usize = 50;

/// §4.1: "when the input sequence is shorter than the configured period but
/// >= 3, shrink the period to min(period, len-1)". Below 3 candles nothing
/// can be computed.
fn adaptive_period(period: usize, len: usize) -> Option<usize> {
    if len < 3 {
        return None;
    }
    Some(period.min(len - 1).max(1))
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Wilder-style RSI(period) via `ta`'s EMA-smoothed gain/loss indicator.
/// Returns one value per input close once warmed up; entries before index
/// `period` are `unknown`.
pub fn rsi(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let closes = closes(candles);
    let n = closes.len();
    let Some(period) = adaptive_period(period, n) else {
        return vec![None; n];
    };
    let mut indicator = RelativeStrengthIndex::new(period).unwrap();
    let mut out = vec![None; n];
    for (i, &c) in closes.iter().enumerate() {
        let value = indicator.next(c);
        if i >= period {
            out[i] = Some(value);
        }
    }
    out
}

/// MACD(fast, slow, signal) via `ta`'s `MovingAverageConvergenceDivergence`.
/// Returns `(macd, signal, histogram)` aligned to the input length.
pub fn macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let closes = closes(candles);
    let n = closes.len();
    if n < 3 {
        return (vec![None; n], vec![None; n], vec![None; n]);
    }
    let fast = adaptive_period(fast, n).unwrap_or(1);
    let slow = adaptive_period(slow, n).unwrap_or(1);
    let signal = adaptive_period(signal, n).unwrap_or(1);
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal).unwrap();

    let macd_warm = fast.max(slow);
    let signal_warm = macd_warm + signal - 1;

    let mut macd_line = vec![None; n];
    let mut signal_line = vec![None; n];
    let mut hist = vec![None; n];
    for (i, &c) in closes.iter().enumerate() {
        let out = indicator.next(c);
        if i + 1 >= macd_warm {
            macd_line[i] = Some(out.macd);
        }
        if i + 1 >= signal_warm {
            signal_line[i] = Some(out.signal);
            hist[i] = Some(out.histogram);
        }
    }
    (macd_line, signal_line, hist)
}

/// Bollinger(period, k) via `ta`'s `BollingerBands` (SMA middle band, EMA-
/// free population standard deviation for the envelope).
pub fn bollinger(
    candles: &[Candle],
    period: usize,
    k: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let closes = closes(candles);
    let n = closes.len();
    let Some(period) = adaptive_period(period, n) else {
        return (vec![None; n], vec![None; n], vec![None; n]);
    };
    let mut indicator = BollingerBands::new(period, k).unwrap();
    let mut upper = vec![None; n];
    let mut middle = vec![None; n];
    let mut lower = vec![None; n];
    for (i, &c) in closes.iter().enumerate() {
        let out = indicator.next(c);
        if i + 1 >= period {
            upper[i] = Some(out.upper);
            middle[i] = Some(out.average);
            lower[i] = Some(out.lower);
        }
    }
    (upper, middle, lower)
}

/// SMA(n) via `ta`'s `SimpleMovingAverage`.
pub fn sma(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let closes = closes(candles);
    let n = closes.len();
    let Some(period) = adaptive_period(period, n) else {
        return vec![None; n];
    };
    let mut indicator = SimpleMovingAverage::new(period).unwrap();
    let mut out = vec![None; n];
    for (i, &c) in closes.iter().enumerate() {
        let value = indicator.next(c);
        if i + 1 >= period {
            out[i] = Some(value);
        }
    }
    out
}

/// ATR(period) via `ta`'s `AverageTrueRange`, fed the close price only —
/// matching the teacher's own `atr.next(price_f64)` call in `analyst.rs`,
/// which never builds a `DataItem` either despite having richer OHLC data
/// available in this module's `Candle`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let closes = closes(candles);
    let n = closes.len();
    let Some(period) = adaptive_period(period, n) else {
        return vec![None; n];
    };
    if n <= period {
        return vec![None; n];
    }
    let mut indicator = AverageTrueRange::new(period).unwrap();
    let mut out = vec![None; n];
    for (i, &c) in closes.iter().enumerate() {
        let value = indicator.next(c);
        if i >= period {
            out[i] = Some(value);
        }
    }
    out
}

/// VolumeRatio = today's volume / SMA20(volume). No `ta` equivalent exists
/// for this ratio, so it stays hand-rolled, matching the teacher's own
/// feature set which doesn't carry a volume indicator either.
pub fn volume_ratio(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    let Some(period) = adaptive_period(period, n) else {
        return vec![None; n];
    };
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let mut out = vec![None; n];
    for i in (period - 1)..n {
        let window = &volumes[(i + 1 - period)..=i];
        let avg = window.iter().sum::<f64>() / period as f64;
        if avg > 0.0 {
            out[i] = Some(volumes[i] / avg);
        }
    }
    out
}

/// Computes every series over `candles` and returns the [`Indicators`]
/// snapshot for the latest candle, after truncating every aligned array to
/// the shortest produced length (§4.1 "callers truncate every aligned
/// array to the shortest produced length").
pub fn compute_snapshot(candles: &[Candle]) -> Indicators {
    if candles.len() < 3 {
        return Indicators::default();
    }

    let rsi = rsi(candles, RSI_PERIOD);
    let (macd_line, macd_signal, macd_hist) = macd(candles, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let (bb_upper, bb_middle, bb_lower) = bollinger(candles, BB_PERIOD, BB_K);
    let sma20 = sma(candles, SMA_FAST);
    let sma50 = sma(candles, SMA_SLOW);
    let atr = atr(candles, ATR_PERIOD);
    let vol_ratio = volume_ratio(candles, SMA_FAST);

    let min_len = [
        rsi.len(),
        macd_line.len(),
        bb_upper.len(),
        sma20.len(),
        sma50.len(),
        atr.len(),
        vol_ratio.len(),
    ]
    .into_iter()
    .min()
    .unwrap_or(0);

    if min_len == 0 {
        return Indicators::default();
    }
    let last = min_len - 1;
    let prev_macd_hist = if last > 0 { macd_hist[last - 1] } else { None };

    Indicators {
        rsi: rsi[last],
        macd: macd_line[last],
        macd_signal: macd_signal[last],
        macd_hist: macd_hist[last],
        prev_macd_hist,
        bb_upper: bb_upper[last],
        bb_middle: bb_middle[last],
        bb_lower: bb_lower[last],
        sma20: sma20[last],
        sma50: sma50[last],
        atr: atr[last],
        volume_ratio: vol_ratio[last],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            timestamp: i as i64,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0 + i as f64,
        }
    }

    #[test]
    fn short_sequences_never_panic_and_are_unknown() {
        let candles = vec![candle(0, 10.0), candle(1, 11.0)];
        let snap = compute_snapshot(&candles);
        assert!(!snap.is_complete());
    }

    #[test]
    fn rsi_warms_up_at_period_index() {
        let candles: Vec<Candle> = (0..30).map(|i| candle(i, 10.0 + i as f64 * 0.1)).collect();
        let series = rsi(&candles, 14);
        assert!(series[13].is_none());
        assert!(series[14].is_some());
    }

    #[test]
    fn rsi_shrinks_period_for_short_windows_without_panicking() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, 10.0 + i as f64)).collect();
        let series = rsi(&candles, 14);
        assert_eq!(series.len(), 5);
        assert!(series.iter().any(|v| v.is_some()));
    }

    #[test]
    fn aligned_arrays_share_length_after_truncation() {
        let candles: Vec<Candle> = (0..60).map(|i| candle(i, 50.0 + (i as f64 * 0.3).sin() * 5.0)).collect();
        let snap = compute_snapshot(&candles);
        assert!(snap.is_complete());
    }

    #[test]
    fn bollinger_band_is_symmetric_around_middle() {
        let candles: Vec<Candle> = (0..25).map(|i| candle(i, 100.0)).collect();
        let (upper, middle, lower) = bollinger(&candles, 20, 2.0);
        let i = 24;
        // constant price series -> zero std dev -> bands collapse to middle
        assert_eq!(upper[i], middle[i]);
        assert_eq!(lower[i], middle[i]);
    }

    #[test]
    fn price_below_lower_band_is_distinct_from_the_middle_band() {
        // Regression guard: bb_middle must not be usable as a stand-in for
        // the live price, since it's the same SMA20 value as `sma20` and
        // sits at or above `bb_lower` by construction.
        let candles: Vec<Candle> = (0..25).map(|i| candle(i, 100.0 + i as f64)).collect();
        let (_, middle, lower) = bollinger(&candles, 20, 2.0);
        let i = 24;
        assert!(lower[i].unwrap() < middle[i].unwrap());
    }
}
