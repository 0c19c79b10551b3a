//! Derived feature snapshot consumed by the strategy layer.
//!
//! `Features` is computed once per bar close from a rolling window of
//! normalized bars. It carries both the current and the previous bar's
//! EMA9/EMA21 so a crossover strategy can detect the cross without having
//! to keep its own history.

use crate::indicators;
use crate::normalizer::NormalizedBar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub price: f64,
    pub ema9: f64,
    pub ema21: f64,
    pub prev_ema9: f64,
    pub prev_ema21: f64,
    pub ema50: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub atr14: Option<f64>,
    pub adx14: Option<f64>,
    pub vwap: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub volatility_rank: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeaturesError {
    /// Fewer than the minimum number of bars needed for EMA9/EMA21 plus one
    /// prior bar (the minimum viable window for a crossover read).
    InsufficientBars { have: usize, need: usize },
}

const MIN_BARS_FOR_CROSSOVER: usize = 22;

/// Computes a `Features` snapshot from `bars` (oldest-to-newest, last bar is
/// "now"). `volatility_rank` ranks the latest ATR against the ATR computed
/// over every trailing window of the same length inside `bars`, expressed
/// as a percentile in `[0.0, 1.0]`.
pub fn compute(bars: &[NormalizedBar]) -> Result<Features, FeaturesError> {
    if bars.len() < MIN_BARS_FOR_CROSSOVER {
        return Err(FeaturesError::InsufficientBars {
            have: bars.len(),
            need: MIN_BARS_FOR_CROSSOVER,
        });
    }

    let current = bars;
    let prior = &bars[..bars.len() - 1];

    let ema9 = indicators::ema(current, 9).expect("window length checked above");
    let ema21 = indicators::ema(current, 21).expect("window length checked above");
    let prev_ema9 = indicators::ema(prior, 9).expect("window length checked above");
    let prev_ema21 = indicators::ema(prior, 21).expect("window length checked above");

    let (macd, macd_signal) = match indicators::macd(current) {
        Some((m, s)) => (Some(m), Some(s)),
        None => (None, None),
    };

    let atr14 = indicators::atr(current, 14);
    let volatility_rank = atr14.and_then(|latest_atr| volatility_percentile(bars, 14, latest_atr));

    Ok(Features {
        price: current.last().unwrap().close_micros as f64,
        ema9,
        ema21,
        prev_ema9,
        prev_ema21,
        ema50: indicators::ema(current, 50),
        rsi14: indicators::rsi(current, 14),
        macd,
        macd_signal,
        atr14,
        adx14: indicators::adx(current, 14),
        vwap: indicators::vwap(current),
        volume_ratio: indicators::volume_ratio(current, 20),
        volatility_rank,
    })
}

/// Percentile rank (in `[0, 1]`) of `latest_atr` among the ATR values
/// computed at every trailing window ending within `bars`.
fn volatility_percentile(bars: &[NormalizedBar], period: usize, latest_atr: f64) -> Option<f64> {
    if bars.len() < period * 2 {
        return None;
    }
    let mut samples = Vec::new();
    for end in period + 1..=bars.len() {
        if let Some(v) = indicators::atr(&bars[..end], period) {
            samples.push(v);
        }
    }
    if samples.is_empty() {
        return None;
    }
    let below = samples.iter().filter(|&&v| v <= latest_atr).count();
    Some(below as f64 / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(n: usize) -> Vec<NormalizedBar> {
        (0..n)
            .map(|i| {
                let base = 100_000_000 + (i as i64) * 10_000;
                NormalizedBar {
                    symbol: "AAPL".into(),
                    timeframe: "1D".into(),
                    end_ts: i as i64 * 86_400,
                    open_micros: base,
                    high_micros: base + 50_000,
                    low_micros: base - 50_000,
                    close_micros: base,
                    volume: 1_000_000,
                    is_complete: true,
                }
            })
            .collect()
    }

    #[test]
    fn rejects_short_windows() {
        let b = bars(10);
        assert!(matches!(
            compute(&b),
            Err(FeaturesError::InsufficientBars { .. })
        ));
    }

    #[test]
    fn computes_prev_ema_from_one_bar_back() {
        let b = bars(60);
        let f = compute(&b).unwrap();
        let full = compute(&b[..b.len() - 1]);
        if let Ok(full) = full {
            assert_eq!(full.ema9, f.prev_ema9);
            assert_eq!(full.ema21, f.prev_ema21);
        } else {
            // with only 59 bars the min-window check can still pass; if it
            // doesn't, the invariant under test isn't exercised either way.
        }
    }

    #[test]
    fn uptrend_yields_rising_emas() {
        let b = bars(60);
        let f = compute(&b).unwrap();
        assert!(f.ema9 > f.prev_ema9);
        assert!(f.ema9 >= f.ema21);
    }
}
