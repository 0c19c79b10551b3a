//! Concrete EMA9/EMA21 crossover strategy.
//!
//! Runs off the [`mqk_md::Features`] snapshot the runtime computes once per
//! bar close, plus a small bundle of external signals (`ExternalSignals`)
//! the runtime sets before calling `on_bar` each tick — daily trend, regime
//! multiplier, sentiment, and the trading-window gate all live outside the
//! strategy's own state because they're shared across every registered
//! strategy. The strategy never re-derives EMA/RSI/MACD itself; `Features`
//! is the single source of truth so Strategy and MarketDataCache can't
//! silently diverge on the same numbers.

use mqk_execution::{Side, StrategyOutput, TargetPosition};
use mqk_md::Features;

use crate::{BarStub, RecentBarsWindow, Strategy, StrategyContext, StrategySpec};

#[derive(Clone, Debug, PartialEq)]
pub struct EmaCrossoverConfig {
    pub confirmations_required: u8,
    /// Base adaptive threshold for long signals, before regime/time/sentiment adjustment.
    pub base_confidence_threshold_long: f64,
    /// Base adaptive threshold for short signals — higher than long, shorts need more conviction.
    pub base_confidence_threshold_short: f64,
    /// Hard ceiling the adjusted threshold is capped at, regardless of adjustments.
    pub max_confidence_threshold: f64,
    pub long_only: bool,
    /// Sentiment score (0-100) below which shorts are rejected outright (extreme fear).
    pub short_sentiment_reject_below: u8,
    /// Sentiment score below which shorts require extra confirmations/confidence (fear band).
    pub short_sentiment_tighten_below: u8,
    /// Confirmations required in the fear band (in addition to `confirmations_required`).
    pub short_sentiment_tighten_confirmations: u8,
    /// Confidence required in the fear band.
    pub short_sentiment_tighten_confidence: f64,
}

impl EmaCrossoverConfig {
    pub fn sane_defaults() -> Self {
        Self {
            confirmations_required: 3,
            base_confidence_threshold_long: 50.0,
            base_confidence_threshold_short: 55.0,
            max_confidence_threshold: 75.0,
            long_only: false,
            short_sentiment_reject_below: 20,
            short_sentiment_tighten_below: 30,
            short_sentiment_tighten_confirmations: 3,
            short_sentiment_tighten_confidence: 75.0,
        }
    }
}

/// Runtime-injected context the host's minimal `StrategyContext` doesn't
/// carry. Set by the caller before each `on_bar` invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExternalSignals {
    pub position_open: bool,
    pub frozen: bool,
    pub within_trading_window: bool,
    /// `None` means the daily cache is degraded (fail-open: treated as
    /// neutral, never blocks a trade on its own).
    pub daily_trend_bullish: Option<bool>,
    /// Regime-derived adjustment to the adaptive threshold, `0.0..=15.0`.
    pub regime_threshold_adjustment: f64,
    /// Time-of-day adjustment to the adaptive threshold, `-3.0..=3.0`.
    pub time_of_day_threshold_adjustment: f64,
    /// 0-100 sentiment score; `None` if unavailable (treated as neutral, 50).
    pub sentiment_score: Option<u8>,
    /// Most recent computed feature snapshot for the symbol. `None` means
    /// the cache isn't warm yet (not enough bars) — strategy stays flat.
    pub features: Option<Features>,
}

impl Default for ExternalSignals {
    fn default() -> Self {
        Self {
            position_open: false,
            frozen: false,
            within_trading_window: true,
            daily_trend_bullish: None,
            regime_threshold_adjustment: 0.0,
            time_of_day_threshold_adjustment: 0.0,
            sentiment_score: None,
            features: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CrossoverSignal {
    side: Side,
}

fn detect_crossover(f: &Features) -> Option<CrossoverSignal> {
    if f.prev_ema9 <= f.prev_ema21 && f.ema9 > f.ema21 {
        Some(CrossoverSignal { side: Side::Buy })
    } else if f.prev_ema9 >= f.prev_ema21 && f.ema9 < f.ema21 {
        Some(CrossoverSignal { side: Side::Sell })
    } else {
        None
    }
}

/// Counts how many of the four confirmation checks agree with `side`:
/// volume above its trailing average, RSI on the favorable side of 50,
/// MACD-line sign agreeing with the crossover direction, and the crossover
/// gap (ema9 vs ema21) being a nontrivial fraction of price.
fn count_confirmations(f: &Features, signal: &CrossoverSignal) -> u8 {
    let mut confirmed = 0u8;

    if let Some(ratio) = f.volume_ratio {
        if ratio > 1.1 {
            confirmed += 1;
        }
    }

    if let Some(rsi) = f.rsi14 {
        let favorable = match signal.side {
            Side::Buy => rsi > 50.0 && rsi < 80.0,
            Side::Sell => rsi < 50.0 && rsi > 20.0,
        };
        if favorable {
            confirmed += 1;
        }
    }

    if let Some(macd) = f.macd {
        let agrees = match signal.side {
            Side::Buy => macd > 0.0,
            Side::Sell => macd < 0.0,
        };
        if agrees {
            confirmed += 1;
        }
    }

    let gap = (f.ema9 - f.ema21).abs();
    let price = f.price.max(1.0);
    if gap / price > 0.001 {
        confirmed += 1;
    }

    confirmed
}

/// Confidence is confirmations translated to a 0-100 scale, uncapped — a
/// distinct quantity from the adaptive *threshold* it's compared against.
fn score_confidence(confirmations: u8) -> f64 {
    (confirmations as f64) * 25.0
}

/// Adaptive comparison threshold: side-specific base, widened by regime and
/// time-of-day, nudged by sentiment, then capped at `max_confidence_threshold`.
fn adaptive_threshold(cfg: &EmaCrossoverConfig, ext: &ExternalSignals, side: Side) -> f64 {
    let base = match side {
        Side::Buy => cfg.base_confidence_threshold_long,
        Side::Sell => cfg.base_confidence_threshold_short,
    };
    let sentiment_adj = match ext.sentiment_score {
        Some(s) if side == Side::Buy => (s as f64 - 50.0) / 10.0 * 8.0 / 5.0,
        Some(s) if side == Side::Sell => (50.0 - s as f64) / 10.0 * 8.0 / 5.0,
        _ => 0.0,
    };
    let adjusted = base
        + ext.regime_threshold_adjustment.clamp(0.0, 15.0)
        + ext.time_of_day_threshold_adjustment.clamp(-3.0, 3.0)
        + sentiment_adj.clamp(-8.0, 8.0);
    adjusted.min(cfg.max_confidence_threshold)
}

/// Spec band logic for shorts: reject outright below `short_sentiment_reject_below`
/// (extreme fear), require a tightened confirmation/confidence bar in the
/// `..short_sentiment_tighten_below` band (fear), otherwise no extra gate.
fn short_sentiment_gate(
    cfg: &EmaCrossoverConfig,
    sentiment: u8,
    confirmations: u8,
    confidence: f64,
) -> bool {
    if sentiment < cfg.short_sentiment_reject_below {
        return false;
    }
    if sentiment < cfg.short_sentiment_tighten_below {
        return confirmations >= cfg.short_sentiment_tighten_confirmations
            && confidence >= cfg.short_sentiment_tighten_confidence;
    }
    true
}

pub struct EmaCrossoverStrategy {
    symbol: String,
    spec: StrategySpec,
    cfg: EmaCrossoverConfig,
    external: ExternalSignals,
}

impl EmaCrossoverStrategy {
    /// One strategy instance trades exactly one symbol; the runtime owns
    /// one `StrategyHost` (and hence one instance) per symbol it trades.
    pub fn new(symbol: impl Into<String>, timeframe_secs: i64, cfg: EmaCrossoverConfig) -> Self {
        Self {
            symbol: symbol.into(),
            spec: StrategySpec::new("ema_crossover", timeframe_secs),
            cfg,
            external: ExternalSignals::default(),
        }
    }

    /// Called by the runtime before `on_bar` to inject the signals the
    /// minimal `StrategyContext` doesn't carry.
    pub fn set_external_signals(&mut self, ext: ExternalSignals) {
        self.external = ext;
    }
}

impl Strategy for EmaCrossoverStrategy {
    fn spec(&self) -> StrategySpec {
        self.spec.clone()
    }

    fn on_bar(&mut self, _ctx: &StrategyContext) -> StrategyOutput {
        let flat = StrategyOutput { targets: vec![] };

        if self.external.position_open || self.external.frozen {
            return flat;
        }
        if !self.external.within_trading_window {
            return flat;
        }

        let Some(features) = self.external.features else {
            return flat;
        };

        let Some(signal) = detect_crossover(&features) else {
            return flat;
        };

        if self.cfg.long_only && signal.side == Side::Sell {
            return flat;
        }

        // Daily-trend filter is fail-open: a degraded (`None`) reading never
        // blocks a trade, it only vetoes a crossover that directly
        // contradicts a *known* daily trend.
        if let Some(bullish) = self.external.daily_trend_bullish {
            if (signal.side == Side::Buy && !bullish) || (signal.side == Side::Sell && bullish) {
                return flat;
            }
        }

        let confirmations = count_confirmations(&features, &signal);
        let confidence = score_confidence(confirmations);

        if signal.side == Side::Sell {
            if let Some(sentiment) = self.external.sentiment_score {
                if !short_sentiment_gate(&self.cfg, sentiment, confirmations, confidence) {
                    return flat;
                }
            }
        }

        if confirmations < self.cfg.confirmations_required {
            return flat;
        }

        let threshold = adaptive_threshold(&self.cfg, &self.external, signal.side);
        if confidence < threshold {
            return flat;
        }

        let target_qty: i64 = match signal.side {
            Side::Buy => 1,
            Side::Sell => -1,
        };
        StrategyOutput {
            targets: vec![TargetPosition::new(self.symbol.clone(), target_qty)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_window(n: usize) -> RecentBarsWindow {
        RecentBarsWindow::new(n, vec![BarStub::new(0, true, 100_000_000, 1_000_000)])
    }

    fn ctx_from(window: RecentBarsWindow) -> StrategyContext {
        StrategyContext::new(60, 0, window)
    }

    fn features_crossover(side: Side) -> Features {
        let (ema9, ema21, prev_ema9, prev_ema21) = match side {
            Side::Buy => (101.0, 100.0, 99.0, 100.0),
            Side::Sell => (99.0, 100.0, 100.0, 99.0),
        };
        Features {
            price: 100_000_000.0,
            ema9,
            ema21,
            prev_ema9,
            prev_ema21,
            ema50: None,
            rsi14: Some(if side == Side::Buy { 60.0 } else { 40.0 }),
            macd: Some(if side == Side::Buy { 1.0 } else { -1.0 }),
            macd_signal: None,
            atr14: None,
            adx14: None,
            vwap: None,
            volume_ratio: Some(1.5),
            volatility_rank: None,
        }
    }

    #[test]
    fn flat_when_position_open() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            position_open: true,
            features: Some(features_crossover(Side::Buy)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn flat_outside_trading_window() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            within_trading_window: false,
            features: Some(features_crossover(Side::Buy)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn flat_without_features() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals::default());
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn long_only_blocks_short_signal() {
        let mut cfg = EmaCrossoverConfig::sane_defaults();
        cfg.long_only = true;
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, cfg);
        s.set_external_signals(ExternalSignals {
            features: Some(features_crossover(Side::Sell)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn daily_trend_veto_blocks_contradicting_long() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            daily_trend_bullish: Some(false),
            features: Some(features_crossover(Side::Buy)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn degraded_daily_trend_does_not_block() {
        // A None reading (degraded cache) must never veto on its own.
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            daily_trend_bullish: None,
            features: Some(features_crossover(Side::Buy)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(!out.targets.is_empty());
    }

    #[test]
    fn short_rejected_on_extreme_fear_sentiment() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            sentiment_score: Some(5),
            features: Some(features_crossover(Side::Sell)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(out.targets.is_empty());
    }

    #[test]
    fn short_allowed_when_fear_band_meets_tightened_bar() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        // volume_ratio 1.5, rsi 40, macd -1, gap nontrivial -> 4 confirmations, confidence 100.
        s.set_external_signals(ExternalSignals {
            sentiment_score: Some(25),
            features: Some(features_crossover(Side::Sell)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(!out.targets.is_empty());
    }

    #[test]
    fn short_not_blocked_by_high_sentiment() {
        let mut s = EmaCrossoverStrategy::new("AAPL", 60, EmaCrossoverConfig::sane_defaults());
        s.set_external_signals(ExternalSignals {
            sentiment_score: Some(90),
            features: Some(features_crossover(Side::Sell)),
            ..Default::default()
        });
        let out = s.on_bar(&ctx_from(empty_window(40)));
        assert!(!out.targets.is_empty());
    }
}
