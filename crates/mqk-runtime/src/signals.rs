//! Builds `mqk_strategy::ExternalSignals` for one symbol from the engine's
//! market-wide regime, the symbol's sentiment reading and daily trend, and
//! the current wall-clock position within the trading session.

use chrono::{DateTime, NaiveTime, Utc};

use mqk_md::daily::DailyTrendLabel;
use mqk_regime::{Regime, RegimeLabel};
use mqk_sentiment::Sentiment;
use mqk_strategy::ExternalSignals;

use crate::types::EngineConfig;

/// Regime-driven addition to the adaptive confidence threshold: choppy
/// backdrops demand the most additional confirmation, narrow/neutral
/// regimes a little, clean broad trends none. Clamped to 0..15 inside
/// `EmaCrossoverStrategy::on_bar`.
pub fn regime_threshold_adjustment(regime: &Regime) -> f64 {
    match regime.label {
        RegimeLabel::Choppy => 15.0,
        RegimeLabel::BroadNeutral | RegimeLabel::NarrowBullish | RegimeLabel::NarrowBearish => 8.0,
        RegimeLabel::BroadBullish | RegimeLabel::BroadBearish => 0.0,
    }
}

/// Time-of-day adjustment to the adaptive threshold: the opening and
/// closing minutes of the session are the noisiest, so entries there need
/// a little extra confidence. Clamped to -3..3 inside the strategy.
pub fn time_of_day_threshold_adjustment(
    now: DateTime<Utc>,
    market_open: NaiveTime,
    market_close: NaiveTime,
) -> f64 {
    let t = now.time();
    let window = chrono::Duration::minutes(15);
    let opening_bell = t >= market_open && t < market_open + window;
    let closing_bell = t >= market_close - window && t < market_close;
    if opening_bell || closing_bell {
        3.0
    } else {
        0.0
    }
}

/// Whether `now` falls inside the tradeable session window (open plus a
/// settle buffer, through the configured end-of-day cutoff).
pub fn within_trading_window(now: DateTime<Utc>, cfg: &EngineConfig) -> bool {
    let t = now.time();
    t >= cfg.market_open && t < cfg.eod_cutoff
}

fn daily_trend_bullish(label: Option<DailyTrendLabel>) -> Option<bool> {
    match label {
        Some(DailyTrendLabel::Bullish) => Some(true),
        Some(DailyTrendLabel::Bearish) => Some(false),
        Some(DailyTrendLabel::Neutral) | None => None,
    }
}

/// Assemble the full `ExternalSignals` the strategy needs for one symbol's
/// `on_bar` evaluation.
#[allow(clippy::too_many_arguments)]
pub fn build_external_signals(
    cfg: &EngineConfig,
    now: DateTime<Utc>,
    position_open: bool,
    frozen: bool,
    daily_trend: Option<DailyTrendLabel>,
    regime: &Regime,
    sentiment: Option<&Sentiment>,
    features: Option<mqk_md::Features>,
) -> ExternalSignals {
    ExternalSignals {
        position_open,
        frozen,
        within_trading_window: within_trading_window(now, cfg),
        daily_trend_bullish: daily_trend_bullish(daily_trend),
        regime_threshold_adjustment: regime_threshold_adjustment(regime),
        time_of_day_threshold_adjustment: time_of_day_threshold_adjustment(
            now,
            cfg.market_open,
            cfg.market_close,
        ),
        sentiment_score: sentiment.map(|s| s.score),
        features,
    }
}
