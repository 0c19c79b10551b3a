//! Once-per-session daily-bar cache and trend label, plus the dual-API-key
//! rotation helper used to fetch it.
//!
//! Unlike `mqk-integrity`'s halt/disarm gates, a stale or unavailable daily
//! cache does not stop trading: it degrades to a neutral trend reading so
//! the strategy can keep using intraday signals. Degraded is a fail-open
//! state, recorded so callers can still surface it in logs/metrics.

use crate::normalizer::NormalizedBar;
use crate::indicators;

pub const MIN_DAILY_BARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyCacheStatus {
    Fresh,
    /// Could not be fetched or warmed this session; trend reads as neutral.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyTrendLabel {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyTrend {
    pub status: DailyCacheStatus,
    pub ema200: Option<f64>,
    pub ema9d: Option<f64>,
    pub ema21d: Option<f64>,
    pub label: DailyTrendLabel,
}

impl DailyTrend {
    fn degraded() -> Self {
        Self {
            status: DailyCacheStatus::Degraded,
            ema200: None,
            ema9d: None,
            ema21d: None,
            label: DailyTrendLabel::Neutral,
        }
    }
}

/// Per-session daily-bar cache for one symbol. Fetched at most once per
/// session; `fetched_this_session` guards against a caller accidentally
/// refetching mid-day.
#[derive(Debug, Clone, Default)]
pub struct DailyCache {
    bars: Vec<NormalizedBar>,
    fetched_this_session: bool,
}

impl DailyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_fetch(&self) -> bool {
        !self.fetched_this_session
    }

    /// Records a fetch attempt. `bars` should already be sorted
    /// oldest-to-newest; an empty or short result is accepted but yields a
    /// degraded trend read.
    pub fn record_fetch(&mut self, bars: Vec<NormalizedBar>) {
        self.bars = bars;
        self.fetched_this_session = true;
    }

    /// Marks the session as attempted without usable data (e.g. every
    /// provider key failed). Trend reads degrade to neutral for the rest
    /// of the session rather than retrying repeatedly.
    pub fn record_fetch_failed(&mut self) {
        self.bars.clear();
        self.fetched_this_session = true;
    }

    pub fn trend(&self) -> DailyTrend {
        if self.bars.len() < MIN_DAILY_BARS {
            return DailyTrend::degraded();
        }
        let ema200 = indicators::ema(&self.bars, 200);
        let ema9d = indicators::ema(&self.bars, 9);
        let ema21d = indicators::ema(&self.bars, 21);
        let (Some(e200), Some(e9), Some(e21)) = (ema200, ema9d, ema21d) else {
            return DailyTrend::degraded();
        };
        let price = self.bars.last().unwrap().close_micros as f64;
        let label = if price > e200 && e9 > e21 {
            DailyTrendLabel::Bullish
        } else if price < e200 && e9 < e21 {
            DailyTrendLabel::Bearish
        } else {
            DailyTrendLabel::Neutral
        };
        DailyTrend {
            status: DailyCacheStatus::Fresh,
            ema200: Some(e200),
            ema9d: Some(e9),
            ema21d: Some(e21),
            label,
        }
    }
}

/// Rotates between two API keys for providers that rate-limit per key,
/// so a single exhausted key doesn't degrade the daily cache unnecessarily.
#[derive(Debug, Clone)]
pub struct ApiKeyRing {
    keys: Vec<String>,
    next: usize,
}

impl ApiKeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, next: 0 }
    }

    /// Returns the next key to try, rotating on every call. Returns `None`
    /// if no keys are configured.
    pub fn next_key(&mut self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.next;
        self.next = (self.next + 1) % self.keys.len();
        Some(&self.keys[idx])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
