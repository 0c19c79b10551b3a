//! Rolling in-memory bar cache per symbol.
//!
//! Keeps at least 200 bars per symbol so every indicator in `indicators.rs`
//! always has enough history once warmed up. Refresh is modeled as
//! single-flight: a caller that finds `refresh_in_flight() == true` must not
//! start a second fetch for that symbol, it should await the one already
//! running.

use std::collections::{BTreeMap, VecDeque};

use crate::normalizer::NormalizedBar;

pub const MIN_WINDOW_BARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceSeverity {
    /// Within tolerance, no action needed.
    None,
    /// Between the warn and reject bands: log and keep using the cache.
    Warn,
    /// Beyond the reject band: the cache is stale enough that callers
    /// should force a refresh before trusting it.
    Reject,
}

#[derive(Debug, Clone)]
struct SymbolWindow {
    bars: VecDeque<NormalizedBar>,
    refresh_in_flight: bool,
}

impl SymbolWindow {
    fn new() -> Self {
        Self {
            bars: VecDeque::new(),
            refresh_in_flight: false,
        }
    }
}

/// Rolling per-symbol window of normalized bars, capped at `capacity`
/// (never below [`MIN_WINDOW_BARS`]).
#[derive(Debug, Clone)]
pub struct MarketDataCache {
    capacity: usize,
    symbols: BTreeMap<String, SymbolWindow>,
}

impl MarketDataCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_WINDOW_BARS),
            symbols: BTreeMap::new(),
        }
    }

    /// Appends a bar to `symbol`'s window, evicting the oldest bar once the
    /// window exceeds capacity. Bars are expected to arrive in `end_ts`
    /// order; out-of-order bars are still accepted (callers may re-sort).
    pub fn push_bar(&mut self, symbol: &str, bar: NormalizedBar) {
        let window = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(SymbolWindow::new);
        window.bars.push_back(bar);
        while window.bars.len() > self.capacity {
            window.bars.pop_front();
        }
    }

    pub fn window(&self, symbol: &str) -> Vec<NormalizedBar> {
        self.symbols
            .get(symbol)
            .map(|w| w.bars.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_warm(&self, symbol: &str) -> bool {
        self.symbols
            .get(symbol)
            .is_some_and(|w| w.bars.len() >= MIN_WINDOW_BARS)
    }

    /// Returns `true` and marks the symbol as refreshing if no refresh was
    /// already in flight; returns `false` if a refresh is already running,
    /// signalling the caller to skip starting a second one.
    pub fn begin_refresh(&mut self, symbol: &str) -> bool {
        let window = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(SymbolWindow::new);
        if window.refresh_in_flight {
            false
        } else {
            window.refresh_in_flight = true;
            true
        }
    }

    pub fn complete_refresh(&mut self, symbol: &str) {
        if let Some(window) = self.symbols.get_mut(symbol) {
            window.refresh_in_flight = false;
        }
    }

    pub fn refresh_in_flight(&self, symbol: &str) -> bool {
        self.symbols
            .get(symbol)
            .is_some_and(|w| w.refresh_in_flight)
    }
}

/// Classifies the divergence between the cached latest close and a
/// freshly observed trade/quote price against the 0.5%/1% bands.
pub fn classify_divergence(cached_price_micros: i64, observed_price_micros: i64) -> DivergenceSeverity {
    if cached_price_micros == 0 {
        return DivergenceSeverity::Reject;
    }
    let diff = (observed_price_micros - cached_price_micros).abs() as f64;
    let pct = diff / cached_price_micros as f64;
    if pct >= 0.01 {
        DivergenceSeverity::Reject
    } else if pct >= 0.005 {
        DivergenceSeverity::Warn
    } else {
        DivergenceSeverity::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: i64) -> NormalizedBar {
        NormalizedBar {
            symbol: "AAPL".into(),
            timeframe: "1D".into(),
            end_ts: 0,
            open_micros: close,
            high_micros: close,
            low_micros: close,
            close_micros: close,
            volume: 1,
            is_complete: true,
        }
    }

    #[test]
    fn window_caps_at_capacity() {
        let mut cache = MarketDataCache::new(5);
        for i in 0..10 {
            cache.push_bar("AAPL", bar(i));
        }
        assert_eq!(cache.window("AAPL").len(), 5);
    }

    #[test]
    fn capacity_never_below_minimum() {
        let cache = MarketDataCache::new(10);
        for i in 0..250 {
            let mut c = cache.clone();
            c.push_bar("AAPL", bar(i));
        }
        let mut cache = MarketDataCache::new(10);
        for i in 0..250 {
            cache.push_bar("AAPL", bar(i));
        }
        assert_eq!(cache.window("AAPL").len(), MIN_WINDOW_BARS);
    }

    #[test]
    fn single_flight_blocks_second_refresh() {
        let mut cache = MarketDataCache::new(200);
        assert!(cache.begin_refresh("AAPL"));
        assert!(!cache.begin_refresh("AAPL"));
        cache.complete_refresh("AAPL");
        assert!(cache.begin_refresh("AAPL"));
    }

    #[test]
    fn divergence_bands() {
        assert_eq!(
            classify_divergence(100_000_000, 100_100_000),
            DivergenceSeverity::None
        );
        assert_eq!(
            classify_divergence(100_000_000, 100_600_000),
            DivergenceSeverity::Warn
        );
        assert_eq!(
            classify_divergence(100_000_000, 101_500_000),
            DivergenceSeverity::Reject
        );
    }
}
