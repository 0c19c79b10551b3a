//! Multi-method fill verification with adaptive backoff.
//!
//! Broker-reported order status alone is not trusted as the sole fill
//! signal: a single flaky status string must not cause a live order's
//! protective bracket to silently go unprotected. `evaluate_fill` combines
//! four independent checks; `FillPoller` drives the 0.5s -> 2.0s capped
//! backoff schedule described for `OrderExecutor`.

use std::time::Duration;

/// Minimal broker order snapshot, independent of any one adapter's wire
/// format, used purely to decide fill status.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub status: String,
    pub requested_qty: i64,
    pub filled_qty: i64,
    pub filled_avg_price_micros: Option<i64>,
    pub filled_at: Option<i64>,
}

/// Result of applying the multi-method check to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillVerdict {
    /// All four signals agree the order is filled.
    Filled,
    /// Status string claims fill but quantitative fields disagree, or
    /// vice versa — poll again rather than trust either signal alone.
    Ambiguous,
    /// No signal indicates a fill yet; order is still open/working.
    NotFilled,
}

const FILLED_STATUS_WORDS: [&str; 3] = ["filled", "executed", "complete"];

/// Applies the four-signal check from the fill-verification contract:
/// status string match, `filled_qty >= requested_qty`, a positive average
/// fill price, and a populated `filled_at`. All four must agree for
/// `Filled`; if some but not all agree, the result is `Ambiguous` and the
/// caller should keep polling rather than assume either answer.
pub fn evaluate_fill(snap: &OrderSnapshot) -> FillVerdict {
    let status_says_filled = FILLED_STATUS_WORDS
        .iter()
        .any(|w| snap.status.to_lowercase().contains(w));
    let qty_says_filled = snap.requested_qty > 0 && snap.filled_qty >= snap.requested_qty;
    let price_says_filled = matches!(snap.filled_avg_price_micros, Some(p) if p > 0);
    let timestamp_says_filled = snap.filled_at.is_some();

    let agree_count = [
        status_says_filled,
        qty_says_filled,
        price_says_filled,
        timestamp_says_filled,
    ]
    .iter()
    .filter(|b| **b)
    .count();

    match agree_count {
        4 => FillVerdict::Filled,
        0 => FillVerdict::NotFilled,
        _ => FillVerdict::Ambiguous,
    }
}

/// Drives the adaptive poll-interval schedule: starts at `initial`,
/// doubles on every `Ambiguous`/`NotFilled` result, capped at `max`.
pub struct FillPoller {
    interval: Duration,
    max: Duration,
}

impl FillPoller {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max: Duration::from_secs(2),
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    /// Call after each poll attempt. Returns the interval to sleep before
    /// the *next* poll.
    pub fn advance(&mut self) -> Duration {
        let next = self.interval * 2;
        self.interval = if next > self.max { self.max } else { next };
        self.interval
    }
}

impl Default for FillPoller {
    fn default() -> Self {
        Self::new()
    }
}
