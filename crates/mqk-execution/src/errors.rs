//! Broker error classification shared by every adapter (`mqk-broker-paper`,
//! `mqk-broker-alpaca`). Callers route retries by matching on this rather
//! than parsing adapter-specific error strings a second time.

use std::fmt;

/// How a broker-level failure should be handled by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Network blip, 5xx, or similar — safe to retry with backoff.
    Transient(String),
    /// Broker rate limiting (e.g. HTTP 429) — retry after a cooldown.
    RateLimited(String),
    /// Validation or auth failure that will not succeed on retry.
    Permanent(String),
    /// The order is already in a terminal broker-side state (filled,
    /// cancelled) and the requested action (typically cancel) cannot
    /// apply. Not actually an error for the caller: it usually means the
    /// fill-verification path should treat the order as filled.
    AlreadyTerminal(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Transient(msg) => write!(f, "broker transient error: {msg}"),
            BrokerError::RateLimited(msg) => write!(f, "broker rate limited: {msg}"),
            BrokerError::Permanent(msg) => write!(f, "broker permanent error: {msg}"),
            BrokerError::AlreadyTerminal(msg) => write!(f, "order already terminal: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Recognizes the broker's documented "order already filled, cannot
/// cancel" responses so the fill-verification path can treat a failed
/// cancel as evidence of a fill rather than a hard error.
///
/// Matches on the documented Alpaca contract: HTTP 422 code `42210000`,
/// or a message containing "already filled" / "already in ... filled
/// state" / "cannot cancel filled order" (case-insensitive).
pub fn is_already_filled_response(http_status: Option<u16>, body: &str) -> bool {
    if http_status == Some(422) && body.contains("42210000") {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("already filled")
        || (lower.contains("already in") && lower.contains("filled") && lower.contains("state"))
        || lower.contains("cannot cancel filled order")
}
