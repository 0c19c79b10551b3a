//! Sentiment ingestion boundary.
//!
//! The scoring pipeline itself (news/social aggregation, NLP) is an
//! external collaborator — this crate only defines the contract a feed
//! must satisfy and the staleness fallback applied before a score reaches
//! the strategy or risk layers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse sentiment label alongside the numeric score, mirroring how the
/// upstream scoring pipeline reports it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    VeryNegative,
    Negative,
    Neutral,
    Positive,
    VeryPositive,
}

/// A single symbol's sentiment reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub symbol: String,
    /// 0-100 scale; 50 is neutral.
    pub score: u8,
    pub label: SentimentLabel,
    pub as_of: DateTime<Utc>,
}

impl Sentiment {
    pub fn neutral(symbol: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            score: 50,
            label: SentimentLabel::Neutral,
            as_of,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentimentError {
    Transport(String),
    Decode(String),
    Config(String),
}

impl fmt::Display for SentimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentimentError::Transport(msg) => write!(f, "sentiment transport error: {msg}"),
            SentimentError::Decode(msg) => write!(f, "sentiment decode error: {msg}"),
            SentimentError::Config(msg) => write!(f, "sentiment config error: {msg}"),
        }
    }
}

impl std::error::Error for SentimentError {}

/// Contract an external sentiment provider must satisfy. The scoring logic
/// behind `fetch` is out of scope here — this crate only consumes it.
pub trait SentimentFeed: Send + Sync {
    fn fetch(&self, symbol: &str) -> Result<Sentiment, SentimentError>;
}

/// Applies the 24h staleness fallback: readings older than the bound are
/// replaced with a neutral score rather than trusted stale, per the
/// external-interface contract for sentiment.
pub struct StalenessPolicy {
    pub max_age: Duration,
}

impl StalenessPolicy {
    pub fn hours(h: i64) -> Self {
        Self {
            max_age: Duration::hours(h),
        }
    }

    pub fn apply(&self, reading: Sentiment, now: DateTime<Utc>) -> Sentiment {
        if now - reading.as_of > self.max_age {
            Sentiment::neutral(reading.symbol, now)
        } else {
            reading
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::hours(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_reading_passes_through_unchanged() {
        let now = Utc::now();
        let reading = Sentiment {
            symbol: "AAPL".into(),
            score: 72,
            label: SentimentLabel::Positive,
            as_of: now - Duration::hours(1),
        };
        let out = StalenessPolicy::default().apply(reading.clone(), now);
        assert_eq!(out, reading);
    }

    #[test]
    fn stale_reading_falls_back_to_neutral() {
        let now = Utc::now();
        let reading = Sentiment {
            symbol: "AAPL".into(),
            score: 72,
            label: SentimentLabel::Positive,
            as_of: now - Duration::hours(25),
        };
        let out = StalenessPolicy::default().apply(reading, now);
        assert_eq!(out.score, 50);
        assert_eq!(out.label, SentimentLabel::Neutral);
    }

    #[test]
    fn boundary_age_is_not_stale() {
        let now = Utc::now();
        let reading = Sentiment {
            symbol: "AAPL".into(),
            score: 30,
            label: SentimentLabel::Negative,
            as_of: now - Duration::hours(24),
        };
        let out = StalenessPolicy::default().apply(reading.clone(), now);
        assert_eq!(out, reading);
    }
}
