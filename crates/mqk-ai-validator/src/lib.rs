//! Optional AI-assisted validation hook for high-risk order intents.
//!
//! The model/routing behind `AiValidator::validate` is an external
//! collaborator (copilot/LLM routing is explicitly out of scope here). This
//! crate only defines the request/response contract and the hard-timeout
//! wrapper every caller MUST use: on timeout or transport error the
//! decision fails open (`Approved`), since the validator is an advisory
//! second opinion, not a gate of record — `RiskManager`'s own checks are.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub symbol: String,
    pub side: String,
    pub qty: i64,
    pub confidence: u8,
    pub reason_for_flag: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationDecision {
    Approved,
    Rejected { reason: String },
}

#[async_trait]
pub trait AiValidator: Send + Sync {
    async fn validate(&self, req: ValidationRequest) -> ValidationDecision;
}

/// Wraps any `AiValidator` with a hard deadline. Always resolves —
/// timeout and inner-future panics aside, there is no way for a caller
/// awaiting `TimeoutValidator::validate` to block the risk-evaluation path
/// indefinitely.
pub struct TimeoutValidator<V> {
    inner: V,
    deadline: Duration,
}

impl<V: AiValidator> TimeoutValidator<V> {
    pub fn new(inner: V, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<V: AiValidator> AiValidator for TimeoutValidator<V> {
    async fn validate(&self, req: ValidationRequest) -> ValidationDecision {
        match tokio::time::timeout(self.deadline, self.inner.validate(req)).await {
            Ok(decision) => decision,
            Err(_) => {
                tracing::warn!("AI validator timed out; failing open (approved)");
                ValidationDecision::Approved
            }
        }
    }
}

/// Always-approve stub, useful when no AI validator is configured.
pub struct NoopValidator;

#[async_trait]
impl AiValidator for NoopValidator {
    async fn validate(&self, _req: ValidationRequest) -> ValidationDecision {
        ValidationDecision::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    struct SlowValidator;

    #[async_trait]
    impl AiValidator for SlowValidator {
        async fn validate(&self, _req: ValidationRequest) -> ValidationDecision {
            tokio::time::sleep(StdDuration::from_millis(200)).await;
            ValidationDecision::Rejected {
                reason: "too slow to matter".into(),
            }
        }
    }

    fn req() -> ValidationRequest {
        ValidationRequest {
            symbol: "AAPL".into(),
            side: "BUY".into(),
            qty: 10,
            confidence: 80,
            reason_for_flag: "large position size".into(),
        }
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        let v = TimeoutValidator::new(SlowValidator, StdDuration::from_millis(10));
        let decision = v.validate(req()).await;
        assert_eq!(decision, ValidationDecision::Approved);
    }

    #[tokio::test]
    async fn fast_validator_returns_its_own_decision() {
        let v = TimeoutValidator::new(NoopValidator, StdDuration::from_secs(1));
        let decision = v.validate(req()).await;
        assert_eq!(decision, ValidationDecision::Approved);
    }
}
