//! Typed event bus for the trading engine's internal state-change feed.
//!
//! Generalizes the daemon's `BusMsg`/`tokio::sync::broadcast` pattern: one
//! `tokio::sync::broadcast::Sender<Event>`, many subscribers (the SSE bridge
//! in `mqk-daemon`, the journal writer in `mqk-db`, test fixtures). A slow
//! or absent subscriber never backpressures the engine — `broadcast::send`
//! failing with no receivers is simply ignored, and a lagging subscriber
//! sees `RecvError::Lagged(n)` rather than blocking the sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Every state change the trading engine's components emit for observers.
/// Tagged so the JSON wire form matches the daemon's existing SSE framing
/// convention (`{"type": "...", ...}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FeaturesUpdated {
        symbol: String,
        as_of: DateTime<Utc>,
    },
    SignalGenerated {
        symbol: String,
        side: String,
        confidence: u8,
    },
    OrderSubmitted {
        order_id: String,
        symbol: String,
        side: String,
        qty: i64,
    },
    OrderFilled {
        order_id: String,
        symbol: String,
        filled_qty: i64,
        filled_price_micros: i64,
    },
    OrderRejected {
        order_id: String,
        symbol: String,
        reason: String,
    },
    PositionOpened {
        symbol: String,
        qty_signed: i64,
        entry_price_micros: i64,
    },
    PositionModified {
        symbol: String,
        detail: String,
    },
    PositionClosed {
        symbol: String,
        realized_pnl_micros: i64,
    },
    RegimeChanged {
        from: String,
        to: String,
    },
    CircuitBreakerTripped {
        reason: String,
    },
    EngineLog {
        level: String,
        message: String,
    },
}

impl Event {
    /// Stable topic name used for journaling/filtering, independent of the
    /// serde tag (kept separate so renaming a variant's wire tag doesn't
    /// silently change what's written to the audit journal).
    pub fn topic(&self) -> &'static str {
        match self {
            Event::FeaturesUpdated { .. } => "features_updated",
            Event::SignalGenerated { .. } => "signal_generated",
            Event::OrderSubmitted { .. } => "order_submitted",
            Event::OrderFilled { .. } => "order_filled",
            Event::OrderRejected { .. } => "order_rejected",
            Event::PositionOpened { .. } => "position_opened",
            Event::PositionModified { .. } => "position_modified",
            Event::PositionClosed { .. } => "position_closed",
            Event::RegimeChanged { .. } => "regime_changed",
            Event::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            Event::EngineLog { .. } => "engine_log",
        }
    }
}

/// An `Event` tagged with a run-scoped correlation id and emission time, the
/// unit actually sent over the bus and written to the journal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub event: Event,
}

/// Fan-out publisher. Cloning is cheap (wraps a `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// `capacity` bounds how many events a slow subscriber can fall behind
    /// before it starts missing them (`RecvError::Lagged`), per
    /// `tokio::sync::broadcast`'s ring-buffer semantics.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish one event. Never blocks; a `send` with zero receivers is not
    /// an error condition for the engine and is silently dropped.
    pub fn publish(&self, event: Event) {
        let bus_event = BusEvent {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        };
        let _ = self.tx.send(bus_event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(Event::EngineLog {
            level: "info".into(),
            message: "no one listening".into(),
        });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::RegimeChanged {
            from: "trending_up".into(),
            to: "choppy".into(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.topic(), "regime_changed");
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_lagged_error_not_a_block() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(Event::EngineLog {
                level: "info".into(),
                message: format!("msg {i}"),
            });
        }
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
