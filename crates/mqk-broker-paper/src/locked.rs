//! `BrokerAdapter` implementation for paper trading (RT-8).
//!
//! `PaperBroker` (see `lib.rs`) is a plain synchronous struct with its own
//! submit/cancel/replace surface; it doesn't implement
//! `mqk_execution::BrokerAdapter` and generates no fills on its own. This
//! module is that implementation: market legs fill immediately at the
//! price the caller supplies as `limit_price` (the runtime's bar-close
//! reference price), and stop-loss / take-profit legs sit open until a
//! later price update crosses their trigger, at which point the other
//! bracket leg is cancelled (OCO).
//!
//! Deterministic: no clock, no randomness. `broker_order_id` is exactly
//! `order_id`, matching `PaperBroker`'s own id convention.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use mqk_execution::{
    micros_to_price, price_to_micros, BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// A fill the simulation produced, queued for the caller to apply to the
/// portfolio ledger and the event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedFill {
    pub order_id: String,
    pub symbol: String,
    /// Signed: positive = buy, negative = sell, matching `ExecutionIntent::quantity`.
    pub quantity: i32,
    pub price_micros: i64,
}

#[derive(Clone, Debug)]
struct OpenOrder {
    symbol: String,
    quantity: i32,
    order_type: String,
    trigger_micros: Option<i64>,
    oco_peer: Option<String>,
    filled: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    orders: BTreeMap<String, OpenOrder>,
    fills: Vec<SimulatedFill>,
}

/// Thread-safe, cloneable `BrokerAdapter` over the deterministic paper fill
/// simulation. Clones share state, so a handle kept outside the
/// `OrderRouter`/`BrokerGateway` (to drive `on_price_update` and drain
/// fills) observes the same orders the router submits.
#[derive(Clone, Debug, Default)]
pub struct LockedPaperBroker {
    inner: Arc<Mutex<Inner>>,
}

impl LockedPaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link two already-submitted protective legs (stop-loss, take-profit)
    /// as an OCO pair: when one fills, the other is cancelled. Call this
    /// once both legs of a bracket have been submitted.
    pub fn link_oco(&self, stop_order_id: &str, take_profit_order_id: &str) {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");
        if let Some(o) = inner.orders.get_mut(stop_order_id) {
            o.oco_peer = Some(take_profit_order_id.to_string());
        }
        if let Some(o) = inner.orders.get_mut(take_profit_order_id) {
            o.oco_peer = Some(stop_order_id.to_string());
        }
    }

    /// Feed a fresh trade price for `symbol`. Any open stop-loss or
    /// take-profit order whose trigger the price has crossed fills at its
    /// trigger price; filling one leg cancels its OCO peer.
    pub fn on_price_update(&self, symbol: &str, price_micros: i64) {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");

        let triggered: Vec<String> = inner
            .orders
            .iter()
            .filter(|(_, o)| !o.filled && !o.cancelled && o.symbol == symbol)
            .filter_map(|(id, o)| {
                let trigger = o.trigger_micros?;
                let hit = match (o.order_type.as_str(), o.quantity < 0) {
                    ("stop", true) => price_micros <= trigger,
                    ("stop", false) => price_micros >= trigger,
                    ("take_profit", true) => price_micros >= trigger,
                    ("take_profit", false) => price_micros <= trigger,
                    _ => false,
                };
                hit.then(|| id.clone())
            })
            .collect();

        for id in triggered {
            let (peer, symbol, quantity) = {
                let o = inner.orders.get_mut(&id).expect("id came from this map");
                o.filled = true;
                (o.oco_peer.clone(), o.symbol.clone(), o.quantity)
            };
            inner.fills.push(SimulatedFill {
                order_id: id,
                symbol,
                quantity,
                price_micros,
            });
            if let Some(peer_id) = peer {
                if let Some(peer_order) = inner.orders.get_mut(&peer_id) {
                    peer_order.cancelled = true;
                }
            }
        }
    }

    /// Drain and return all fills produced since the last call.
    pub fn drain_fills(&self) -> Vec<SimulatedFill> {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");
        std::mem::take(&mut inner.fills)
    }
}

impl BrokerAdapter for LockedPaperBroker {
    fn submit_order(&self, req: BrokerSubmitRequest) -> Result<BrokerSubmitResponse> {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");

        if req.order_type == "market" {
            let price = req
                .limit_price
                .ok_or("paper broker: market order requires a reference price")?;
            let price_micros = price_to_micros(price)?;
            inner.orders.insert(
                req.order_id.clone(),
                OpenOrder {
                    symbol: req.symbol.clone(),
                    quantity: req.quantity,
                    order_type: req.order_type.clone(),
                    trigger_micros: Some(price_micros),
                    oco_peer: None,
                    filled: true,
                    cancelled: false,
                },
            );
            inner.fills.push(SimulatedFill {
                order_id: req.order_id.clone(),
                symbol: req.symbol,
                quantity: req.quantity,
                price_micros,
            });
        } else {
            let trigger_micros = match req.limit_price {
                Some(p) => Some(price_to_micros(p)?),
                None => None,
            };
            inner.orders.insert(
                req.order_id.clone(),
                OpenOrder {
                    symbol: req.symbol.clone(),
                    quantity: req.quantity,
                    order_type: req.order_type.clone(),
                    trigger_micros,
                    oco_peer: None,
                    filled: false,
                    cancelled: false,
                },
            );
        }

        Ok(BrokerSubmitResponse {
            broker_order_id: req.order_id,
            submitted_at: 0,
            status: "accepted".to_string(),
        })
    }

    fn cancel_order(&self, order_id: &str) -> Result<BrokerCancelResponse> {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");
        if let Some(o) = inner.orders.get_mut(order_id) {
            o.cancelled = true;
        }
        Ok(BrokerCancelResponse {
            broker_order_id: order_id.to_string(),
            cancelled_at: 0,
            status: "cancelled".to_string(),
        })
    }

    fn replace_order(&self, req: BrokerReplaceRequest) -> Result<BrokerReplaceResponse> {
        let mut inner = self.inner.lock().expect("paper broker lock poisoned");
        if let Some(o) = inner.orders.get_mut(&req.broker_order_id) {
            o.quantity = req.quantity;
            if let Some(p) = req.limit_price {
                o.trigger_micros = Some(price_to_micros(p)?);
            }
        }
        Ok(BrokerReplaceResponse {
            broker_order_id: req.broker_order_id,
            replaced_at: 0,
            status: "replaced".to_string(),
        })
    }
}

/// Convenience formatter for building a deterministic reference price from
/// integer micros, for callers assembling `BrokerSubmitRequest.limit_price`.
pub fn reference_price(price_micros: i64) -> f64 {
    micros_to_price(price_micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(order_id: &str, symbol: &str, quantity: i32, order_type: &str, price: f64) -> BrokerSubmitRequest {
        BrokerSubmitRequest {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            quantity,
            order_type: order_type.to_string(),
            limit_price: Some(price),
            time_in_force: "day".to_string(),
        }
    }

    #[test]
    fn market_order_fills_immediately_at_reference_price() {
        let broker = LockedPaperBroker::new();
        broker
            .submit_order(submit("entry-1", "AAPL", 10, "market", 100.0))
            .unwrap();

        let fills = broker.drain_fills();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, "entry-1");
        assert_eq!(fills[0].price_micros, 100_000_000);
    }

    #[test]
    fn stop_loss_fills_when_price_crosses_against_long_and_cancels_take_profit() {
        let broker = LockedPaperBroker::new();
        broker
            .submit_order(submit("entry-1", "AAPL", 10, "market", 100.0))
            .unwrap();
        broker.drain_fills();

        broker
            .submit_order(submit("stop-1", "AAPL", -10, "stop", 95.0))
            .unwrap();
        broker
            .submit_order(submit("tp-1", "AAPL", -10, "take_profit", 110.0))
            .unwrap();
        broker.link_oco("stop-1", "tp-1");

        broker.on_price_update("AAPL", 98_000_000);
        assert!(broker.drain_fills().is_empty());

        broker.on_price_update("AAPL", 94_500_000);
        let fills = broker.drain_fills();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, "stop-1");

        let cancel = broker.cancel_order("tp-1").unwrap();
        assert_eq!(cancel.status, "cancelled");
    }

    #[test]
    fn take_profit_fill_cancels_stop_peer() {
        let broker = LockedPaperBroker::new();
        broker
            .submit_order(submit("entry-2", "MSFT", 5, "market", 200.0))
            .unwrap();
        broker.drain_fills();

        broker
            .submit_order(submit("stop-2", "MSFT", -5, "stop", 190.0))
            .unwrap();
        broker
            .submit_order(submit("tp-2", "MSFT", -5, "take_profit", 220.0))
            .unwrap();
        broker.link_oco("stop-2", "tp-2");

        broker.on_price_update("MSFT", 221_000_000);
        let fills = broker.drain_fills();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, "tp-2");

        // OCO peer is marked cancelled internally; a later price move past
        // the old stop trigger must not also produce a fill for it.
        broker.on_price_update("MSFT", 150_000_000);
        assert!(broker.drain_fills().is_empty());
    }

    #[test]
    fn replace_order_updates_trigger_price() {
        let broker = LockedPaperBroker::new();
        broker
            .submit_order(submit("stop-3", "TSLA", -3, "stop", 90.0))
            .unwrap();

        broker
            .replace_order(BrokerReplaceRequest {
                broker_order_id: "stop-3".to_string(),
                quantity: -3,
                limit_price: Some(92.0),
                time_in_force: "day".to_string(),
            })
            .unwrap();

        broker.on_price_update("TSLA", 91_000_000);
        assert!(broker.drain_fills().is_empty());
        broker.on_price_update("TSLA", 91_900_000);
        assert_eq!(broker.drain_fills().len(), 1);
    }
}
