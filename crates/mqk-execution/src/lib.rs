//! mqk-execution
//!
//! Execution boundary between the strategy/risk core and broker adapters.
//!
//! - Strategies output target positions (not orders); `targets_to_order_intents`
//!   converts `(current_positions, targets)` into signed-qty order intents.
//! - `BrokerGateway` is the single choke-point for every broker RPC: every
//!   submit/cancel/replace/bracket call evaluates integrity/risk/reconcile
//!   gate verdicts before reaching `OrderRouter`, which is `pub(crate)` and
//!   therefore unreachable except through the gateway.
//! - `oms::state_machine` tracks each broker order's lifecycle explicitly;
//!   `fill_detector` layers multi-signal fill verification on top of it.
//! - `prices` is the only place f64 <-> micros conversion happens.

mod engine;
mod errors;
mod fill_detector;
mod gateway;
mod id_map;
pub mod oms;
mod order_router;
mod prices;
mod reconcile_guard;
mod types;

pub use engine::targets_to_order_intents;
pub use errors::{is_already_filled_response, BrokerError};
pub use fill_detector::{evaluate_fill, FillPoller, FillVerdict, OrderSnapshot as FillOrderSnapshot};
pub use gateway::{
    intent_id_to_client_order_id, BracketGatewayError, BrokerGateway, GateRefusal, GateVerdicts,
    ReconcileGate,
};
pub use id_map::BrokerOrderMap;
pub use order_router::{
    BracketPartialReject, BracketSubmitRequest, BracketSubmitResponse, BrokerAdapter,
    BrokerCancelResponse, BrokerReplaceRequest, BrokerReplaceResponse, BrokerSubmitRequest,
    BrokerSubmitResponse,
};
pub use prices::{micros_to_price, price_to_micros, PricingError, MICROS_PER_UNIT};
pub use reconcile_guard::ReconcileFreshnessGuard;
pub use types::{
    BracketRole, ExecutionDecision, ExecutionIntent, OrderIntent, Side, StrategyOutput,
    TargetPosition,
};

use std::collections::BTreeMap;

/// Canonical type for current positions, keyed by symbol.
/// Signed quantity: +long, -short.
pub type PositionBook = BTreeMap<String, i64>;

/// Helper to build a PositionBook with minimal boilerplate in tests/callers.
pub fn position_book<I, S>(items: I) -> PositionBook
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut book = PositionBook::new();
    for (sym, qty) in items {
        book.insert(sym.into(), qty);
    }
    book
}
