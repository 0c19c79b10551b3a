//! Reconcile tick: periodically compares the engine's own view of orders
//! and positions against the broker's, feeding the result into the
//! `ReconcileFreshnessGuard` that `BrokerGateway` consults before every
//! submit/cancel/replace/bracket call.
//!
//! Two layers are deliberately kept distinct:
//! - `mqk_reconcile::reconcile_tick` / `check_arm_gate` do the actual drift
//!   detection (unknown broker orders, position mismatch) and are stateless:
//!   same inputs always produce the same verdict.
//! - `ReconcileFreshnessGuard` is the gate `BrokerGateway` actually reads; it
//!   additionally fails closed if no reconcile has run recently enough,
//!   independent of whether the last result was clean.

use std::collections::BTreeMap;

use mqk_execution::ReconcileFreshnessGuard;
use mqk_protector::{ProtectedPosition, ProtectorConfig};
use mqk_reconcile::{reconcile_tick, BrokerSnapshot, DriftAction, LocalSnapshot, OrderSnapshot};

use crate::types::TradingState;

/// Signed remaining quantity for a protected position: positive for long,
/// negative for short, after whatever partials have been taken.
fn remaining_qty_signed(pos: &ProtectedPosition, cfg: &ProtectorConfig) -> i64 {
    let magnitude = pos.remaining_qty(cfg);
    match pos.side {
        mqk_execution::Side::Buy => magnitude,
        mqk_execution::Side::Sell => -magnitude,
    }
}

/// Clock closure `ReconcileFreshnessGuard` uses to judge its own freshness.
/// Kept as a plain fn pointer (not a closure capturing engine state) so the
/// guard stays `Send + Sync + 'static` without extra wrapping.
pub fn monotonic_ms_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub type EngineReconcileGuard = ReconcileFreshnessGuard<fn() -> i64>;

/// Construct the guard the gateway will consult, fail-closed until the
/// first reconcile tick runs.
pub fn new_guard(freshness_bound_ms: i64) -> EngineReconcileGuard {
    ReconcileFreshnessGuard::new(freshness_bound_ms, monotonic_ms_clock as fn() -> i64)
}

/// Build the engine's local view of the world from `TradingState`'s own
/// bookkeeping (orders it has submitted, positions it believes it holds).
pub fn build_local_snapshot(state: &TradingState, protector_cfg: &ProtectorConfig) -> LocalSnapshot {
    let positions: BTreeMap<String, i64> = state
        .positions
        .iter()
        .map(|(symbol, pos)| (symbol.clone(), remaining_qty_signed(pos, protector_cfg)))
        .collect();

    LocalSnapshot {
        orders: state.known_orders.clone(),
        positions,
    }
}

/// Build a `BrokerSnapshot` directly from already-normalized order/position
/// data (the paper broker's own `OrderSnapshot`/position map shape, or the
/// output of `mqk_reconcile::normalize`/`normalize_lenient` for a live
/// broker). `fetched_at_ms` is stamped by the caller at fetch time so
/// `SnapshotWatermark`/staleness checks downstream have something to
/// compare against.
pub fn broker_snapshot(
    orders: BTreeMap<String, OrderSnapshot>,
    positions: BTreeMap<String, i64>,
    fetched_at_ms: i64,
) -> BrokerSnapshot {
    BrokerSnapshot {
        orders,
        positions,
        fetched_at_ms,
    }
}

/// Run one reconcile tick: compare local vs. broker snapshots, record the
/// verdict into the freshness guard, and return the drift action so the
/// caller can decide whether to halt-and-disarm trading.
pub fn run_tick(
    local: &LocalSnapshot,
    broker: &BrokerSnapshot,
    guard: &mut EngineReconcileGuard,
) -> DriftAction {
    let action = reconcile_tick(local, broker);
    guard.record_reconcile_result(action.is_safe_to_continue());
    action
}

/// Convert a live Alpaca-shaped snapshot (all decimal fields carried as
/// strings on the wire, no `filled_qty` on the order itself) into the
/// `RawBrokerSnapshot` shape `mqk_reconcile::normalize`/`normalize_lenient`
/// expect. `filled_qty` is derived by summing the fills recorded against
/// each order, clamped to the order's own `qty` in case the fill feed is
/// momentarily ahead of the order feed.
pub fn alpaca_snapshot_to_raw(
    snapshot: &mqk_schemas::BrokerSnapshot,
) -> mqk_reconcile::RawBrokerSnapshot {
    let mut filled_by_order: BTreeMap<&str, i64> = BTreeMap::new();
    for fill in &snapshot.fills {
        let qty: i64 = fill.qty.parse().unwrap_or(0);
        *filled_by_order.entry(fill.broker_order_id.as_str()).or_insert(0) += qty;
    }

    let orders = snapshot
        .orders
        .iter()
        .map(|order| {
            let qty: i64 = order.qty.parse().unwrap_or(0);
            let filled_qty = filled_by_order
                .get(order.broker_order_id.as_str())
                .copied()
                .unwrap_or(0)
                .min(qty);
            mqk_reconcile::RawBrokerOrder {
                order_id: order.broker_order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side.clone(),
                qty,
                filled_qty,
                status: order.status.clone(),
            }
        })
        .collect();

    let positions = snapshot
        .positions
        .iter()
        .map(|position| mqk_reconcile::RawBrokerPosition {
            symbol: position.symbol.clone(),
            qty_signed: position.qty.parse().unwrap_or(0),
        })
        .collect();

    mqk_reconcile::RawBrokerSnapshot { orders, positions }
}
