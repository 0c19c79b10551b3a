//! mqk-protector
//!
//! R-multiple position-protection state machine: breakeven -> partial ->
//! partial -> trailing stop, plus the stuck-stop self-heal scan and the
//! non-bracket engine-close pricing rule. Pure and deterministic, in the
//! same spirit as `mqk_execution::oms::state_machine` — callers own all
//! broker I/O; this crate only decides what should happen next.

mod engine;
mod types;

pub use engine::{
    apply_exit, engine_close_limit_price_micros, evaluate_tick, needs_stop_resubmission,
    resubmission_stop, ProtectorAction, StopLegStatus,
};
pub use types::{ExitReason, ProtectedPosition, ProtectorConfig, ProtectorState};
