//! mqk-regime
//!
//! Pure, deterministic breadth/trend/volatility classifier. No IO, no
//! clock: callers supply `now_tick` (a monotonic second counter) so the
//! at-most-once-per-5-minutes recompute cache stays replayable.

mod engine;
mod types;

pub use engine::evaluate;
pub use types::{Regime, RegimeConfig, RegimeInput, RegimeLabel, RegimeState};
