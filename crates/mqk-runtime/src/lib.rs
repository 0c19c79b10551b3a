//! mqk-runtime
//!
//! Wires the strategy, risk, protector, reconcile, regime, sentiment, and
//! AI-validation crates into one running trading engine: seven cadenced
//! loops plus an outbox dispatcher and deadman watchdog, all sharing one
//! `TradingState` behind per-symbol locks.
//!
//! This crate owns the only production call site for
//! `mqk_db::outbox_claim_batch` (see the `RT-1` comment on its
//! `Cargo.toml`) and the only place `BrokerGateway::submit_bracket` is
//! invoked against a live or paper broker.

pub mod engine;
pub mod reconcile;
pub mod scheduler;
pub mod signals;
pub mod types;

pub use scheduler::TradingEngine;
pub use types::{BarFeed, EngineConfig, ExecutionFill, FillSource, IncomingBar, SymbolLocks, TradingState};
