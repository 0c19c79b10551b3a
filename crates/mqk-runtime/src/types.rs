//! Shared state owned by the scheduler and read/written by each loop.
//!
//! Mirrors `mqk-testkit::orchestrator::Orchestrator`'s single-struct-of-
//! engines composition, but split into a config half (immutable for the
//! run's lifetime) and a state half (`TradingState`, guarded by a lock and
//! additionally serialized per symbol so two loops never race the same
//! position).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use mqk_protector::{ProtectedPosition, ProtectorConfig};
use mqk_reconcile::OrderSnapshot;
use mqk_regime::{RegimeConfig, RegimeState};
use mqk_risk::pdt::{PdtPolicy, PdtState};
use mqk_risk::sizing::{CooldownMap, DailyCounters, SizingConfig};
use mqk_risk::{RiskConfig, RiskState};
use mqk_strategy::EmaCrossoverConfig;

/// Immutable configuration for one trading-engine run. Config changes
/// require a restart; there is no hot-reload path (per the no-hot-loaded-
/// config redesign).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub run_id: Uuid,
    pub watchlist: Vec<String>,
    pub timeframe_secs: i64,
    pub bar_history_len: usize,

    pub market_data_interval_secs: u64,
    pub strategy_interval_secs: u64,
    pub position_monitor_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub scanner_interval_secs: u64,
    pub profit_protection_interval_secs: u64,

    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub eod_cutoff: NaiveTime,

    pub reconcile_freshness_bound_ms: i64,
    pub deadman_ttl_secs: i64,
    pub dispatcher_batch_size: i64,
    pub dispatcher_id: String,

    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub pdt: PdtPolicy,
    pub regime: RegimeConfig,
    pub strategy: EmaCrossoverConfig,
    pub protector: ProtectorConfig,

    pub ai_validation_timeout: std::time::Duration,
    pub long_only: bool,
}

impl EngineConfig {
    /// Reasonable defaults for a single-symbol paper run; every field is
    /// still public and meant to be overridden by the caller (CLI/daemon
    /// config loader) before the engine starts.
    pub fn paper_defaults(run_id: Uuid, watchlist: Vec<String>) -> Self {
        Self {
            run_id,
            watchlist,
            timeframe_secs: 60,
            bar_history_len: 250,
            market_data_interval_secs: 60,
            strategy_interval_secs: 60,
            position_monitor_interval_secs: 10,
            metrics_interval_secs: 300,
            scanner_interval_secs: 3600,
            profit_protection_interval_secs: 1,
            market_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            eod_cutoff: NaiveTime::from_hms_opt(15, 58, 0).unwrap(),
            reconcile_freshness_bound_ms: 30_000,
            deadman_ttl_secs: 120,
            dispatcher_batch_size: 20,
            dispatcher_id: "mqk-runtime".to_string(),
            risk: RiskConfig::sane_defaults(),
            sizing: SizingConfig::sane_defaults(),
            pdt: PdtPolicy::disabled(),
            regime: RegimeConfig::sane_defaults(),
            strategy: EmaCrossoverConfig::sane_defaults(),
            protector: ProtectorConfig::sane_defaults(),
            ai_validation_timeout: std::time::Duration::from_millis(800),
            long_only: false,
        }
    }
}

/// Per-symbol order bookkeeping the engine keeps locally so it can build a
/// `mqk_reconcile::LocalSnapshot` without re-querying the broker.
pub type KnownOrders = BTreeMap<String, OrderSnapshot>;

/// Everything the seven loops read and mutate. Held behind a single
/// `tokio::sync::RwLock` for cheap concurrent reads (most loops only read
/// `positions`/`cooldowns` to decide whether to act); actual mutation of a
/// given symbol's position/cooldown/counters happens only while that
/// symbol's per-symbol lock (see `SymbolLocks`) is held, so the RwLock
/// write path is only ever touched briefly to splice results back in.
#[derive(Debug)]
pub struct TradingState {
    pub day_id: u32,
    pub positions: BTreeMap<String, ProtectedPosition>,
    pub cooldowns: CooldownMap,
    pub daily_counters: DailyCounters,
    pub known_orders: KnownOrders,
    pub broker_positions: BTreeMap<String, i64>,
    pub risk_state: RiskState,
    pub regime_state: RegimeState,
    pub pdt_state: PdtState,
    pub reject_window_id: u32,
}

impl TradingState {
    pub fn new(day_id: u32, starting_equity_micros: i64) -> Self {
        Self {
            day_id,
            positions: BTreeMap::new(),
            cooldowns: CooldownMap::new(),
            daily_counters: DailyCounters::default(),
            known_orders: KnownOrders::new(),
            broker_positions: BTreeMap::new(),
            risk_state: RiskState::new(day_id, starting_equity_micros, 0),
            regime_state: RegimeState::new(),
            pdt_state: PdtState::new(),
            reject_window_id: 0,
        }
    }
}

/// Per-symbol mutual exclusion so the strategy loop, position-monitor loop
/// and profit-protection loop never run the signal -> risk -> executor ->
/// protector sequence for the same symbol concurrently, per the ordering
/// guarantee in the concurrency model. Cross-symbol work stays parallel:
/// each symbol gets its own `tokio::sync::Mutex`, created lazily.
#[derive(Clone, Default)]
pub struct SymbolLocks {
    inner: Arc<std::sync::Mutex<BTreeMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().expect("symbol lock registry poisoned");
        map.entry(symbol.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// A bar the engine has ingested for a symbol, already normalized to
/// integer micros. Built by whatever `BarFeed` implementation the caller
/// wires in (live provider fetch + normalize, or a deterministic replay
/// feed in tests) — the engine itself never parses decimal strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingBar {
    pub symbol: String,
    pub end_ts: i64,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub is_complete: bool,
    pub day_id: u32,
}

/// Supplies fresh bars for the watchlist. Implementations own whatever
/// provider/rate-limit/API-key-rotation logic is needed (e.g. wrapping
/// `mqk_md::TwelveDataHistoricalProvider` + `mqk_md::ApiKeyRing`); the
/// market-data loop only needs the latest closed bar per symbol.
#[async_trait::async_trait]
pub trait BarFeed: Send + Sync {
    async fn latest_bar(&self, symbol: &str) -> anyhow::Result<Option<IncomingBar>>;
}

/// A fill the engine must apply to the portfolio/protector/event bus,
/// reported by whichever `BrokerAdapter` produced it. Generalizes
/// `LockedPaperBroker::SimulatedFill` and `AlpacaBroker::fetch_fills` into
/// one shape the position-monitor loop consumes regardless of broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionFill {
    pub order_id: String,
    pub symbol: String,
    pub quantity: i32,
    pub price_micros: i64,
}

/// Drains broker-reported fills since the last poll. `LockedPaperBroker`
/// satisfies this directly via `drain_fills`; a live-broker caller adapts
/// `AlpacaBroker::fetch_fills` by tracking which fills it has already
/// reported (the adapter itself returns the full fill history each call).
#[async_trait::async_trait]
pub trait FillSource: Send + Sync {
    async fn drain_fills(&self) -> anyhow::Result<Vec<ExecutionFill>>;
}
