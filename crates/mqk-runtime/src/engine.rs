//! Per-symbol strategy -> risk -> sizing -> protector pipeline.
//!
//! Each symbol in the watchlist owns one `SymbolEngine`. The pipeline
//! functions here are plain synchronous code; the scheduler is the only
//! place that touches `tokio::spawn`/IO, so every decision made here is
//! reproducible from its inputs alone.

use mqk_execution::{position_book, targets_to_order_intents, OrderIntent, Side as ExecSide};
use mqk_protector::ProtectorConfig;
use mqk_risk::sizing::{self, HighRiskInputs, SizingConfig, SizingRejection};
use mqk_risk::{
    KillSwitchEvent, PdtContext, RequestKind, RiskConfig, RiskDecision, RiskInput, RiskState,
};
use mqk_strategy::{
    BarStub, EmaCrossoverConfig, EmaCrossoverStrategy, ExternalSignals, RecentBarsWindow,
    ShadowMode, StrategyContext, StrategyHost,
};

use crate::types::IncomingBar;

/// One symbol's strategy config. `StrategyHost` only accepts a single
/// registration and the host API has no setter for a live strategy's
/// external signals, so each bar builds a fresh host around a fresh
/// `EmaCrossoverStrategy` carrying that bar's signals — cheap, and it keeps
/// the host's at-most-one-registration invariant intact across calls.
pub struct SymbolEngine {
    pub symbol: String,
    pub timeframe_secs: i64,
    pub cfg: EmaCrossoverConfig,
}

impl SymbolEngine {
    pub fn new(symbol: impl Into<String>, timeframe_secs: i64, cfg: EmaCrossoverConfig) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe_secs,
            cfg,
        }
    }

    pub fn on_bar(
        &self,
        now_tick: u64,
        recent_bars: &[IncomingBar],
        ext: ExternalSignals,
    ) -> mqk_execution::StrategyOutput {
        let bar_stubs: Vec<BarStub> = recent_bars
            .iter()
            .map(|b| BarStub::new(b.end_ts, b.is_complete, b.close_micros, b.volume))
            .collect();
        let window = RecentBarsWindow::new(bar_stubs.len().max(1), bar_stubs);
        let ctx = StrategyContext::new(self.timeframe_secs, now_tick, window);

        let mut host = StrategyHost::new(ShadowMode::Off);
        let mut strategy =
            EmaCrossoverStrategy::new(self.symbol.clone(), self.timeframe_secs, self.cfg.clone());
        strategy.set_external_signals(ext);
        host.register(Box::new(strategy))
            .expect("fresh StrategyHost cannot already have a registered strategy");

        let result = host
            .on_bar(&ctx)
            .expect("timeframe is fixed per SymbolEngine and always matches its StrategyContext");
        result.intents.output
    }
}

/// Translate the watchlist's current position book against one symbol's
/// strategy target into the signed order intent the rest of the pipeline
/// (sizing, risk, protector) reasons about. Returns `None` when the target
/// equals the current position (nothing to do this bar).
pub fn intent_for_symbol(
    current_qty: i64,
    output: &mqk_execution::StrategyOutput,
    symbol: &str,
) -> Option<OrderIntent> {
    let book = position_book([(symbol.to_string(), current_qty)]);
    let decision = targets_to_order_intents(&book, output);
    decision.intents.into_iter().find(|i| i.symbol == symbol)
}

/// Whether an intent reduces or closes an existing position rather than
/// opening/adding to one — mirrors the orchestrator's own
/// `is_intent_risk_reducing` check so the risk engine sees the same
/// classification regardless of which runner is driving it.
pub fn is_risk_reducing(current_qty: i64, intent: &OrderIntent) -> bool {
    if current_qty == 0 {
        return false;
    }
    match intent.side {
        ExecSide::Buy => current_qty < 0,
        ExecSide::Sell => current_qty > 0,
    }
}

/// Stop-loss distance for a fresh entry: `atr_mult` ATRs away from the entry
/// price, in the direction that protects the position. Falls back to a
/// fixed 1% of entry price when ATR hasn't warmed up yet (early in a
/// symbol's history) so sizing never divides by a zero stop distance.
pub fn initial_stop_price_micros(
    protector_cfg: &ProtectorConfig,
    side: ExecSide,
    entry_price_micros: i64,
    atr_micros: Option<i64>,
) -> i64 {
    let distance = match atr_micros {
        Some(atr) if atr > 0 => ((atr as f64) * protector_cfg.atr_mult) as i64,
        _ => (entry_price_micros as f64 * 0.01) as i64,
    }
    .max(1);

    match side {
        ExecSide::Buy => entry_price_micros - distance,
        ExecSide::Sell => entry_price_micros + distance,
    }
}

/// Runs position-count/frequency/cooldown checks, then sizes the order in
/// real shares against the account's risk budget. Returns `Err` with the
/// specific rejection reason so the caller can log/emit it rather than
/// silently dropping the intent.
#[allow(clippy::too_many_arguments)]
pub fn size_entry(
    sizing_cfg: &SizingConfig,
    open_position_count: u32,
    counters: &sizing::DailyCounters,
    cooldowns: &sizing::CooldownMap,
    symbol: &str,
    now_tick: i64,
    equity_micros: i64,
    regime_multiplier: f64,
    time_of_day_multiplier: f64,
    confidence_multiplier: f64,
    entry_price_micros: i64,
    stop_price_micros: i64,
    buying_power_micros: i64,
) -> Result<i64, SizingRejection> {
    if let Some(rejection) =
        sizing::check_position_and_frequency(sizing_cfg, open_position_count, counters, cooldowns, symbol, now_tick)
    {
        return Err(rejection);
    }
    sizing::compute_qty(
        sizing_cfg,
        equity_micros,
        regime_multiplier,
        time_of_day_multiplier,
        confidence_multiplier,
        entry_price_micros,
        stop_price_micros,
        buying_power_micros,
    )
}

/// Runs the risk engine for one proposed entry, folding in whatever kill
/// switch event the caller has detected this tick (missing protective stop,
/// stale data, reject storm, desync, or an operator-triggered manual halt).
pub fn evaluate_risk(
    risk_cfg: &RiskConfig,
    risk_state: &mut RiskState,
    day_id: u32,
    equity_micros: i64,
    reject_window_id: u32,
    is_risk_reducing: bool,
    pdt: PdtContext,
    kill_switch: Option<KillSwitchEvent>,
) -> RiskDecision {
    let input = RiskInput {
        day_id,
        equity_micros,
        reject_window_id,
        request: RequestKind::NewOrder,
        is_risk_reducing,
        pdt,
        kill_switch,
    };
    mqk_risk::evaluate(risk_cfg, risk_state, &input)
}

/// Whether this entry is risky enough to require AI sign-off before it
/// reaches the outbox, per the spec's high-risk criteria.
pub fn requires_ai_validation(inputs: &HighRiskInputs) -> bool {
    sizing::is_high_risk(inputs)
}
