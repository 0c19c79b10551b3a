use crate::types::{Regime, RegimeConfig, RegimeInput, RegimeLabel, RegimeState};

/// Refines the `choppy` multiplier by VIX band, per the secondary modifier:
/// VIX > 30 -> 0.25, 20-30 -> 0.5, otherwise -> 0.75.
fn choppy_vix_multiplier(vix: f64) -> f64 {
    if vix > 30.0 {
        0.25
    } else if vix >= 20.0 {
        0.5
    } else {
        0.75
    }
}

fn classify(cfg: &RegimeConfig, inp: &RegimeInput) -> Regime {
    let breadth = inp.breadth;
    let trend_up = inp.index_trend > 0;
    let trend_down = inp.index_trend < 0;

    if inp.index_adx < cfg.choppy_adx_max && inp.vix >= 20.0 && (breadth - 0.5).abs() < 0.1 {
        return Regime {
            label: RegimeLabel::Choppy,
            vix: inp.vix,
            multiplier: choppy_vix_multiplier(inp.vix),
            trading_allowed: false,
        };
    }

    if breadth > 0.6 && trend_up && inp.vix < 20.0 {
        return Regime {
            label: RegimeLabel::BroadBullish,
            vix: inp.vix,
            multiplier: 1.5,
            trading_allowed: true,
        };
    }

    if breadth < 0.4 && trend_down && inp.vix < 25.0 {
        return Regime {
            label: RegimeLabel::BroadBearish,
            vix: inp.vix,
            multiplier: 1.5,
            trading_allowed: true,
        };
    }

    if trend_up {
        return Regime {
            label: RegimeLabel::NarrowBullish,
            vix: inp.vix,
            multiplier: 0.7,
            trading_allowed: true,
        };
    }

    if trend_down {
        return Regime {
            label: RegimeLabel::NarrowBearish,
            vix: inp.vix,
            multiplier: 0.7,
            trading_allowed: true,
        };
    }

    Regime {
        label: RegimeLabel::BroadNeutral,
        vix: inp.vix,
        multiplier: 1.0,
        trading_allowed: true,
    }
}

/// Recomputes the regime if `recompute_interval_secs` has elapsed since the
/// last computation, otherwise serves the cached value. `now_tick` is a
/// caller-supplied monotonic second counter (not wall-clock), keeping this
/// function pure and deterministic for tests/replay.
pub fn evaluate(cfg: &RegimeConfig, st: &mut RegimeState, inp: &RegimeInput, now_tick: i64) -> Regime {
    let due = match st.last_computed_tick {
        None => true,
        Some(last) => now_tick - last >= cfg.recompute_interval_secs,
    };

    if due || st.cached.is_none() {
        let regime = classify(cfg, inp);
        st.last_computed_tick = Some(now_tick);
        st.cached = Some(regime.clone());
        regime
    } else {
        st.cached.clone().expect("cached is Some when not due")
    }
}
