use crate::types::{ExitReason, ProtectedPosition, ProtectorConfig, ProtectorState};
use mqk_execution::Side;

/// An action the caller (`OrderExecutor`) must carry out against the
/// broker. The protector never calls the broker itself — it is pure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtectorAction {
    MoveStopToBreakeven { new_stop_micros: i64 },
    SellPartial { pct: u8 },
    ActivateTrailing { new_stop_micros: i64 },
    UpdateTrailingStop { new_stop_micros: i64 },
    Exit { reason: ExitReasonPublic },
    ResubmitStop { new_stop_micros: i64 },
}

/// Re-exported so callers matching on `ProtectorAction::Exit` don't need a
/// second import path for the reason type.
pub type ExitReasonPublic = ExitReason;

fn move_r(pos: &ProtectedPosition, current_price_micros: i64) -> f64 {
    let r = pos.r_micros();
    if r == 0 {
        return 0.0;
    }
    let diff = match pos.side {
        Side::Buy => current_price_micros - pos.entry_price_micros,
        Side::Sell => pos.entry_price_micros - current_price_micros,
    };
    diff as f64 / r as f64
}

fn is_favorable_move(pos: &ProtectedPosition, candidate_stop: i64) -> bool {
    match pos.side {
        Side::Buy => candidate_stop >= pos.current_stop_micros,
        Side::Sell => candidate_stop <= pos.current_stop_micros,
    }
}

fn update_high_water_mark(pos: &mut ProtectedPosition, current_price_micros: i64) {
    match pos.side {
        Side::Buy => {
            if current_price_micros > pos.high_water_mark_micros {
                pos.high_water_mark_micros = current_price_micros;
            }
        }
        Side::Sell => {
            if current_price_micros < pos.high_water_mark_micros {
                pos.high_water_mark_micros = current_price_micros;
            }
        }
    }
}

/// Evaluate one price tick against the ladder and mutate `pos` to reflect
/// any state transition. Returns the ordered list of broker actions the
/// caller must perform (empty if nothing changed). `atr_micros` feeds the
/// trailing-stop distance once trailing is active.
pub fn evaluate_tick(
    cfg: &ProtectorConfig,
    pos: &mut ProtectedPosition,
    current_price_micros: i64,
    atr_micros: i64,
) -> Vec<ProtectorAction> {
    if pos.state == ProtectorState::Exited {
        return vec![];
    }

    update_high_water_mark(pos, current_price_micros);
    let r = move_r(pos, current_price_micros);
    let mut actions = Vec::new();

    match pos.state {
        ProtectorState::Initial => {
            if r >= 1.0 {
                let new_stop = pos.entry_price_micros;
                if is_favorable_move(pos, new_stop) {
                    pos.current_stop_micros = new_stop;
                    pos.state = ProtectorState::BreakevenProtected;
                    actions.push(ProtectorAction::MoveStopToBreakeven {
                        new_stop_micros: new_stop,
                    });
                }
            }
        }
        ProtectorState::BreakevenProtected => {
            if r >= 2.0 {
                pos.partials_taken = 1;
                pos.state = ProtectorState::FirstPartial;
                actions.push(ProtectorAction::SellPartial {
                    pct: cfg.partial_pcts[0],
                });
            }
        }
        ProtectorState::FirstPartial => {
            if r >= 3.0 {
                pos.partials_taken = 2;
                pos.state = ProtectorState::SecondPartial;
                actions.push(ProtectorAction::SellPartial {
                    pct: cfg.partial_pcts[1],
                });
            }
        }
        ProtectorState::SecondPartial => {
            if r >= cfg.trail_activate_r {
                let r_micros = pos.r_micros() as f64;
                let trail_distance =
                    (cfg.trail_distance_min_r * r_micros).max(cfg.atr_mult * atr_micros as f64);
                let new_stop = match pos.side {
                    Side::Buy => pos.high_water_mark_micros - trail_distance as i64,
                    Side::Sell => pos.high_water_mark_micros + trail_distance as i64,
                };
                if is_favorable_move(pos, new_stop) {
                    pos.current_stop_micros = new_stop;
                }
                pos.trailing_active = true;
                pos.state = ProtectorState::Trailing;
                actions.push(ProtectorAction::ActivateTrailing {
                    new_stop_micros: pos.current_stop_micros,
                });
            }
        }
        ProtectorState::Trailing => {
            let r_micros = pos.r_micros() as f64;
            let trail_distance =
                (cfg.trail_distance_min_r * r_micros).max(cfg.atr_mult * atr_micros as f64);
            let candidate_stop = match pos.side {
                Side::Buy => pos.high_water_mark_micros - trail_distance as i64,
                Side::Sell => pos.high_water_mark_micros + trail_distance as i64,
            };
            if is_favorable_move(pos, candidate_stop) && candidate_stop != pos.current_stop_micros
            {
                pos.current_stop_micros = candidate_stop;
                actions.push(ProtectorAction::UpdateTrailingStop {
                    new_stop_micros: candidate_stop,
                });
            }
        }
        ProtectorState::Exited => {}
    }

    actions
}

/// Terminal transition: the position exited via stop/target hit or an
/// engine-initiated close. Idempotent — calling again on an already-exited
/// position is a no-op.
pub fn apply_exit(pos: &mut ProtectedPosition, reason: ExitReason) -> Vec<ProtectorAction> {
    if pos.state == ProtectorState::Exited {
        return vec![];
    }
    pos.state = ProtectorState::Exited;
    vec![ProtectorAction::Exit { reason }]
}

/// Status of a position's stop-loss leg as observed from the broker, used
/// by the 5s stuck-stop self-heal scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopLegStatus {
    Healthy,
    Missing,
    Held,
}

pub fn needs_stop_resubmission(status: StopLegStatus) -> bool {
    matches!(status, StopLegStatus::Missing | StopLegStatus::Held)
}

/// Re-derives a fresh stop price for resubmission, checking the move isn't
/// adverse relative to the position's current stop before resubmitting —
/// the self-heal path must not loosen protection just because the old
/// stop order vanished.
pub fn resubmission_stop(pos: &ProtectedPosition) -> ProtectorAction {
    ProtectorAction::ResubmitStop {
        new_stop_micros: pos.current_stop_micros,
    }
}

/// Computes the limit price for a non-bracket engine-initiated close:
/// +/-0.1% around the realtime trade price. Long exits sell, so the limit
/// is placed slightly below the trade price to ensure a fill; short exits
/// buy, so it's placed slightly above.
pub fn engine_close_limit_price_micros(side: Side, current_price_micros: i64) -> i64 {
    let adj = (current_price_micros as i128 * 1_000 / 1_000_000) as i64; // 0.1% = 1000/1_000_000
    match side {
        Side::Buy => current_price_micros - adj,
        Side::Sell => current_price_micros + adj,
    }
}
