//! Tracks the three legs of a bracket order (entry, stop-loss, take-profit)
//! as one unit so `OrderExecutor`/`PositionProtector` can reason about
//! "is this position still protected" without re-deriving it from three
//! independent `OmsOrder`s scattered across maps.

use super::state_machine::OrderState;
use crate::types::BracketRole;
use std::collections::HashMap;

/// A bracket's three broker-assigned order ids plus each leg's last known
/// state. `OmsOrder` owns the authoritative per-leg state machine; this
/// struct is a thin index over it keyed by role.
#[derive(Debug, Clone)]
pub struct BracketGroup {
    pub group_id: String,
    pub symbol: String,
    legs: HashMap<BracketRole, (String, OrderState)>,
}

impl BracketGroup {
    pub fn new(group_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            symbol: symbol.into(),
            legs: HashMap::new(),
        }
    }

    pub fn set_leg(&mut self, role: BracketRole, order_id: impl Into<String>, state: OrderState) {
        self.legs.insert(role, (order_id.into(), state));
    }

    pub fn update_leg_state(&mut self, role: BracketRole, state: OrderState) {
        if let Some(entry) = self.legs.get_mut(&role) {
            entry.1 = state;
        }
    }

    pub fn leg_order_id(&self, role: BracketRole) -> Option<&str> {
        self.legs.get(&role).map(|(id, _)| id.as_str())
    }

    pub fn leg_state(&self, role: BracketRole) -> Option<&OrderState> {
        self.legs.get(&role).map(|(_, s)| s)
    }

    /// A bracket is "protected" exactly when its stop-loss leg exists and is
    /// still live (not terminal-cancelled/rejected). A filled stop means the
    /// position already exited; a missing or terminally-dead stop means the
    /// entry is currently unprotected and must be flattened or re-armed.
    pub fn is_protected(&self) -> bool {
        match self.leg_state(BracketRole::StopLoss) {
            Some(OrderState::Open) | Some(OrderState::PartiallyFilled) => true,
            Some(OrderState::CancelPending) | Some(OrderState::ReplacePending) => true,
            _ => false,
        }
    }

    /// True once the entry leg has reached a terminal non-fill state
    /// (rejected/cancelled) before any quantity filled — the whole bracket
    /// never became a live position and its sibling legs should be cancelled.
    pub fn entry_never_filled(&self) -> bool {
        matches!(
            self.leg_state(BracketRole::Entry),
            Some(OrderState::Rejected) | Some(OrderState::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_when_stop_is_open() {
        let mut g = BracketGroup::new("grp-1", "AAPL");
        g.set_leg(BracketRole::Entry, "e1", OrderState::Filled);
        g.set_leg(BracketRole::StopLoss, "s1", OrderState::Open);
        g.set_leg(BracketRole::TakeProfit, "t1", OrderState::Open);
        assert!(g.is_protected());
    }

    #[test]
    fn unprotected_when_stop_missing() {
        let mut g = BracketGroup::new("grp-1", "AAPL");
        g.set_leg(BracketRole::Entry, "e1", OrderState::Filled);
        assert!(!g.is_protected());
    }

    #[test]
    fn unprotected_when_stop_cancelled() {
        let mut g = BracketGroup::new("grp-1", "AAPL");
        g.set_leg(BracketRole::Entry, "e1", OrderState::Filled);
        g.set_leg(BracketRole::StopLoss, "s1", OrderState::Cancelled);
        assert!(!g.is_protected());
    }

    #[test]
    fn entry_never_filled_detected_on_rejection() {
        let mut g = BracketGroup::new("grp-1", "AAPL");
        g.set_leg(BracketRole::Entry, "e1", OrderState::Rejected);
        assert!(g.entry_never_filled());
    }
}
