use mqk_execution::Side;

/// State machine position for an R-multiple-based profit ladder. Long side
/// moves the stop up and sells into strength; short is the mirror image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtectorState {
    Initial,
    BreakevenProtected,
    FirstPartial,
    SecondPartial,
    Trailing,
    Exited,
}

/// Why a position exited, for audit/event purposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    StopHit,
    TargetHit,
    EngineClose,
    EmergencyStop,
}

#[derive(Clone, Debug)]
pub struct ProtectorConfig {
    /// Percent of the original qty sold at the first and second partial
    /// exits; the remainder rides the trailing stop. Defaults to [25, 25]
    /// (50% remains after both partials).
    pub partial_pcts: [u8; 2],
    pub trail_activate_r: f64,
    pub trail_distance_min_r: f64,
    pub atr_mult: f64,
}

impl ProtectorConfig {
    pub fn sane_defaults() -> Self {
        Self {
            partial_pcts: [25, 25],
            trail_activate_r: 2.0,
            trail_distance_min_r: 0.5,
            atr_mult: 1.5,
        }
    }
}

/// A single position under protection.
#[derive(Clone, Debug)]
pub struct ProtectedPosition {
    pub symbol: String,
    pub side: Side,
    pub original_qty: i64,
    pub entry_price_micros: i64,
    pub initial_stop_micros: i64,
    pub state: ProtectorState,
    pub partials_taken: u8,
    pub current_stop_micros: i64,
    /// Highest price seen (long) / lowest price seen (short), used to anchor
    /// the trailing stop.
    pub high_water_mark_micros: i64,
    pub trailing_active: bool,
}

impl ProtectedPosition {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        qty: i64,
        entry_price_micros: i64,
        initial_stop_micros: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            original_qty: qty,
            entry_price_micros,
            initial_stop_micros,
            state: ProtectorState::Initial,
            partials_taken: 0,
            current_stop_micros: initial_stop_micros,
            high_water_mark_micros: entry_price_micros,
            trailing_active: false,
        }
    }

    /// One R in micros: the initial risk distance between entry and stop.
    pub fn r_micros(&self) -> i64 {
        (self.entry_price_micros - self.initial_stop_micros).abs()
    }

    /// Remaining qty after whatever partials have been taken so far, given
    /// the configured partial percentages.
    pub fn remaining_qty(&self, cfg: &ProtectorConfig) -> i64 {
        let sold_pct: u32 = cfg
            .partial_pcts
            .iter()
            .take(self.partials_taken as usize)
            .map(|p| *p as u32)
            .sum();
        let sold = (self.original_qty as i128 * sold_pct as i128 / 100) as i64;
        self.original_qty - sold
    }
}
