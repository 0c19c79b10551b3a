/// Regime label classifying the broad-market backdrop a signal is
/// generated against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegimeLabel {
    BroadBullish,
    BroadBearish,
    BroadNeutral,
    NarrowBullish,
    NarrowBearish,
    Choppy,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::BroadBullish => "broadBullish",
            RegimeLabel::BroadBearish => "broadBearish",
            RegimeLabel::BroadNeutral => "broadNeutral",
            RegimeLabel::NarrowBullish => "narrowBullish",
            RegimeLabel::NarrowBearish => "narrowBearish",
            RegimeLabel::Choppy => "choppy",
        }
    }
}

/// Output of the regime classifier: a position-size multiplier and whether
/// new entries are allowed at all.
#[derive(Clone, Debug, PartialEq)]
pub struct Regime {
    pub label: RegimeLabel,
    pub vix: f64,
    pub multiplier: f64,
    pub trading_allowed: bool,
}

/// Inputs to one regime evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct RegimeInput {
    /// Fraction (0.0-1.0) of watchlist symbols advancing on the day.
    pub breadth: f64,
    /// Index ETF trend direction, derived the same way Strategy derives
    /// its own trend filter (positive = up, negative = down, 0 = flat).
    pub index_trend: i8,
    pub vix: f64,
    /// ADX of the index ETF — low values confirm "no real trend" for the
    /// choppy classification.
    pub index_adx: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegimeConfig {
    pub recompute_interval_secs: i64,
    pub choppy_adx_max: f64,
}

impl RegimeConfig {
    pub fn sane_defaults() -> Self {
        Self {
            recompute_interval_secs: 300,
            choppy_adx_max: 20.0,
        }
    }
}

/// Cached classifier state. `last_computed_tick` gates recomputation to at
/// most once per `recompute_interval_secs`, mirroring the sticky-cache
/// pattern other engines in this workspace use for expensive recomputation.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct RegimeState {
    pub last_computed_tick: Option<i64>,
    pub cached: Option<Regime>,
}

impl RegimeState {
    pub fn new() -> Self {
        Self::default()
    }
}
