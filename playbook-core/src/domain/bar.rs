//! Bar — the fundamental market data unit.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single symbol on a single timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high is the bar's ceiling, low its floor.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Mid-price used as the evaluation price on bar close.
    pub fn mid(&self) -> f64 {
        self.close
    }
}

/// Chart timeframe a bar belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    /// Bar periods per year, assuming a 24x5 market and 252 trading days.
    ///
    /// Used to annualize per-trade return statistics.
    pub fn periods_per_year(self) -> f64 {
        match self {
            Timeframe::M1 => 252.0 * 24.0 * 60.0,
            Timeframe::M5 => 252.0 * 24.0 * 12.0,
            Timeframe::M15 => 252.0 * 24.0 * 4.0,
            Timeframe::M30 => 252.0 * 24.0 * 2.0,
            Timeframe::H1 => 252.0 * 24.0,
            Timeframe::H4 => 252.0 * 6.0,
            Timeframe::D1 => 252.0,
            Timeframe::W1 => 52.0,
        }
    }

    /// Minutes in one bar of this timeframe.
    pub fn minutes(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1_440,
            Timeframe::W1 => 10_080,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
        };
        f.write_str(s)
    }
}
