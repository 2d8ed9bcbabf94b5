//! Trade — a finalized round trip produced by the simulator.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::position::{Direction, ManagementEvent};

/// Why the position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Stop-loss level crossed.
    Sl,
    /// Take-profit level crossed.
    Tp,
    /// Bar series ended with the position still open.
    Timeout,
    /// A `close_trade` action, or a partial close reaching zero lot.
    Manual,
    /// A phase timeout forced the machine out of the holding phase.
    PhaseChange,
}

/// Win/loss classification of the realized P&L.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

/// A completed round-trip trade, immutable once finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ticket: u64,
    pub direction: Direction,

    pub open_bar: usize,
    pub open_time: NaiveDateTime,
    pub open_price: f64,

    pub close_bar: usize,
    pub close_time: NaiveDateTime,
    pub close_price: f64,

    /// Stop-loss / take-profit as they stood at close.
    pub sl: Option<f64>,
    pub tp: Option<f64>,

    pub lot: f64,
    /// Realized P&L in account currency, partial closes included.
    pub pnl: f64,
    /// Realized move in price increments, signed by direction.
    pub pnl_points: f64,
    /// Achieved reward-to-risk against the initial stop distance; 0 when no
    /// stop was set at entry.
    pub rr_achieved: f64,

    pub outcome: Outcome,
    pub exit_reason: ExitReason,
    pub entry_phase: String,
    /// Variable and indicator values at entry.
    pub entry_snapshot: BTreeMap<String, f64>,
    pub events: Vec<ManagementEvent>,
}

impl Trade {
    pub fn bars_held(&self) -> usize {
        self.close_bar.saturating_sub(self.open_bar)
    }

    pub fn is_winner(&self) -> bool {
        self.outcome == Outcome::Win
    }
}

/// Classify realized P&L with a small epsilon around zero.
pub fn classify_outcome(pnl: f64) -> Outcome {
    const EPS: f64 = 1e-9;
    if pnl > EPS {
        Outcome::Win
    } else if pnl < -EPS {
        Outcome::Loss
    } else {
        Outcome::Breakeven
    }
}
