//! Open position state and the management events applied to it.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// +1 for buy, -1 for sell. Used to fold direction into price arithmetic.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

/// A position-management event recorded while the position was open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementEvent {
    pub bar: usize,
    pub rule: String,
    pub kind: ManagementEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagementEventKind {
    SlModified { from: Option<f64>, to: f64 },
    TpModified { from: Option<f64>, to: f64 },
    SlTrailed { to: f64, anchor: f64 },
    PartialClosed { lot: f64, price: f64, pnl: f64 },
}

/// The single open position attached to a runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub direction: Direction,
    pub entry_bar: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub lot: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    /// Stop distance at entry, kept for risk/reward accounting after the
    /// stop has been trailed.
    pub initial_sl: Option<f64>,
    /// Phase that opened the position.
    pub entry_phase: String,
    /// Last price at which the trailing stop fired; gates re-arming by `step`.
    pub trail_anchor: Option<f64>,
    /// P&L already realized by partial closes.
    pub realized_partial: f64,
    /// Variable and indicator values captured at entry.
    pub entry_snapshot: BTreeMap<String, f64>,
    pub events: Vec<ManagementEvent>,
}

impl OpenPosition {
    /// Unrealized move in price increments at `price`, signed by direction.
    pub fn profit_points(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign()
    }
}
