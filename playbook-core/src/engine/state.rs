//! Runtime state — one mutable value per (playbook, symbol).
//!
//! The engine holds no global state: callers create this on first evaluation
//! for a symbol, pass it into every step, and persist it between calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::playbook::Playbook;
use crate::domain::position::OpenPosition;

use super::compile::CompiledPlaybook;

/// Mutable per-symbol execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Current phase name.
    pub phase: String,
    /// Bars elapsed in the current phase without a transition.
    pub bars_in_phase: u32,
    /// Current variable values.
    pub vars: BTreeMap<String, f64>,
    /// Names of `once` management rules already fired for the open position.
    pub fired_once: BTreeSet<String>,
    /// The open position, if any.
    pub position: Option<OpenPosition>,
}

impl RuntimeState {
    /// Fresh state at the playbook's initial phase with default variables.
    pub fn new(playbook: &Playbook) -> Self {
        Self {
            phase: playbook.initial_phase.clone(),
            bars_in_phase: 0,
            vars: playbook.default_vars(),
            fired_once: BTreeSet::new(),
            position: None,
        }
    }

    /// Fresh state from a compiled playbook.
    pub fn from_compiled(compiled: &CompiledPlaybook) -> Self {
        Self {
            phase: compiled.initial_phase.clone(),
            bars_in_phase: 0,
            vars: compiled.default_vars.clone(),
            fired_once: BTreeSet::new(),
            position: None,
        }
    }

    /// Reset after the position fully closed: clear the position and the
    /// fired-rule set, and follow the phase's `on_trade_closed` target if
    /// one is declared.
    pub fn on_position_closed(&mut self, compiled: &CompiledPlaybook) {
        self.position = None;
        self.fired_once.clear();
        if let Some(target) = compiled
            .phase(&self.phase)
            .and_then(|p| p.on_trade_closed.clone())
        {
            self.phase = target;
            self.bars_in_phase = 0;
        }
    }
}

/// Account-level figures the state machine checks risk limits against.
///
/// Supplied by the caller: the simulator derives them from its own
/// accounting, a live bridge from the broker account.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountView {
    pub open_positions: u32,
    pub trades_today: u32,
    /// Current drawdown from peak equity, in percent.
    pub drawdown_pct: f64,
}
