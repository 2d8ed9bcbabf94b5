//! Trade intents and run diagnostics emitted by the state machine.
//!
//! The machine never fills anything itself: it emits intents with fully
//! computed price fields, and the caller fulfils them — the simulator
//! internally, a live bridge through the trading terminal.

use serde::{Deserialize, Serialize};

use crate::domain::position::Direction;
use crate::domain::trade::ExitReason;

/// A trade request produced on one bar close.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Open {
        direction: Direction,
        lot: f64,
        sl: f64,
        tp: f64,
    },
    Close {
        reason: ExitReason,
    },
    ModifySl {
        rule: String,
        to: f64,
    },
    ModifyTp {
        rule: String,
        to: f64,
    },
    TrailSl {
        rule: String,
        to: f64,
        /// Price at which the trail fired; stored for step re-arming.
        anchor: f64,
    },
    PartialClose {
        rule: String,
        percent: f64,
    },
}

/// Severity/kind of a non-fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A recovered expression failure; the phase skipped this bar.
    EvalError,
    /// An `open_trade` blocked by a risk limit.
    RiskLimitSkip,
    /// A playbook `log` action or informational note.
    Log,
}

/// Non-fatal event recorded during a run so users can audit why, e.g.,
/// an expected trade never opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub bar: usize,
    pub phase: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(bar: usize, phase: &str, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            bar,
            phase: phase.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Everything one state-machine step produced.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub intents: Vec<Intent>,
    pub diagnostics: Vec<Diagnostic>,
}
