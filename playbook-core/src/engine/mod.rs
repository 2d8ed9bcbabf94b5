//! The playbook state machine: compilation, runtime state, and the per-bar
//! step shared by live execution and the backtest simulator.

pub mod compile;
pub mod intent;
pub mod machine;
pub mod state;

pub use compile::{
    compile, validate, CompiledPlaybook, ValidationError, ValidationIssue,
};
pub use intent::{Diagnostic, DiagnosticKind, Intent, StepOutput};
pub use machine::{step, BarView};
pub use state::{AccountView, RuntimeState};
