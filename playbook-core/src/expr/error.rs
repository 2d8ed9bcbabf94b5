//! Expression errors: parse-time and evaluation-time.

use thiserror::Error;

/// Syntax error with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

/// Evaluation failure, scoped to a single expression on a single bar.
///
/// Recoverable by design: the state machine reports it as a diagnostic and
/// resumes on the next bar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown indicator '{id}'")]
    UnknownIndicator { id: String },
    #[error("indicator '{id}' has no field '{field}'")]
    UnknownField { id: String, field: String },
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },
    #[error("no previous bar snapshot for '{id}.{field}'")]
    NoPreviousBar { id: String, field: String },
    #[error("no open trade for 'trade.{field}' reference")]
    NoOpenTrade { field: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{func} argument out of domain: {arg}")]
    Domain { func: &'static str, arg: f64 },
}
