//! Compiled condition trees and their boolean evaluation.

use crate::domain::condition::CompareOp;

use super::ast::Expr;
use super::context::EvalContext;
use super::error::EvalError;

/// Absolute tolerance for `==` / `!=` on floating comparisons.
///
/// Two expression results within this distance compare equal, so chained
/// arithmetic on either side cannot produce spurious inequality from
/// floating rounding.
pub const EQ_EPSILON: f64 = 1e-9;

/// Condition tree with both leaf sides parsed.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    Leaf {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    All(Vec<CompiledCondition>),
    Any(Vec<CompiledCondition>),
}

impl CompiledCondition {
    /// Evaluate to a boolean. Groups short-circuit; an `EvalError` anywhere
    /// propagates — it is never collapsed to `false`.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
        match self {
            CompiledCondition::Leaf { left, op, right } => {
                let a = left.eval(ctx)?;
                let b = right.eval(ctx)?;
                Ok(compare(*op, a, b))
            }
            CompiledCondition::All(children) => {
                for child in children {
                    if !child.eval(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompiledCondition::Any(children) => {
                for child in children {
                    if child.eval(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn compare(op: CompareOp, a: f64, b: f64) -> bool {
    match op {
        CompareOp::Lt => a < b,
        CompareOp::Gt => a > b,
        CompareOp::Le => a <= b,
        CompareOp::Ge => a >= b,
        CompareOp::Eq => (a - b).abs() <= EQ_EPSILON,
        CompareOp::Ne => (a - b).abs() > EQ_EPSILON,
    }
}
