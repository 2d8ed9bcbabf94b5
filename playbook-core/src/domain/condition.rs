//! Condition trees — nested AND/OR groups over leaf comparisons.
//!
//! This is the document form: leaf sides are raw expression strings, compiled
//! to ASTs by `engine::compile` before any evaluation happens.

use serde::{Deserialize, Serialize};

/// Comparison operator for a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// Recursive rule tree: a leaf comparison or an AND/OR group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionTree {
    /// `left <op> right`, both sides expression strings.
    Leaf {
        left: String,
        op: CompareOp,
        right: String,
    },
    /// True when every child is true. Short-circuits left to right.
    All { children: Vec<ConditionTree> },
    /// True when any child is true. Short-circuits left to right.
    Any { children: Vec<ConditionTree> },
}

impl ConditionTree {
    /// Convenience constructor for a single comparison.
    pub fn leaf(left: &str, op: CompareOp, right: &str) -> Self {
        ConditionTree::Leaf {
            left: left.to_string(),
            op,
            right: right.to_string(),
        }
    }

    /// Visit every leaf expression string in document order.
    pub fn for_each_expr<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            ConditionTree::Leaf { left, right, .. } => {
                f(left);
                f(right);
            }
            ConditionTree::All { children } | ConditionTree::Any { children } => {
                for child in children {
                    child.for_each_expr(f);
                }
            }
        }
    }
}
