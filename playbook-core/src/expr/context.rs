//! Evaluation context — everything an expression can reference on one bar.

use std::collections::BTreeMap;

use crate::domain::playbook::RiskLimits;
use crate::domain::position::OpenPosition;

/// Output fields of one indicator on one bar (field name → value).
pub type FieldMap = BTreeMap<String, f64>;

/// All indicator values on one bar (indicator id → fields).
pub type Snapshot = BTreeMap<String, FieldMap>;

/// Borrowed view over the state an expression may read.
///
/// Built fresh per bar by the simulator (or the live bridge); evaluation
/// never mutates it.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Current-bar indicator snapshot.
    pub indicators: &'a Snapshot,
    /// Previous-bar snapshot; `None` on the first bar of a series.
    pub previous: Option<&'a Snapshot>,
    /// Current variable values.
    pub vars: &'a BTreeMap<String, f64>,
    /// Market mid-price (bar close in backtests).
    pub price: f64,
    /// Open position, if any.
    pub position: Option<&'a OpenPosition>,
    /// Risk configuration of the playbook under evaluation.
    pub risk: &'a RiskLimits,
}
