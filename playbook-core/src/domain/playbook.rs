//! Playbook document — the declarative multi-phase strategy definition.
//!
//! A playbook is immutable per run: phases, declared indicators, typed
//! variables, and risk limits. Structural and reference validation lives in
//! `engine::compile`, which rejects a malformed document with every offending
//! reference listed, before any run starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::bar::Timeframe;
use super::condition::ConditionTree;
use super::position::Direction;

/// Declared indicator: the engine consumes its per-bar values from the feed,
/// it never computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Reference id used in expressions (`ind.<id>.<field>`).
    pub id: String,
    /// Indicator kind as named by the external indicator subsystem (e.g. "rsi").
    pub kind: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

/// Declared variable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Number,
    /// Stored as 0.0 / 1.0; expressions treat non-zero as true.
    Bool,
}

/// Declared variable: type and initial value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarSpec {
    pub kind: VarKind,
    pub default: f64,
}

/// Hard risk limits checked before every `open_trade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_lot: f64,
    pub max_daily_trades: u32,
    /// Percent of peak equity; new entries are blocked at or beyond it.
    pub max_drawdown_pct: f64,
    pub max_concurrent_positions: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_lot: 1.0,
            max_daily_trades: 10,
            max_drawdown_pct: 25.0,
            max_concurrent_positions: 1,
        }
    }
}

/// Action executed when a transition is taken. All value fields are
/// expression strings evaluated against the bar context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetVar { name: String, value: String },
    OpenTrade {
        direction: Direction,
        lot: String,
        sl: String,
        tp: String,
    },
    CloseTrade,
    /// Observability side channel; never affects state.
    Log { message: String },
}

/// Position-management action applied while a trade is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagementAction {
    ModifySl { to: String },
    ModifyTp { to: String },
    /// Trails the stop `distance` behind price, re-armed each time price
    /// advances `step` beyond the previous trail anchor. Never loosens.
    TrailSl { distance: String, step: String },
    /// Closes `percent` of the remaining lot.
    PartialClose { percent: String },
}

/// Position-management rule: a guarded action, optionally once per position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementRule {
    pub name: String,
    #[serde(default)]
    pub once: bool,
    pub when: ConditionTree,
    pub action: ManagementAction,
}

/// Conditioned, prioritized move between phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Lower values are evaluated first; the first satisfied transition wins.
    pub priority: i32,
    pub to: String,
    pub when: ConditionTree,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Forced exit from a phase after a number of bars without a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTimeout {
    pub bars: u32,
    pub timeframe: Timeframe,
    pub to: String,
}

/// One state of the playbook's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub evaluate_on: Vec<Timeframe>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub timeout: Option<PhaseTimeout>,
    #[serde(default)]
    pub management: Vec<ManagementRule>,
    #[serde(default)]
    pub on_trade_closed: Option<String>,
}

/// Declarative multi-phase trading strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub initial_phase: String,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,
    #[serde(default)]
    pub variables: BTreeMap<String, VarSpec>,
    #[serde(default)]
    pub risk: RiskLimits,
}

impl Playbook {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Default values for all declared variables.
    pub fn default_vars(&self) -> BTreeMap<String, f64> {
        self.variables
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::CompareOp;

    fn sample_playbook() -> Playbook {
        Playbook {
            id: "pb-1".into(),
            name: "rsi dip".into(),
            initial_phase: "idle".into(),
            phases: vec![Phase {
                name: "idle".into(),
                evaluate_on: vec![Timeframe::H1],
                transitions: vec![Transition {
                    priority: 0,
                    to: "idle".into(),
                    when: ConditionTree::leaf("ind.rsi.value", CompareOp::Lt, "30"),
                    actions: vec![Action::Log {
                        message: "dip".into(),
                    }],
                }],
                timeout: None,
                management: vec![],
                on_trade_closed: None,
            }],
            indicators: vec![IndicatorSpec {
                id: "rsi".into(),
                kind: "rsi".into(),
                timeframe: Timeframe::H1,
                params: BTreeMap::from([("period".to_string(), 14.0)]),
            }],
            variables: BTreeMap::from([(
                "floor".to_string(),
                VarSpec {
                    kind: VarKind::Number,
                    default: 1.5,
                },
            )]),
            risk: RiskLimits::default(),
        }
    }

    #[test]
    fn playbook_serde_roundtrip() {
        let pb = sample_playbook();
        let json = serde_json::to_string_pretty(&pb).unwrap();
        let deser: Playbook = serde_json::from_str(&json).unwrap();
        assert_eq!(deser.id, pb.id);
        assert_eq!(deser.phases.len(), 1);
        assert_eq!(deser.variables["floor"].default, 1.5);
    }

    #[test]
    fn default_vars_from_specs() {
        let vars = sample_playbook().default_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["floor"], 1.5);
    }

    #[test]
    fn phase_lookup() {
        let pb = sample_playbook();
        assert!(pb.phase("idle").is_some());
        assert!(pb.phase("missing").is_none());
    }
}
