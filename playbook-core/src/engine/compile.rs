//! Playbook compilation — structural validation plus expression parsing.
//!
//! Compilation is the validation gate: a malformed document is rejected with
//! every offending reference listed, before any run starts. The compiled form
//! carries parsed expressions so the per-bar hot path never touches strings.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::bar::Timeframe;
use crate::domain::condition::ConditionTree;
use crate::domain::playbook::{
    Action, ManagementAction, Phase, PhaseTimeout, Playbook, RiskLimits,
};
use crate::domain::position::Direction;
use crate::expr::ast::{Expr, Ref};
use crate::expr::condition::CompiledCondition;
use crate::expr::error::ParseError;
use crate::expr::parse::parse;

/// A single validation problem, tagged with where it was found.
#[derive(Debug, Clone, Error)]
pub enum ValidationIssue {
    #[error("{context}: unknown phase '{name}'")]
    UnknownPhase { context: String, name: String },
    #[error("duplicate phase '{name}'")]
    DuplicatePhase { name: String },
    #[error("duplicate indicator id '{id}'")]
    DuplicateIndicator { id: String },
    #[error("phase '{phase}': duplicate management rule '{name}'")]
    DuplicateRule { phase: String, name: String },
    #[error("{context}: unknown indicator '{id}'")]
    UnknownIndicator { context: String, id: String },
    #[error("{context}: unknown variable '{name}'")]
    UnknownVariable { context: String, name: String },
    #[error("{context}: {source}")]
    BadExpression {
        context: String,
        source: ParseError,
    },
    #[error("playbook has no phases")]
    NoPhases,
}

/// All validation problems found in one pass over the document.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub playbook: String,
    pub issues: Vec<ValidationIssue>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "playbook '{}' failed validation with {} issue(s)",
            self.playbook,
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Transition with parsed condition and actions, sorted into evaluation order.
#[derive(Debug, Clone)]
pub struct CompiledTransition {
    pub priority: i32,
    pub to: String,
    pub when: CompiledCondition,
    pub actions: Vec<CompiledAction>,
}

#[derive(Debug, Clone)]
pub enum CompiledAction {
    SetVar { name: String, value: Expr },
    OpenTrade {
        direction: Direction,
        lot: Expr,
        sl: Expr,
        tp: Expr,
    },
    CloseTrade,
    Log { message: String },
}

#[derive(Debug, Clone)]
pub enum CompiledRuleAction {
    ModifySl(Expr),
    ModifyTp(Expr),
    TrailSl { distance: Expr, step: Expr },
    PartialClose(Expr),
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub once: bool,
    pub when: CompiledCondition,
    pub action: CompiledRuleAction,
}

#[derive(Debug, Clone)]
pub struct CompiledPhase {
    pub name: String,
    pub evaluate_on: Vec<Timeframe>,
    /// Ascending priority; declaration order breaks ties.
    pub transitions: Vec<CompiledTransition>,
    pub timeout: Option<PhaseTimeout>,
    pub management: Vec<CompiledRule>,
    pub on_trade_closed: Option<String>,
}

/// Validated playbook with every expression parsed.
#[derive(Debug, Clone)]
pub struct CompiledPlaybook {
    pub id: String,
    pub initial_phase: String,
    pub risk: RiskLimits,
    pub default_vars: BTreeMap<String, f64>,
    phases: BTreeMap<String, CompiledPhase>,
}

impl CompiledPlaybook {
    pub fn phase(&self, name: &str) -> Option<&CompiledPhase> {
        self.phases.get(name)
    }

    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(|s| s.as_str())
    }
}

/// Validate a playbook without keeping the compiled form.
pub fn validate(playbook: &Playbook) -> Result<(), ValidationError> {
    compile(playbook).map(|_| ())
}

/// Compile a playbook, collecting every validation issue before failing.
pub fn compile(playbook: &Playbook) -> Result<CompiledPlaybook, ValidationError> {
    let mut compiler = Compiler {
        playbook,
        issues: Vec::new(),
    };
    let phases = compiler.compile_phases();
    if !compiler.issues.is_empty() {
        return Err(ValidationError {
            playbook: playbook.id.clone(),
            issues: compiler.issues,
        });
    }
    Ok(CompiledPlaybook {
        id: playbook.id.clone(),
        initial_phase: playbook.initial_phase.clone(),
        risk: playbook.risk.clone(),
        default_vars: playbook.default_vars(),
        phases,
    })
}

struct Compiler<'a> {
    playbook: &'a Playbook,
    issues: Vec<ValidationIssue>,
}

impl<'a> Compiler<'a> {
    fn compile_phases(&mut self) -> BTreeMap<String, CompiledPhase> {
        if self.playbook.phases.is_empty() {
            self.issues.push(ValidationIssue::NoPhases);
        }

        let mut seen_indicators = std::collections::BTreeSet::new();
        for spec in &self.playbook.indicators {
            if !seen_indicators.insert(spec.id.as_str()) {
                self.issues.push(ValidationIssue::DuplicateIndicator {
                    id: spec.id.clone(),
                });
            }
        }

        let mut phases = BTreeMap::new();
        for phase in &self.playbook.phases {
            if phases.contains_key(&phase.name) {
                self.issues.push(ValidationIssue::DuplicatePhase {
                    name: phase.name.clone(),
                });
                continue;
            }
            let compiled = self.compile_phase(phase);
            phases.insert(phase.name.clone(), compiled);
        }

        let initial = self.playbook.initial_phase.clone();
        self.check_phase_ref("initial_phase", &initial);

        phases
    }

    fn compile_phase(&mut self, phase: &Phase) -> CompiledPhase {
        let mut transitions = Vec::with_capacity(phase.transitions.len());
        for (i, tr) in phase.transitions.iter().enumerate() {
            let context = format!("phase '{}' transition #{i}", phase.name);
            self.check_phase_ref(&format!("{context} target"), &tr.to);
            let when = self.compile_condition(&tr.when, &context);
            let actions = tr
                .actions
                .iter()
                .enumerate()
                .map(|(j, a)| self.compile_action(a, &format!("{context} action #{j}")))
                .collect();
            transitions.push(CompiledTransition {
                priority: tr.priority,
                to: tr.to.clone(),
                when,
                actions,
            });
        }
        // Stable: equal priorities keep declaration order.
        transitions.sort_by_key(|t| t.priority);

        if let Some(timeout) = &phase.timeout {
            self.check_phase_ref(&format!("phase '{}' timeout target", phase.name), &timeout.to);
        }
        if let Some(target) = &phase.on_trade_closed {
            self.check_phase_ref(
                &format!("phase '{}' on_trade_closed target", phase.name),
                target,
            );
        }

        let mut seen_rules = std::collections::BTreeSet::new();
        let mut management = Vec::with_capacity(phase.management.len());
        for rule in &phase.management {
            if !seen_rules.insert(rule.name.as_str()) {
                self.issues.push(ValidationIssue::DuplicateRule {
                    phase: phase.name.clone(),
                    name: rule.name.clone(),
                });
            }
            let context = format!("phase '{}' rule '{}'", phase.name, rule.name);
            let when = self.compile_condition(&rule.when, &context);
            let action = match &rule.action {
                ManagementAction::ModifySl { to } => {
                    CompiledRuleAction::ModifySl(self.compile_expr(to, &context))
                }
                ManagementAction::ModifyTp { to } => {
                    CompiledRuleAction::ModifyTp(self.compile_expr(to, &context))
                }
                ManagementAction::TrailSl { distance, step } => CompiledRuleAction::TrailSl {
                    distance: self.compile_expr(distance, &context),
                    step: self.compile_expr(step, &context),
                },
                ManagementAction::PartialClose { percent } => {
                    CompiledRuleAction::PartialClose(self.compile_expr(percent, &context))
                }
            };
            management.push(CompiledRule {
                name: rule.name.clone(),
                once: rule.once,
                when,
                action,
            });
        }

        CompiledPhase {
            name: phase.name.clone(),
            evaluate_on: phase.evaluate_on.clone(),
            transitions,
            timeout: phase.timeout.clone(),
            management,
            on_trade_closed: phase.on_trade_closed.clone(),
        }
    }

    fn compile_action(&mut self, action: &Action, context: &str) -> CompiledAction {
        match action {
            Action::SetVar { name, value } => {
                if !self.playbook.variables.contains_key(name) {
                    self.issues.push(ValidationIssue::UnknownVariable {
                        context: context.to_string(),
                        name: name.clone(),
                    });
                }
                CompiledAction::SetVar {
                    name: name.clone(),
                    value: self.compile_expr(value, context),
                }
            }
            Action::OpenTrade {
                direction,
                lot,
                sl,
                tp,
            } => CompiledAction::OpenTrade {
                direction: *direction,
                lot: self.compile_expr(lot, context),
                sl: self.compile_expr(sl, context),
                tp: self.compile_expr(tp, context),
            },
            Action::CloseTrade => CompiledAction::CloseTrade,
            Action::Log { message } => CompiledAction::Log {
                message: message.clone(),
            },
        }
    }

    fn compile_condition(&mut self, tree: &ConditionTree, context: &str) -> CompiledCondition {
        match tree {
            ConditionTree::Leaf { left, op, right } => CompiledCondition::Leaf {
                left: self.compile_expr(left, context),
                op: *op,
                right: self.compile_expr(right, context),
            },
            ConditionTree::All { children } => CompiledCondition::All(
                children
                    .iter()
                    .map(|c| self.compile_condition(c, context))
                    .collect(),
            ),
            ConditionTree::Any { children } => CompiledCondition::Any(
                children
                    .iter()
                    .map(|c| self.compile_condition(c, context))
                    .collect(),
            ),
        }
    }

    /// Parse an expression and check its references against declarations.
    /// Parse failures still yield a placeholder so one bad expression does
    /// not hide reference problems elsewhere.
    fn compile_expr(&mut self, source: &str, context: &str) -> Expr {
        let expr = match parse(source) {
            Ok(expr) => expr,
            Err(source_err) => {
                self.issues.push(ValidationIssue::BadExpression {
                    context: context.to_string(),
                    source: source_err,
                });
                return Expr::Num(0.0);
            }
        };
        let mut issues = Vec::new();
        expr.for_each_ref(&mut |r| match r {
            Ref::Indicator { id, .. } => {
                if !self.playbook.indicators.iter().any(|s| &s.id == id) {
                    issues.push(ValidationIssue::UnknownIndicator {
                        context: context.to_string(),
                        id: id.clone(),
                    });
                }
            }
            Ref::Var(name) => {
                if !self.playbook.variables.contains_key(name) {
                    issues.push(ValidationIssue::UnknownVariable {
                        context: context.to_string(),
                        name: name.clone(),
                    });
                }
            }
            Ref::Price | Ref::Trade(_) | Ref::Risk(_) => {}
        });
        self.issues.extend(issues);
        expr
    }

    fn check_phase_ref(&mut self, context: &str, name: &str) {
        if !self.playbook.phases.iter().any(|p| p.name == name) {
            self.issues.push(ValidationIssue::UnknownPhase {
                context: context.to_string(),
                name: name.to_string(),
            });
        }
    }
}
