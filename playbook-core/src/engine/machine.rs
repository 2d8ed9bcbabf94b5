//! Phase state machine — one step per bar close.
//!
//! Shared verbatim by live execution and the backtest simulator: the caller
//! supplies the bar view and account figures, the machine mutates the
//! runtime state and emits intents. A recovered `EvalError` aborts the
//! phase for the current bar only, with no state mutation.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::domain::bar::Timeframe;
use crate::domain::position::Direction;
use crate::domain::trade::ExitReason;
use crate::expr::context::{EvalContext, Snapshot};

use super::compile::{CompiledAction, CompiledPlaybook, CompiledRuleAction};
use super::intent::{Diagnostic, DiagnosticKind, Intent, StepOutput};
use super::state::{AccountView, RuntimeState};

/// Borrowed view of one bar close.
#[derive(Debug, Clone, Copy)]
pub struct BarView<'a> {
    pub index: usize,
    pub time: NaiveDateTime,
    /// Market mid-price at the close.
    pub price: f64,
    pub indicators: &'a Snapshot,
    /// Previous bar's snapshot; `None` on the first bar.
    pub previous: Option<&'a Snapshot>,
}

/// Action values computed before any state is applied, so an evaluation
/// failure anywhere in a transition leaves the state untouched.
enum Planned {
    SetVar { name: String, value: f64 },
    Open {
        direction: Direction,
        lot: f64,
        sl: f64,
        tp: f64,
    },
    Close,
    Log { message: String },
}

/// Management effects computed the same way.
enum RuleEffect {
    SlTo(f64),
    TpTo(f64),
    Trail { to: f64, anchor: f64 },
    Partial { percent: f64 },
}

/// Drive one bar close through the state machine.
///
/// `timeframe` is the timeframe of the closing bar; phases only react to
/// timeframes they declare (`evaluate_on`, or the timeout's own timeframe
/// for timeout bookkeeping).
pub fn step(
    compiled: &CompiledPlaybook,
    state: &mut RuntimeState,
    view: &BarView<'_>,
    account: &AccountView,
    timeframe: Timeframe,
) -> StepOutput {
    let mut out = StepOutput::default();

    let Some(phase) = compiled.phase(&state.phase) else {
        out.diagnostics.push(Diagnostic::new(
            view.index,
            &state.phase,
            DiagnosticKind::EvalError,
            format!("runtime state references unknown phase '{}'", state.phase),
        ));
        return out;
    };

    let evaluates = phase.evaluate_on.contains(&timeframe);
    let counts_timeout = phase
        .timeout
        .as_ref()
        .map(|t| t.timeframe == timeframe)
        .unwrap_or(false);
    if !evaluates && !counts_timeout {
        return out;
    }

    let mut transition_taken = false;
    let mut closing = false;

    if evaluates {
        match select_transition(compiled, state, view, account, &mut out) {
            Selection::Aborted => return out,
            Selection::None => {}
            Selection::Taken { closed_position } => {
                transition_taken = true;
                closing = closed_position;
            }
        }
    }

    if !transition_taken {
        state.bars_in_phase += 1;
        if counts_timeout {
            // Unwrap is safe: counts_timeout implies a declared timeout.
            let timeout = phase.timeout.clone().expect("timeout declared");
            if state.bars_in_phase >= timeout.bars {
                if state.position.is_some() {
                    out.intents.push(Intent::Close {
                        reason: ExitReason::PhaseChange,
                    });
                    closing = true;
                }
                state.phase = timeout.to;
                state.bars_in_phase = 0;
            }
        }
    }

    // Management rules of the now-current phase. Skipped when this bar
    // already requested a close: the position is logically gone.
    if evaluates && !closing && state.position.is_some() {
        run_management(compiled, state, view, &mut out);
    }

    out
}

enum Selection {
    /// An EvalError aborted the phase for this bar; nothing was mutated.
    Aborted,
    None,
    Taken { closed_position: bool },
}

fn select_transition(
    compiled: &CompiledPlaybook,
    state: &mut RuntimeState,
    view: &BarView<'_>,
    account: &AccountView,
    out: &mut StepOutput,
) -> Selection {
    let phase = compiled
        .phase(&state.phase)
        .expect("caller verified the phase");

    // First-match-wins over ascending priority.
    let mut taken = None;
    {
        let ctx = context(compiled, state, view);
        for transition in &phase.transitions {
            match transition.when.eval(&ctx) {
                Ok(true) => {
                    taken = Some(transition);
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(phase = %phase.name, bar = view.index, error = %err, "transition condition failed");
                    out.diagnostics.push(Diagnostic::new(
                        view.index,
                        &phase.name,
                        DiagnosticKind::EvalError,
                        format!("transition condition: {err}"),
                    ));
                    return Selection::Aborted;
                }
            }
        }
    }
    let Some(transition) = taken else {
        return Selection::None;
    };

    // Evaluate every action value before applying anything. `set_var`
    // results become visible to later action expressions through a scratch
    // copy, preserving declared execution order.
    let mut scratch_vars = state.vars.clone();
    let mut planned = Vec::with_capacity(transition.actions.len());
    for action in &transition.actions {
        let ctx = EvalContext {
            indicators: view.indicators,
            previous: view.previous,
            vars: &scratch_vars,
            price: view.price,
            position: state.position.as_ref(),
            risk: &compiled.risk,
        };
        let result = match action {
            CompiledAction::SetVar { name, value } => value.eval(&ctx).map(|v| Planned::SetVar {
                name: name.clone(),
                value: v,
            }),
            CompiledAction::OpenTrade {
                direction,
                lot,
                sl,
                tp,
            } => lot.eval(&ctx).and_then(|lot_v| {
                let sl_v = sl.eval(&ctx)?;
                let tp_v = tp.eval(&ctx)?;
                Ok(Planned::Open {
                    direction: *direction,
                    lot: lot_v,
                    sl: sl_v,
                    tp: tp_v,
                })
            }),
            CompiledAction::CloseTrade => Ok(Planned::Close),
            CompiledAction::Log { message } => Ok(Planned::Log {
                message: message.clone(),
            }),
        };
        match result {
            Ok(p) => {
                // Make set_var results visible to later action expressions.
                if let Planned::SetVar { name, value } = &p {
                    scratch_vars.insert(name.clone(), *value);
                }
                planned.push(p);
            }
            Err(err) => {
                warn!(phase = %phase.name, bar = view.index, error = %err, "transition action failed");
                out.diagnostics.push(Diagnostic::new(
                    view.index,
                    &phase.name,
                    DiagnosticKind::EvalError,
                    format!("transition action: {err}"),
                ));
                return Selection::Aborted;
            }
        }
    }

    // Commit.
    state.vars = scratch_vars;
    let mut closed_position = false;
    let mut opening = false;
    for action in planned {
        match action {
            Planned::SetVar { .. } => {}
            Planned::Open {
                direction,
                lot,
                sl,
                tp,
            } => {
                // A close emitted earlier in this action list frees the slot,
                // so close-then-reopen works within one transition.
                let holding = state.position.is_some() && !closed_position;
                let mut acct = *account;
                if state.position.is_some() && closed_position {
                    acct.open_positions = acct.open_positions.saturating_sub(1);
                }
                if let Some(reason) = risk_rejection(compiled, holding, &acct, lot, opening) {
                    warn!(phase = %phase.name, bar = view.index, %reason, "open_trade skipped");
                    out.diagnostics.push(Diagnostic::new(
                        view.index,
                        &phase.name,
                        DiagnosticKind::RiskLimitSkip,
                        reason,
                    ));
                } else {
                    opening = true;
                    out.intents.push(Intent::Open {
                        direction,
                        lot,
                        sl,
                        tp,
                    });
                }
            }
            Planned::Close => {
                if state.position.is_some() {
                    closed_position = true;
                    out.intents.push(Intent::Close {
                        reason: ExitReason::Manual,
                    });
                } else {
                    out.diagnostics.push(Diagnostic::new(
                        view.index,
                        &phase.name,
                        DiagnosticKind::Log,
                        "close_trade with no open position",
                    ));
                }
            }
            Planned::Log { message } => {
                tracing::info!(phase = %phase.name, bar = view.index, "{message}");
                out.diagnostics.push(Diagnostic::new(
                    view.index,
                    &phase.name,
                    DiagnosticKind::Log,
                    message,
                ));
            }
        }
    }

    state.phase = transition.to.clone();
    state.bars_in_phase = 0;
    Selection::Taken { closed_position }
}

/// Returns a human-readable reason when risk limits block the entry.
fn risk_rejection(
    compiled: &CompiledPlaybook,
    holding: bool,
    account: &AccountView,
    lot: f64,
    already_opening: bool,
) -> Option<String> {
    let risk = &compiled.risk;
    if !(lot > 0.0) {
        return Some(format!("lot {lot} is not positive"));
    }
    if lot > risk.max_lot {
        return Some(format!("lot {lot} exceeds max_lot {}", risk.max_lot));
    }
    if holding || already_opening {
        return Some("a position is already open for this playbook".to_string());
    }
    if account.open_positions >= risk.max_concurrent_positions {
        return Some(format!(
            "{} open position(s) at max_concurrent_positions {}",
            account.open_positions, risk.max_concurrent_positions
        ));
    }
    if account.trades_today >= risk.max_daily_trades {
        return Some(format!(
            "daily trade count {} at max_daily_trades {}",
            account.trades_today, risk.max_daily_trades
        ));
    }
    if account.drawdown_pct >= risk.max_drawdown_pct {
        return Some(format!(
            "drawdown {:.2}% at max_drawdown_pct {}",
            account.drawdown_pct, risk.max_drawdown_pct
        ));
    }
    None
}

fn run_management(
    compiled: &CompiledPlaybook,
    state: &mut RuntimeState,
    view: &BarView<'_>,
    out: &mut StepOutput,
) {
    let Some(phase) = compiled.phase(&state.phase) else {
        return;
    };
    if phase.management.is_empty() {
        return;
    }

    // Plan every fired rule first; any EvalError abandons the whole batch
    // for this bar with nothing applied.
    let mut effects: Vec<(String, bool, RuleEffect)> = Vec::new();
    {
        let ctx = context(compiled, state, view);
        let position = state.position.as_ref().expect("caller verified position");
        for rule in &phase.management {
            if rule.once && state.fired_once.contains(&rule.name) {
                continue;
            }
            let fired = match rule.when.eval(&ctx) {
                Ok(fired) => fired,
                Err(err) => {
                    warn!(phase = %phase.name, rule = %rule.name, bar = view.index, error = %err, "management rule failed");
                    out.diagnostics.push(Diagnostic::new(
                        view.index,
                        &phase.name,
                        DiagnosticKind::EvalError,
                        format!("management rule '{}': {err}", rule.name),
                    ));
                    return;
                }
            };
            if !fired {
                continue;
            }
            let effect = match &rule.action {
                CompiledRuleAction::ModifySl(to) => {
                    to.eval(&ctx).map(|v| Some(RuleEffect::SlTo(v)))
                }
                CompiledRuleAction::ModifyTp(to) => {
                    to.eval(&ctx).map(|v| Some(RuleEffect::TpTo(v)))
                }
                CompiledRuleAction::TrailSl { distance, step } => {
                    distance.eval(&ctx).and_then(|dist| {
                        let step_v = step.eval(&ctx)?;
                        Ok(trail_effect(position, view.price, dist, step_v))
                    })
                }
                CompiledRuleAction::PartialClose(percent) => percent.eval(&ctx).map(|pct| {
                    let pct = pct.clamp(0.0, 100.0);
                    (pct > 0.0).then_some(RuleEffect::Partial { percent: pct })
                }),
            };
            match effect {
                Ok(Some(effect)) => effects.push((rule.name.clone(), rule.once, effect)),
                // Trail armed but not improving: condition fired without an
                // applicable effect; `once` is not consumed.
                Ok(None) => {}
                Err(err) => {
                    warn!(phase = %phase.name, rule = %rule.name, bar = view.index, error = %err, "management rule failed");
                    out.diagnostics.push(Diagnostic::new(
                        view.index,
                        &phase.name,
                        DiagnosticKind::EvalError,
                        format!("management rule '{}': {err}", rule.name),
                    ));
                    return;
                }
            }
        }
    }

    for (name, once, effect) in effects {
        if once {
            state.fired_once.insert(name.clone());
        }
        let intent = match effect {
            RuleEffect::SlTo(to) => Intent::ModifySl { rule: name, to },
            RuleEffect::TpTo(to) => Intent::ModifyTp { rule: name, to },
            RuleEffect::Trail { to, anchor } => Intent::TrailSl {
                rule: name,
                to,
                anchor,
            },
            RuleEffect::Partial { percent } => Intent::PartialClose {
                rule: name,
                percent,
            },
        };
        out.intents.push(intent);
    }
}

/// Trailing stop: move the stop `distance` behind price, but only when price
/// has advanced `step` beyond the last anchor, and never against the
/// position's favor.
fn trail_effect(
    position: &crate::domain::position::OpenPosition,
    price: f64,
    distance: f64,
    step: f64,
) -> Option<RuleEffect> {
    let sign = position.direction.sign();
    let armed = match position.trail_anchor {
        None => true,
        Some(anchor) => (price - anchor) * sign >= step,
    };
    if !armed {
        return None;
    }
    let proposed = price - sign * distance;
    let improves = match position.sl {
        None => true,
        Some(current) => (proposed - current) * sign > 0.0,
    };
    if !improves {
        return None;
    }
    Some(RuleEffect::Trail {
        to: proposed,
        anchor: price,
    })
}

fn context<'a>(
    compiled: &'a CompiledPlaybook,
    state: &'a RuntimeState,
    view: &BarView<'a>,
) -> EvalContext<'a> {
    EvalContext {
        indicators: view.indicators,
        previous: view.previous,
        vars: &state.vars,
        price: view.price,
        position: state.position.as_ref(),
        risk: &compiled.risk,
    }
}
