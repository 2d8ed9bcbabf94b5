//! Expression evaluation against a per-bar context.
//!
//! All arithmetic is f64. Division and modulo by zero, and out-of-domain
//! function arguments, are explicit `EvalError`s — NaN and infinity never
//! propagate into engine decisions.

use super::ast::{BinOp, Expr, Func, Ref, RiskField, TradeField};
use super::context::EvalContext;
use super::error::EvalError;

impl Expr {
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<f64, EvalError> {
        match self {
            Expr::Num(value) => Ok(*value),
            Expr::Ref(r) => resolve(r, ctx),
            Expr::Neg(inner) => Ok(-inner.eval(ctx)?),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(ctx)?;
                let b = rhs.eval(ctx)?;
                binary(*op, a, b)
            }
            Expr::Call(func, args) => {
                // All arguments evaluate eagerly, iff included: evaluation is
                // side-effect-free, so eagerness is observable only through
                // errors, which must surface rather than hide behind a branch.
                let mut values = [0.0_f64; 3];
                for (slot, arg) in values.iter_mut().zip(args.iter()) {
                    *slot = arg.eval(ctx)?;
                }
                call(*func, &values[..args.len()])
            }
        }
    }
}

fn binary(op: BinOp, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        BinOp::Div => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        }
        BinOp::Rem => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a % b)
            }
        }
        BinOp::Pow => {
            let result = a.powf(b);
            if result.is_nan() {
                Err(EvalError::Domain { func: "**", arg: a })
            } else {
                Ok(result)
            }
        }
    }
}

fn call(func: Func, args: &[f64]) -> Result<f64, EvalError> {
    match func {
        Func::Abs => Ok(args[0].abs()),
        Func::Min => Ok(args[0].min(args[1])),
        Func::Max => Ok(args[0].max(args[1])),
        Func::Sqrt => {
            if args[0] < 0.0 {
                Err(EvalError::Domain {
                    func: "sqrt",
                    arg: args[0],
                })
            } else {
                Ok(args[0].sqrt())
            }
        }
        Func::Log => {
            if args[0] <= 0.0 {
                Err(EvalError::Domain {
                    func: "log",
                    arg: args[0],
                })
            } else {
                Ok(args[0].ln())
            }
        }
        // Half-away-from-zero, the f64::round convention.
        Func::Round => {
            let places = args[1] as i32;
            let scale = 10f64.powi(places);
            Ok((args[0] * scale).round() / scale)
        }
        Func::Clamp => Ok(args[0].max(args[1]).min(args[2])),
        // Non-zero condition selects the first branch.
        Func::Iff => Ok(if args[0] != 0.0 { args[1] } else { args[2] }),
    }
}

fn resolve(r: &Ref, ctx: &EvalContext<'_>) -> Result<f64, EvalError> {
    match r {
        Ref::Price => Ok(ctx.price),
        Ref::Var(name) => {
            ctx.vars
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::UnknownVariable { name: name.clone() })
        }
        Ref::Indicator { id, field, prev } => {
            let snapshot = if *prev {
                ctx.previous.ok_or_else(|| EvalError::NoPreviousBar {
                    id: id.clone(),
                    field: field.clone(),
                })?
            } else {
                ctx.indicators
            };
            let fields = snapshot
                .get(id)
                .ok_or_else(|| EvalError::UnknownIndicator { id: id.clone() })?;
            fields
                .get(field)
                .copied()
                .ok_or_else(|| EvalError::UnknownField {
                    id: id.clone(),
                    field: field.clone(),
                })
        }
        Ref::Trade(field) => {
            let pos = ctx.position.ok_or_else(|| EvalError::NoOpenTrade {
                field: trade_field_name(*field).to_string(),
            })?;
            Ok(match field {
                TradeField::EntryPrice => pos.entry_price,
                TradeField::Lot => pos.lot,
                // Unset stops read as 0, matching the loosely-typed source
                // convention playbooks compare against.
                TradeField::Sl => pos.sl.unwrap_or(0.0),
                TradeField::Tp => pos.tp.unwrap_or(0.0),
                TradeField::Direction => pos.direction.sign(),
                TradeField::ProfitPoints => pos.profit_points(ctx.price),
            })
        }
        Ref::Risk(field) => Ok(match field {
            RiskField::MaxLot => ctx.risk.max_lot,
            RiskField::MaxDailyTrades => f64::from(ctx.risk.max_daily_trades),
            RiskField::MaxDrawdownPct => ctx.risk.max_drawdown_pct,
            RiskField::MaxConcurrentPositions => f64::from(ctx.risk.max_concurrent_positions),
        }),
    }
}

fn trade_field_name(field: TradeField) -> &'static str {
    match field {
        TradeField::EntryPrice => "entry_price",
        TradeField::Lot => "lot",
        TradeField::Sl => "sl",
        TradeField::Tp => "tp",
        TradeField::Direction => "direction",
        TradeField::ProfitPoints => "profit_points",
    }
}
