//! Backtest simulator — replays a playbook bar-by-bar over a historical feed.
//!
//! Drives the same state machine as live execution, adding the three
//! simulation-specific mechanics: spread-adjusted fills, high/low exit
//! detection with stop-loss precedence, and trade-based equity accounting.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::debug;

use crate::domain::bar::Bar;
use crate::domain::playbook::Playbook;
use crate::domain::position::{
    Direction, ManagementEvent, ManagementEventKind, OpenPosition,
};
use crate::domain::trade::{classify_outcome, ExitReason, Trade};
use crate::engine::compile::{compile, CompiledPlaybook, ValidationError};
use crate::engine::intent::{Diagnostic, Intent};
use crate::engine::machine::{step, BarView};
use crate::engine::state::{AccountView, RuntimeState};
use crate::expr::context::Snapshot;
use crate::feed::{BarSeries, DataError};

use super::equity::EquityTracker;
use super::exits::detect_exit;

/// Remaining lot at or below this is a full close.
const LOT_EPSILON: f64 = 1e-9;

/// Execution parameters for one simulation run.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Full bid/ask spread in price increments; entries pay half each side.
    pub spread: f64,
    pub starting_balance: f64,
    /// Bars to replay; `None` replays the whole series. Requesting more than
    /// the series holds is a `DataError`, never a silent truncation.
    pub bar_count: Option<usize>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            spread: 0.0,
            starting_balance: 10_000.0,
            bar_count: None,
        }
    }
}

/// Simulation output: trades, curves, and the non-fatal diagnostics
/// accumulated along the way.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub trades: Vec<Trade>,
    /// Starting balance followed by one point per closed trade.
    pub equity: Vec<f64>,
    /// Drawdown in percent of the running peak, parallel to `equity`.
    pub drawdown: Vec<f64>,
    pub diagnostics: Vec<Diagnostic>,
    pub bars_replayed: usize,
}

/// Fatal simulation failures.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Data(#[from] DataError),
    /// An internal invariant broke mid-replay. Aborts only this run.
    #[error("simulation invariant violated: {0}")]
    Simulation(String),
}

/// Replay `playbook` over `series` and produce a report.
///
/// Fails fast: validation and data-availability problems surface before the
/// first bar is touched.
pub fn simulate(
    playbook: &Playbook,
    series: &BarSeries,
    params: &SimParams,
) -> Result<SimReport, SimError> {
    let compiled = compile(playbook)?;
    let bar_count = params.bar_count.unwrap_or_else(|| series.len());
    series.require(bar_count)?;

    let mut sim = Sim {
        compiled: &compiled,
        state: RuntimeState::from_compiled(&compiled),
        equity: EquityTracker::new(params.starting_balance),
        trades: Vec::new(),
        diagnostics: Vec::new(),
        half_spread: params.spread / 2.0,
        next_ticket: 1,
        trades_today: 0,
        current_day: None,
    };

    for index in 0..bar_count {
        sim.replay_bar(series, index)?;
    }

    // A position surviving the last bar closes at the final close.
    if let Some(direction) = sim.state.position.as_ref().map(|p| p.direction) {
        let last = bar_count - 1;
        let bar = series.bar(last);
        let price = sim.close_fill(bar.mid(), direction);
        sim.close_position(last, bar.time, price, ExitReason::Timeout)?;
    }

    debug!(
        playbook = %compiled.id,
        symbol = %series.symbol,
        bars = bar_count,
        trades = sim.trades.len(),
        "simulation complete"
    );

    let (equity, drawdown) = sim.equity.into_series();
    Ok(SimReport {
        trades: sim.trades,
        equity,
        drawdown,
        diagnostics: sim.diagnostics,
        bars_replayed: bar_count,
    })
}

struct Sim<'a> {
    compiled: &'a CompiledPlaybook,
    state: RuntimeState,
    equity: EquityTracker,
    trades: Vec<Trade>,
    diagnostics: Vec<Diagnostic>,
    half_spread: f64,
    next_ticket: u64,
    trades_today: u32,
    current_day: Option<NaiveDate>,
}

impl<'a> Sim<'a> {
    fn replay_bar(&mut self, series: &BarSeries, index: usize) -> Result<(), SimError> {
        let window = series.window(index);
        let bar = window.bar;

        let day = bar.time.date();
        if self.current_day != Some(day) {
            self.current_day = Some(day);
            self.trades_today = 0;
        }

        // Exit detection first: the bar's range plays out before its close
        // is evaluated. Positions opened on this very close are exempt.
        if let Some(position) = self.state.position.as_ref() {
            if position.entry_bar < index {
                if let Some((reason, level)) = detect_exit(position, bar) {
                    self.close_position(index, bar.time, level, reason)?;
                }
            }
        }

        let view = BarView {
            index,
            time: bar.time,
            price: bar.mid(),
            indicators: window.indicators,
            previous: window.previous,
        };
        let account = AccountView {
            open_positions: u32::from(self.state.position.is_some()),
            trades_today: self.trades_today,
            drawdown_pct: self.equity.current_drawdown_pct(),
        };
        let output = step(
            self.compiled,
            &mut self.state,
            &view,
            &account,
            series.timeframe,
        );
        self.diagnostics.extend(output.diagnostics);

        for intent in output.intents {
            self.apply_intent(intent, index, bar, window.indicators)?;
        }
        Ok(())
    }

    fn apply_intent(
        &mut self,
        intent: Intent,
        index: usize,
        bar: &Bar,
        indicators: &Snapshot,
    ) -> Result<(), SimError> {
        match intent {
            Intent::Open {
                direction,
                lot,
                sl,
                tp,
            } => {
                if self.state.position.is_some() {
                    return Err(SimError::Simulation(
                        "open intent while a position is already open".to_string(),
                    ));
                }
                // Buy pays the ask, sell receives the bid.
                let fill = bar.mid() + direction.sign() * self.half_spread;
                let snapshot = self.entry_snapshot(indicators);
                self.state.position = Some(OpenPosition {
                    ticket: self.next_ticket,
                    direction,
                    entry_bar: index,
                    entry_time: bar.time,
                    entry_price: fill,
                    lot,
                    sl: price_level(sl),
                    tp: price_level(tp),
                    initial_sl: price_level(sl),
                    entry_phase: self.state.phase.clone(),
                    trail_anchor: None,
                    realized_partial: 0.0,
                    entry_snapshot: snapshot,
                    events: Vec::new(),
                });
                self.next_ticket += 1;
                self.trades_today += 1;
            }
            Intent::Close { reason } => {
                let direction = self
                    .state
                    .position
                    .as_ref()
                    .map(|p| p.direction)
                    .ok_or_else(|| {
                        SimError::Simulation("close intent with no open position".to_string())
                    })?;
                let price = self.close_fill(bar.mid(), direction);
                self.close_position(index, bar.time, price, reason)?;
            }
            Intent::ModifySl { rule, to } => {
                let position = self.position_mut()?;
                position.events.push(ManagementEvent {
                    bar: index,
                    rule,
                    kind: ManagementEventKind::SlModified {
                        from: position.sl,
                        to,
                    },
                });
                position.sl = Some(to);
            }
            Intent::ModifyTp { rule, to } => {
                let position = self.position_mut()?;
                position.events.push(ManagementEvent {
                    bar: index,
                    rule,
                    kind: ManagementEventKind::TpModified {
                        from: position.tp,
                        to,
                    },
                });
                position.tp = Some(to);
            }
            Intent::TrailSl { rule, to, anchor } => {
                let position = self.position_mut()?;
                position.events.push(ManagementEvent {
                    bar: index,
                    rule,
                    kind: ManagementEventKind::SlTrailed { to, anchor },
                });
                position.sl = Some(to);
                position.trail_anchor = Some(anchor);
            }
            Intent::PartialClose { rule, percent } => {
                let half_spread = self.half_spread;
                let position = self.position_mut()?;
                let closed_lot = position.lot * percent / 100.0;
                let price =
                    bar.mid() - position.direction.sign() * half_spread;
                let pnl = (price - position.entry_price)
                    * position.direction.sign()
                    * closed_lot;
                position.lot -= closed_lot;
                position.realized_partial += pnl;
                position.events.push(ManagementEvent {
                    bar: index,
                    rule,
                    kind: ManagementEventKind::PartialClosed {
                        lot: closed_lot,
                        price,
                        pnl,
                    },
                });
                if position.lot <= LOT_EPSILON {
                    self.close_position(index, bar.time, price, ExitReason::Manual)?;
                }
            }
        }
        Ok(())
    }

    /// Finalize the open position into an immutable trade, update equity,
    /// and let the state machine react to the closure.
    fn close_position(
        &mut self,
        close_bar: usize,
        close_time: NaiveDateTime,
        close_price: f64,
        reason: ExitReason,
    ) -> Result<(), SimError> {
        let position = self.state.position.take().ok_or_else(|| {
            SimError::Simulation("position close requested with no open position".to_string())
        })?;

        let sign = position.direction.sign();
        let pnl_points = (close_price - position.entry_price) * sign;
        let pnl = pnl_points * position.lot + position.realized_partial;

        let risk_points = position
            .initial_sl
            .map(|sl| (position.entry_price - sl) * sign)
            .filter(|r| *r > 0.0);
        let rr_achieved = risk_points.map(|r| pnl_points / r).unwrap_or(0.0);

        let entry_lot = position.lot
            + position
                .events
                .iter()
                .map(|e| match e.kind {
                    ManagementEventKind::PartialClosed { lot, .. } => lot,
                    _ => 0.0,
                })
                .sum::<f64>();

        let trade = Trade {
            ticket: position.ticket,
            direction: position.direction,
            open_bar: position.entry_bar,
            open_time: position.entry_time,
            open_price: position.entry_price,
            close_bar,
            close_time,
            close_price,
            sl: position.sl,
            tp: position.tp,
            lot: entry_lot,
            pnl,
            pnl_points,
            rr_achieved,
            outcome: classify_outcome(pnl),
            exit_reason: reason,
            entry_phase: position.entry_phase,
            entry_snapshot: position.entry_snapshot,
            events: position.events,
        };

        self.equity.record_close(trade.pnl);
        self.trades.push(trade);
        self.state.on_position_closed(self.compiled);
        Ok(())
    }

    /// Closing side of the spread: a buy closes at the bid, a sell at the ask.
    fn close_fill(&self, mid: f64, direction: Direction) -> f64 {
        mid - direction.sign() * self.half_spread
    }

    /// Variables plus flattened indicator values at entry.
    fn entry_snapshot(&self, indicators: &Snapshot) -> BTreeMap<String, f64> {
        let mut snapshot = self.state.vars.clone();
        for (id, fields) in indicators {
            for (field, value) in fields {
                snapshot.insert(format!("{id}.{field}"), *value);
            }
        }
        snapshot
    }

    fn position_mut(&mut self) -> Result<&mut OpenPosition, SimError> {
        self.state.position.as_mut().ok_or_else(|| {
            SimError::Simulation("management intent with no open position".to_string())
        })
    }
}

/// Stops and targets at or below zero mean "not set".
fn price_level(level: f64) -> Option<f64> {
    (level > 0.0).then_some(level)
}
