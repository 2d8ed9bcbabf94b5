//! Parameter sweep — cartesian grid of dotted-path overrides, run in
//! parallel with per-combination failure isolation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use playbook_core::domain::Playbook;
use playbook_core::feed::BarSeries;
use playbook_core::sim::{simulate, SimParams};

use crate::metrics::{Metrics, RankBy};

/// One sweep axis: a dotted path into the playbook and the values to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepAxis {
    /// `variables.<name>.default`, `risk.<field>`, or
    /// `phases.<name>.timeout.bars`.
    pub path: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Error)]
pub enum SweepError {
    #[error("unknown override path '{0}'")]
    UnknownPath(String),
    #[error("sweep has no axes")]
    NoAxes,
    #[error("axis '{0}' has no values")]
    EmptyAxis(String),
}

/// A completed combination with its parameters and full metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    pub params: BTreeMap<String, f64>,
    pub metrics: Metrics,
    pub trade_count: usize,
}

/// A combination that failed, kept separate so it never hides successes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFailure {
    pub params: BTreeMap<String, f64>,
    pub error: String,
}

/// Ranked sweep output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub total_combinations: usize,
    pub rank_by: RankBy,
    /// Descending by the ranking metric.
    pub ranked: Vec<SweepEntry>,
    pub failures: Vec<SweepFailure>,
    pub cancelled: bool,
}

/// Apply one override to a cloned playbook.
pub fn apply_override(playbook: &mut Playbook, path: &str, value: f64) -> Result<(), SweepError> {
    let segments: Vec<&str> = path.split('.').collect();
    match segments.as_slice() {
        ["variables", name, "default"] => {
            let spec = playbook
                .variables
                .get_mut(*name)
                .ok_or_else(|| SweepError::UnknownPath(path.to_string()))?;
            spec.default = value;
            Ok(())
        }
        ["risk", field] => {
            match *field {
                "max_lot" => playbook.risk.max_lot = value,
                "max_daily_trades" => playbook.risk.max_daily_trades = value as u32,
                "max_drawdown_pct" => playbook.risk.max_drawdown_pct = value,
                "max_concurrent_positions" => {
                    playbook.risk.max_concurrent_positions = value as u32
                }
                _ => return Err(SweepError::UnknownPath(path.to_string())),
            }
            Ok(())
        }
        ["phases", name, "timeout", "bars"] => {
            let timeout = playbook
                .phases
                .iter_mut()
                .find(|p| p.name == *name)
                .and_then(|p| p.timeout.as_mut())
                .ok_or_else(|| SweepError::UnknownPath(path.to_string()))?;
            timeout.bars = value as u32;
            Ok(())
        }
        _ => Err(SweepError::UnknownPath(path.to_string())),
    }
}

/// All combinations of the axes, in odometer order (last axis fastest).
pub fn cartesian(axes: &[SweepAxis]) -> Result<Vec<BTreeMap<String, f64>>, SweepError> {
    if axes.is_empty() {
        return Err(SweepError::NoAxes);
    }
    for axis in axes {
        if axis.values.is_empty() {
            return Err(SweepError::EmptyAxis(axis.path.clone()));
        }
    }

    let total: usize = axes.iter().map(|a| a.values.len()).product();
    let mut combinations = Vec::with_capacity(total);
    let mut indices = vec![0usize; axes.len()];
    loop {
        let combo: BTreeMap<String, f64> = axes
            .iter()
            .zip(&indices)
            .map(|(axis, &i)| (axis.path.clone(), axis.values[i]))
            .collect();
        combinations.push(combo);

        // Advance the odometer.
        let mut pos = axes.len();
        loop {
            if pos == 0 {
                return Ok(combinations);
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < axes[pos].values.len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

/// Run the full sweep: one independent simulation per combination, rayon
/// across cores, failures collected per combination, results ranked
/// descending by `rank_by`.
pub fn run_sweep(
    base: &Playbook,
    series: &BarSeries,
    params: &SimParams,
    axes: &[SweepAxis],
    rank_by: RankBy,
    cancel: Option<&AtomicBool>,
) -> Result<SweepReport, SweepError> {
    let combinations = cartesian(axes)?;
    let total_combinations = combinations.len();

    let outcomes: Vec<(BTreeMap<String, f64>, Result<SweepEntry, String>)> = combinations
        .into_par_iter()
        .filter_map(|combo| {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return None;
                }
            }
            // Each combination owns a deep clone; no shared mutable state.
            let mut playbook = base.clone();
            for (path, value) in &combo {
                if let Err(err) = apply_override(&mut playbook, path, *value) {
                    return Some((combo.clone(), Err(err.to_string())));
                }
            }
            let result = match simulate(&playbook, series, params) {
                Ok(report) => {
                    let metrics = Metrics::compute(
                        &report.trades,
                        &report.equity,
                        &report.drawdown,
                        params.starting_balance,
                        report.bars_replayed,
                        series.timeframe,
                    );
                    Ok(SweepEntry {
                        params: combo.clone(),
                        trade_count: report.trades.len(),
                        metrics,
                    })
                }
                Err(err) => Err(err.to_string()),
            };
            Some((combo, result))
        })
        .collect();

    let cancelled = outcomes.len() < total_combinations;
    let mut ranked = Vec::new();
    let mut failures = Vec::new();
    for (params, outcome) in outcomes {
        match outcome {
            Ok(entry) => ranked.push(entry),
            Err(error) => {
                warn!(?params, %error, "sweep combination failed");
                failures.push(SweepFailure { params, error });
            }
        }
    }

    ranked.sort_by(|a, b| {
        b.metrics
            .value(rank_by)
            .partial_cmp(&a.metrics.value(rank_by))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(SweepReport {
        total_combinations,
        rank_by,
        ranked,
        failures,
        cancelled,
    })
}
