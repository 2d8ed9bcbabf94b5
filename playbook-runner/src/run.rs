//! Backtest run lifecycle — pending → running → complete | failed.
//!
//! A `BacktestRun` is the persistable record of one simulation: its inputs,
//! fingerprint, status, and (on completion) the full result document. Never
//! mutated after completion.

use serde::{Deserialize, Serialize};

use playbook_core::domain::{Playbook, Timeframe, Trade};
use playbook_core::engine::Diagnostic;
use playbook_core::feed::BarSeries;
use playbook_core::sim::{simulate, SimParams};

use crate::metrics::Metrics;

/// Schema version for persisted run documents.
pub const SCHEMA_VERSION: u32 = 1;

/// Deterministic identifier: BLAKE3 over the canonical run inputs, so
/// identical inputs always produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn derive(playbook: &Playbook, series: &BarSeries, params: &SimParams) -> Self {
        let mut hasher = blake3::Hasher::new();
        let playbook_json =
            serde_json::to_string(playbook).expect("playbook documents serialize");
        hasher.update(playbook_json.as_bytes());
        hasher.update(series.symbol.as_bytes());
        hasher.update(series.timeframe.to_string().as_bytes());
        hasher.update(&series.len().to_le_bytes());
        hasher.update(&params.spread.to_le_bytes());
        hasher.update(&params.starting_balance.to_le_bytes());
        hasher.update(&params.bar_count.unwrap_or(series.len()).to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// One backtest run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: RunId,
    pub playbook_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_count: usize,
    pub spread: f64,
    pub starting_balance: f64,
    pub status: RunStatus,

    // Populated on completion.
    pub trades: Vec<Trade>,
    pub equity: Vec<f64>,
    pub drawdown: Vec<f64>,
    pub metrics: Option<Metrics>,
    pub diagnostics: Vec<Diagnostic>,

    /// Populated on failure.
    pub error: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestRun {
    /// Create a pending run record for the given inputs.
    pub fn new(playbook: &Playbook, series: &BarSeries, params: &SimParams) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: RunId::derive(playbook, series, params),
            playbook_id: playbook.id.clone(),
            symbol: series.symbol.clone(),
            timeframe: series.timeframe,
            bar_count: params.bar_count.unwrap_or_else(|| series.len()),
            spread: params.spread,
            starting_balance: params.starting_balance,
            status: RunStatus::Pending,
            trades: Vec::new(),
            equity: Vec::new(),
            drawdown: Vec::new(),
            metrics: None,
            diagnostics: Vec::new(),
            error: None,
        }
    }

    /// Execute the simulation and finalize this record as complete or failed.
    pub fn execute(&mut self, playbook: &Playbook, series: &BarSeries, params: &SimParams) {
        self.status = RunStatus::Running;
        tracing::info!(run = %self.id, playbook = %self.playbook_id, "backtest started");

        match simulate(playbook, series, params) {
            Ok(report) => {
                let metrics = Metrics::compute(
                    &report.trades,
                    &report.equity,
                    &report.drawdown,
                    params.starting_balance,
                    report.bars_replayed,
                    series.timeframe,
                );
                self.trades = report.trades;
                self.equity = report.equity;
                self.drawdown = report.drawdown;
                self.diagnostics = report.diagnostics;
                self.metrics = Some(metrics);
                self.status = RunStatus::Complete;
                tracing::info!(run = %self.id, trades = self.trades.len(), "backtest complete");
            }
            Err(err) => {
                self.error = Some(err.to_string());
                self.status = RunStatus::Failed;
                tracing::warn!(run = %self.id, error = %err, "backtest failed");
            }
        }
    }
}

/// Convenience: create and execute in one call.
pub fn execute_run(playbook: &Playbook, series: &BarSeries, params: &SimParams) -> BacktestRun {
    let mut run = BacktestRun::new(playbook, series, params);
    run.execute(playbook, series, params);
    run
}
