//! Result artifacts — run JSON and a flat trades CSV.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::run::BacktestRun;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Write `<id>.json` and `<id>_trades.csv` into `dir`, creating it if
/// needed. Returns the JSON path.
pub fn save_run(run: &BacktestRun, dir: &Path) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;

    let json_path = dir.join(format!("{}.json", run.id));
    fs::write(&json_path, serde_json::to_string_pretty(run)?)?;

    let csv_path = dir.join(format!("{}_trades.csv", run.id));
    write_trades_csv(run, &csv_path)?;

    Ok(json_path)
}

fn write_trades_csv(run: &BacktestRun, path: &Path) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "ticket",
        "direction",
        "open_bar",
        "open_time",
        "open_price",
        "close_bar",
        "close_time",
        "close_price",
        "lot",
        "pnl",
        "pnl_points",
        "rr_achieved",
        "outcome",
        "exit_reason",
        "entry_phase",
    ])?;
    for trade in &run.trades {
        writer.write_record([
            trade.ticket.to_string(),
            variant_name(&trade.direction),
            trade.open_bar.to_string(),
            trade.open_time.to_string(),
            trade.open_price.to_string(),
            trade.close_bar.to_string(),
            trade.close_time.to_string(),
            trade.close_price.to_string(),
            trade.lot.to_string(),
            trade.pnl.to_string(),
            trade.pnl_points.to_string(),
            trade.rr_achieved.to_string(),
            variant_name(&trade.outcome),
            variant_name(&trade.exit_reason),
            trade.entry_phase.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Snake-case wire name of a unit enum variant (e.g. `phase_change`).
fn variant_name<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Load a run document back from disk.
pub fn load_run(path: &Path) -> Result<BacktestRun, ExportError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
