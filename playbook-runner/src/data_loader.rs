//! Input loading: playbook JSON, bar CSV, indicator snapshot JSON.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use thiserror::Error;

use playbook_core::domain::{Bar, Playbook, Timeframe};
use playbook_core::expr::Snapshot;
use playbook_core::feed::{BarSeries, DataError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad timestamp '{value}' on line {line}")]
    BadTimestamp { line: usize, value: String },
    #[error(transparent)]
    Data(#[from] DataError),
}

/// CSV row: `time,open,high,low,close,volume`.
#[derive(Debug, Deserialize)]
struct BarRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Accepted timestamp formats, tried in order.
const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_time(value: &str, line: usize) -> Result<NaiveDateTime, LoadError> {
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(time);
        }
    }
    Err(LoadError::BadTimestamp {
        line,
        value: value.to_string(),
    })
}

/// Load OHLCV bars from a headered CSV file.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, LoadError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = Vec::new();
    for (i, row) in reader.deserialize::<BarRow>().enumerate() {
        let row = row?;
        bars.push(Bar {
            time: parse_time(&row.time, i + 2)?, // +2: header and 1-indexing
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(bars)
}

/// Load per-bar indicator snapshots from JSON: an array (one element per
/// bar) of `{ indicator_id: { field: value } }` maps.
pub fn load_indicator_snapshots(path: &Path) -> Result<Vec<Snapshot>, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Load a playbook document from JSON.
pub fn load_playbook(path: &Path) -> Result<Playbook, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Assemble a validated `BarSeries` from the input files. When no indicator
/// file is given, every bar gets an empty snapshot.
pub fn load_series(
    symbol: &str,
    timeframe: Timeframe,
    bars_path: &Path,
    indicators_path: Option<&Path>,
) -> Result<BarSeries, LoadError> {
    let bars = load_bars_csv(bars_path)?;
    let snapshots = match indicators_path {
        Some(path) => load_indicator_snapshots(path)?,
        None => vec![Snapshot::new(); bars.len()],
    };
    Ok(BarSeries::new(symbol, timeframe, bars, snapshots)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str, ext: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .suffix(ext)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn loads_bar_csv() {
        let path = write_temp(
            "time,open,high,low,close,volume\n\
             2024-01-02 00:00:00,100.0,101.0,99.0,100.5,1500\n\
             2024-01-02 01:00:00,100.5,102.0,100.0,101.5,1800\n",
            ".csv",
        );
        let bars = load_bars_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[1].volume, 1800.0);
    }

    #[test]
    fn rejects_bad_timestamp() {
        let path = write_temp(
            "time,open,high,low,close,volume\nnot-a-time,1,1,1,1,1\n",
            ".csv",
        );
        let err = load_bars_csv(&path).unwrap_err();
        assert!(matches!(err, LoadError::BadTimestamp { line: 2, .. }));
    }

    #[test]
    fn loads_indicator_snapshots() {
        let path = write_temp(
            r#"[
                { "rsi": { "value": 55.0 } },
                { "rsi": { "value": 25.0 } }
            ]"#,
            ".json",
        );
        let snapshots = load_indicator_snapshots(&path).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1]["rsi"]["value"], 25.0);
    }

    #[test]
    fn assembles_series_without_indicators() {
        let path = write_temp(
            "time,open,high,low,close,volume\n\
             2024-01-02 00:00:00,100.0,101.0,99.0,100.5,1500\n",
            ".csv",
        );
        let series = load_series("EURUSD", Timeframe::H1, &path, None).unwrap();
        assert_eq!(series.len(), 1);
    }
}
