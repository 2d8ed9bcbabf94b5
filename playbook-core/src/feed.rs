//! Historical bar feed — ordered bars plus per-bar indicator snapshots.
//!
//! Indicator values are computed by an external subsystem and supplied in
//! full before evaluation; the engine only looks them up.

use thiserror::Error;

use crate::domain::bar::{Bar, Timeframe};
use crate::expr::context::Snapshot;

/// Bar-feed problems. Always fatal to a run, detected before the loop starts.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("bar series is empty")]
    Empty,
    #[error("insufficient bars: requested {requested}, available {available}")]
    Insufficient { requested: usize, available: usize },
    #[error("bar count {bars} does not match indicator snapshot count {snapshots}")]
    LengthMismatch { bars: usize, snapshots: usize },
    #[error("bars out of order at index {index}")]
    OutOfOrder { index: usize },
    #[error("bar at index {index} fails OHLC sanity checks")]
    InsaneBar { index: usize },
}

/// One bar with its current and previous indicator snapshots.
#[derive(Debug, Clone, Copy)]
pub struct BarWindow<'a> {
    pub index: usize,
    pub bar: &'a Bar,
    pub indicators: &'a Snapshot,
    /// `None` on the first bar.
    pub previous: Option<&'a Snapshot>,
}

/// Ordered bars and indicator snapshots for one (symbol, timeframe).
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    bars: Vec<Bar>,
    indicators: Vec<Snapshot>,
}

impl BarSeries {
    /// Build a series, validating lengths, ordering, and OHLC sanity.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
        indicators: Vec<Snapshot>,
    ) -> Result<Self, DataError> {
        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        if bars.len() != indicators.len() {
            return Err(DataError::LengthMismatch {
                bars: bars.len(),
                snapshots: indicators.len(),
            });
        }
        for (i, bar) in bars.iter().enumerate() {
            if !bar.is_sane() {
                return Err(DataError::InsaneBar { index: i });
            }
            if i > 0 && bar.time <= bars[i - 1].time {
                return Err(DataError::OutOfOrder { index: i });
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            bars,
            indicators,
        })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bar(&self, index: usize) -> &Bar {
        &self.bars[index]
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Windowed access: the bar plus its current and previous snapshots.
    pub fn window(&self, index: usize) -> BarWindow<'_> {
        BarWindow {
            index,
            bar: &self.bars[index],
            indicators: &self.indicators[index],
            previous: index.checked_sub(1).map(|p| &self.indicators[p]),
        }
    }

    /// Verify the series can supply `requested` bars.
    pub fn require(&self, requested: usize) -> Result<(), DataError> {
        if requested > self.bars.len() {
            return Err(DataError::Insufficient {
                requested,
                available: self.bars.len(),
            });
        }
        Ok(())
    }
}
