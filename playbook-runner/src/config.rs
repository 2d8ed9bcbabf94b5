//! TOML run configuration consumed by the CLI.
//!
//! Describes where the inputs live and how to execute: the playbook JSON,
//! the bar CSV, the indicator snapshot JSON, execution parameters, and
//! optional sweep / Monte Carlo sections.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use playbook_core::domain::Timeframe;
use playbook_core::sim::SimParams;

use crate::metrics::RankBy;
use crate::sweep::SweepAxis;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Top-level run configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub playbook: PathBuf,
    pub bars: PathBuf,
    /// Optional: omitted means the feed carries no indicator values.
    #[serde(default)]
    pub indicators: Option<PathBuf>,
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub sweep: Option<SweepSection>,
    #[serde(default)]
    pub monte_carlo: Option<MonteCarloSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub spread: f64,
    #[serde(default = "default_balance")]
    pub starting_balance: f64,
    #[serde(default)]
    pub bar_count: Option<usize>,
}

fn default_balance() -> f64 {
    10_000.0
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            spread: 0.0,
            starting_balance: default_balance(),
            bar_count: None,
        }
    }
}

impl ExecutionSection {
    pub fn to_sim_params(&self) -> SimParams {
        SimParams {
            spread: self.spread,
            starting_balance: self.starting_balance,
            bar_count: self.bar_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSection {
    pub axes: Vec<SweepAxis>,
    #[serde(default = "default_rank_by")]
    pub rank_by: RankBy,
}

fn default_rank_by() -> RankBy {
    RankBy::TotalPnl
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloSection {
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_iterations() -> usize {
    1_000
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}
