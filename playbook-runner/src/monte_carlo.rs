//! Monte Carlo risk distribution — with-replacement resampling of a run's
//! trade P&L sequence.
//!
//! Sub-seeds are derived per iteration by BLAKE3 hashing, independently of
//! thread scheduling order, so the same master seed produces identical
//! results regardless of how rayon distributes the work.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for one Monte Carlo batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of resampled orderings.
    pub iterations: usize,
    /// Master RNG seed.
    pub seed: u64,
    /// Drawdown thresholds (percent) for probability-of-ruin.
    pub ruin_thresholds: Vec<f64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            seed: 42,
            ruin_thresholds: vec![10.0, 20.0, 30.0, 50.0],
        }
    }
}

/// 5th/50th/95th percentile band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bands {
    pub p05: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Fraction of iterations whose max drawdown exceeded a threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuinPoint {
    pub threshold_pct: f64,
    pub probability: f64,
}

/// Result of a Monte Carlo batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub iterations_requested: usize,
    /// May be lower than requested after cooperative cancellation.
    pub iterations_run: usize,
    pub cancelled: bool,
    pub pnl: Bands,
    pub drawdown_pct: Bands,
    pub ruin: Vec<RuinPoint>,
}

/// Resample the trade P&L sequence with replacement and report percentile
/// bands for total P&L and max drawdown, plus ruin probabilities.
///
/// `cancel` is checked between iterations (never mid-iteration); partial
/// results already computed are preserved and reported.
pub fn run_monte_carlo(
    trade_pnls: &[f64],
    starting_balance: f64,
    config: &MonteCarloConfig,
    cancel: Option<&AtomicBool>,
) -> MonteCarloReport {
    if trade_pnls.is_empty() || config.iterations == 0 {
        return MonteCarloReport {
            iterations_requested: config.iterations,
            iterations_run: 0,
            cancelled: false,
            pnl: Bands {
                p05: 0.0,
                p50: 0.0,
                p95: 0.0,
            },
            drawdown_pct: Bands {
                p05: 0.0,
                p50: 0.0,
                p95: 0.0,
            },
            ruin: config
                .ruin_thresholds
                .iter()
                .map(|&threshold_pct| RuinPoint {
                    threshold_pct,
                    probability: 0.0,
                })
                .collect(),
        };
    }

    let outcomes: Vec<(f64, f64)> = (0..config.iterations)
        .into_par_iter()
        .filter_map(|iteration| {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return None;
                }
            }
            let mut rng = StdRng::seed_from_u64(sub_seed(config.seed, iteration as u64));
            Some(resample_once(trade_pnls, starting_balance, &mut rng))
        })
        .collect();

    let cancelled = outcomes.len() < config.iterations;
    let mut pnls: Vec<f64> = outcomes.iter().map(|o| o.0).collect();
    let mut drawdowns: Vec<f64> = outcomes.iter().map(|o| o.1).collect();
    pnls.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    drawdowns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let ruin = config
        .ruin_thresholds
        .iter()
        .map(|&threshold_pct| {
            let exceeded = drawdowns.iter().filter(|d| **d > threshold_pct).count();
            RuinPoint {
                threshold_pct,
                probability: if drawdowns.is_empty() {
                    0.0
                } else {
                    exceeded as f64 / drawdowns.len() as f64
                },
            }
        })
        .collect();

    MonteCarloReport {
        iterations_requested: config.iterations,
        iterations_run: outcomes.len(),
        cancelled,
        pnl: bands(&pnls),
        drawdown_pct: bands(&drawdowns),
        ruin,
    }
}

/// Order-independent sub-seed for one iteration.
fn sub_seed(master: u64, iteration: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&master.to_le_bytes());
    hasher.update(&iteration.to_le_bytes());
    let hash = hasher.finalize();
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("hash is 32 bytes"))
}

/// One resampled ordering: total P&L and max drawdown percent.
fn resample_once(pnls: &[f64], starting_balance: f64, rng: &mut StdRng) -> (f64, f64) {
    let n = pnls.len();
    let mut balance = starting_balance;
    let mut peak = starting_balance;
    let mut max_dd_pct = 0.0_f64;
    let mut total = 0.0;

    for _ in 0..n {
        let pick = pnls[rng.gen_range(0..n)];
        total += pick;
        balance += pick;
        if balance > peak {
            peak = balance;
        }
        if peak > 0.0 {
            let dd = (peak - balance) / peak * 100.0;
            if dd > max_dd_pct {
                max_dd_pct = dd;
            }
        }
    }
    (total, max_dd_pct)
}

/// Percentiles of a sorted slice with linear interpolation.
fn bands(sorted: &[f64]) -> Bands {
    Bands {
        p05: percentile_sorted(sorted, 5.0),
        p50: percentile_sorted(sorted, 50.0),
        p95: percentile_sorted(sorted, 95.0),
    }
}

pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}
