//! Playbook CLI — run a backtest, sweep a parameter grid, or build a
//! Monte Carlo risk distribution.
//!
//! Commands:
//! - `run` — execute one backtest and write result artifacts
//! - `sweep` — cartesian parameter sweep, ranked by a chosen metric
//! - `montecarlo` — resample a run's trade P&L into risk bands

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use playbook_core::domain::Timeframe;
use playbook_core::sim::SimParams;
use playbook_runner::config::RunConfig;
use playbook_runner::data_loader::{load_playbook, load_series};
use playbook_runner::export::save_run;
use playbook_runner::metrics::RankBy;
use playbook_runner::monte_carlo::{run_monte_carlo, MonteCarloConfig};
use playbook_runner::run::execute_run;
use playbook_runner::sweep::{run_sweep, SweepAxis};

#[derive(Parser)]
#[command(name = "playbook", about = "Playbook backtest engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Playbook document (JSON).
    #[arg(long)]
    playbook: PathBuf,

    /// Bar history CSV: time,open,high,low,close,volume.
    #[arg(long)]
    bars: PathBuf,

    /// Per-bar indicator snapshots (JSON array).
    #[arg(long)]
    indicators: Option<PathBuf>,

    /// Symbol the bars belong to.
    #[arg(long)]
    symbol: String,

    /// Bar timeframe (M1..W1).
    #[arg(long, default_value = "H1")]
    timeframe: String,

    /// Full bid/ask spread in price increments.
    #[arg(long, default_value_t = 0.0)]
    spread: f64,

    /// Starting account balance.
    #[arg(long, default_value_t = 10_000.0)]
    balance: f64,

    /// Bars to replay (defaults to the whole series).
    #[arg(long)]
    bar_count: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one backtest and write result artifacts.
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory for result JSON and trade CSV.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Cartesian parameter sweep over dotted playbook paths.
    Sweep {
        #[command(flatten)]
        input: InputArgs,

        /// Axis as `path=v1,v2,...` (repeatable), e.g.
        /// `--axis variables.lot.default=0.1,0.2`.
        #[arg(long = "axis")]
        axes: Vec<String>,

        /// Metric to rank by: total_pnl, profit_factor, win_rate,
        /// expectancy, sharpe, sortino, calmar.
        #[arg(long, default_value = "total_pnl")]
        rank_by: String,

        /// Show only the top N combinations.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Monte Carlo resampling of a backtest's trade P&L.
    Montecarlo {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, default_value_t = 1_000)]
        iterations: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run from a TOML config file instead of flags.
    Config {
        /// Path to a run configuration TOML.
        #[arg(long)]
        file: PathBuf,

        /// Output directory for result artifacts.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { input, out } => cmd_run(&input, &out),
        Commands::Sweep {
            input,
            axes,
            rank_by,
            top,
        } => cmd_sweep(&input, &axes, &rank_by, top),
        Commands::Montecarlo {
            input,
            iterations,
            seed,
        } => cmd_montecarlo(&input, iterations, seed),
        Commands::Config { file, out } => cmd_config(&file, &out),
    }
}

fn parse_timeframe(raw: &str) -> Result<Timeframe> {
    serde_json::from_value(serde_json::Value::String(raw.to_uppercase()))
        .with_context(|| format!("unknown timeframe '{raw}'"))
}

fn load_inputs(
    input: &InputArgs,
) -> Result<(
    playbook_core::domain::Playbook,
    playbook_core::feed::BarSeries,
    SimParams,
)> {
    let timeframe = parse_timeframe(&input.timeframe)?;
    let playbook = load_playbook(&input.playbook)
        .with_context(|| format!("loading playbook {}", input.playbook.display()))?;
    let series = load_series(
        &input.symbol,
        timeframe,
        &input.bars,
        input.indicators.as_deref(),
    )
    .with_context(|| format!("loading bars {}", input.bars.display()))?;
    let params = SimParams {
        spread: input.spread,
        starting_balance: input.balance,
        bar_count: input.bar_count,
    };
    Ok((playbook, series, params))
}

fn cmd_run(input: &InputArgs, out: &PathBuf) -> Result<()> {
    let (playbook, series, params) = load_inputs(input)?;
    let run = execute_run(&playbook, &series, &params);

    if let Some(error) = &run.error {
        bail!("backtest failed: {error}");
    }
    let path = save_run(&run, out)?;
    let metrics = run.metrics.as_ref().expect("complete run has metrics");
    println!("run {} complete", run.id);
    println!(
        "  trades: {}  win rate: {:.1}%  profit factor: {:.2}",
        metrics.trade_count,
        metrics.win_rate * 100.0,
        metrics.profit_factor
    );
    println!(
        "  net pnl: {:.2}  max drawdown: {:.2}%  sharpe: {:.2}",
        metrics.total_pnl, metrics.max_drawdown_pct, metrics.sharpe
    );
    println!("  artifacts: {}", path.display());
    Ok(())
}

fn cmd_sweep(input: &InputArgs, raw_axes: &[String], rank_by: &str, top: usize) -> Result<()> {
    if raw_axes.is_empty() {
        bail!("at least one --axis is required");
    }
    let axes = raw_axes
        .iter()
        .map(|raw| parse_axis(raw))
        .collect::<Result<Vec<_>>>()?;
    let rank_by: RankBy = rank_by.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let (playbook, series, params) = load_inputs(input)?;
    let report = run_sweep(&playbook, &series, &params, &axes, rank_by, None)
        .context("sweep failed to start")?;

    println!(
        "sweep complete: {} combination(s), {} failed",
        report.total_combinations,
        report.failures.len()
    );
    for (i, entry) in report.ranked.iter().take(top).enumerate() {
        let value = entry.metrics.value(rank_by);
        println!("  #{:<2} {value:>12.4}  {:?}", i + 1, entry.params);
    }
    for failure in &report.failures {
        tracing::warn!(params = ?failure.params, error = %failure.error, "combination failed");
    }
    Ok(())
}

fn cmd_montecarlo(input: &InputArgs, iterations: usize, seed: u64) -> Result<()> {
    let (playbook, series, params) = load_inputs(input)?;
    let run = execute_run(&playbook, &series, &params);
    if let Some(error) = &run.error {
        bail!("backtest failed: {error}");
    }

    let pnls: Vec<f64> = run.trades.iter().map(|t| t.pnl).collect();
    let config = MonteCarloConfig {
        iterations,
        seed,
        ..MonteCarloConfig::default()
    };
    let report = run_monte_carlo(&pnls, params.starting_balance, &config, None);

    println!(
        "monte carlo: {} iteration(s) over {} trade(s)",
        report.iterations_run,
        pnls.len()
    );
    println!(
        "  pnl       p05 {:>10.2}  p50 {:>10.2}  p95 {:>10.2}",
        report.pnl.p05, report.pnl.p50, report.pnl.p95
    );
    println!(
        "  drawdown  p05 {:>9.2}%  p50 {:>9.2}%  p95 {:>9.2}%",
        report.drawdown_pct.p05, report.drawdown_pct.p50, report.drawdown_pct.p95
    );
    for point in &report.ruin {
        println!(
            "  P(drawdown > {:>4.1}%) = {:.3}",
            point.threshold_pct, point.probability
        );
    }
    Ok(())
}

fn cmd_config(file: &PathBuf, out: &PathBuf) -> Result<()> {
    let config = RunConfig::from_file(file)
        .with_context(|| format!("loading config {}", file.display()))?;
    let playbook = load_playbook(&config.playbook)?;
    let series = load_series(
        &config.symbol,
        config.timeframe,
        &config.bars,
        config.indicators.as_deref(),
    )?;
    let params = config.execution.to_sim_params();

    if let Some(sweep) = &config.sweep {
        let report = run_sweep(&playbook, &series, &params, &sweep.axes, sweep.rank_by, None)?;
        println!(
            "sweep complete: {} combination(s), {} failed",
            report.total_combinations,
            report.failures.len()
        );
        for (i, entry) in report.ranked.iter().take(10).enumerate() {
            println!(
                "  #{:<2} {:>12.4}  {:?}",
                i + 1,
                entry.metrics.value(sweep.rank_by),
                entry.params
            );
        }
        return Ok(());
    }

    let run = execute_run(&playbook, &series, &params);
    if let Some(error) = &run.error {
        bail!("backtest failed: {error}");
    }
    let path = save_run(&run, out)?;
    println!("run {} complete → {}", run.id, path.display());

    if let Some(mc) = &config.monte_carlo {
        let pnls: Vec<f64> = run.trades.iter().map(|t| t.pnl).collect();
        let report = run_monte_carlo(
            &pnls,
            params.starting_balance,
            &MonteCarloConfig {
                iterations: mc.iterations,
                seed: mc.seed,
                ..MonteCarloConfig::default()
            },
            None,
        );
        println!(
            "monte carlo p50 pnl {:.2}, p95 drawdown {:.2}%",
            report.pnl.p50, report.drawdown_pct.p95
        );
    }
    Ok(())
}

/// Parse `path=v1,v2,...` into a sweep axis.
fn parse_axis(raw: &str) -> Result<SweepAxis> {
    let (path, values) = raw
        .split_once('=')
        .with_context(|| format!("axis '{raw}' must look like path=v1,v2,..."))?;
    let values = values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("bad axis value '{v}' in '{raw}'"))
        })
        .collect::<Result<Vec<f64>>>()?;
    if values.is_empty() {
        bail!("axis '{raw}' has no values");
    }
    Ok(SweepAxis {
        path: path.trim().to_string(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_axis_spec() {
        let axis = parse_axis("variables.lot.default=0.1,0.2,0.3").unwrap();
        assert_eq!(axis.path, "variables.lot.default");
        assert_eq!(axis.values, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn rejects_malformed_axis() {
        assert!(parse_axis("no-equals-sign").is_err());
        assert!(parse_axis("risk.max_lot=abc").is_err());
    }

    #[test]
    fn parses_timeframe_case_insensitive() {
        assert_eq!(parse_timeframe("h1").unwrap(), Timeframe::H1);
        assert_eq!(parse_timeframe("M15").unwrap(), Timeframe::M15);
        assert!(parse_timeframe("H7").is_err());
    }
}
