//! Performance metrics — pure functions over trades and the equity curve.
//!
//! Every ratio guards divide-by-zero with a documented sentinel so
//! degenerate inputs (zero trades, all winners, zero variance) never
//! produce NaN or infinity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use playbook_core::domain::{Timeframe, Trade};

/// Profit factor sentinel when gross loss is zero but profit is positive.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Aggregate statistics for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub trade_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub breakeven_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Mean P&L per trade.
    pub expectancy: f64,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub cagr: f64,
    pub calmar: f64,
    pub max_drawdown_pct: f64,
    pub ulcer_index: f64,
    pub recovery_factor: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub longest_win_streak: usize,
    pub longest_win_streak_pnl: f64,
    pub longest_loss_streak: usize,
    pub longest_loss_streak_pnl: f64,
    /// Realized P&L bucketed by trade close month (`YYYY-MM`).
    pub monthly_pnl: BTreeMap<String, f64>,
}

impl Metrics {
    /// Compute all metrics from a completed run.
    ///
    /// `bar_count` and `timeframe` anchor annualization: years spanned =
    /// bars ÷ periods-per-year, and per-trade ratios scale by
    /// `sqrt(trades_per_year)`.
    pub fn compute(
        trades: &[Trade],
        equity: &[f64],
        drawdown: &[f64],
        starting_balance: f64,
        bar_count: usize,
        timeframe: Timeframe,
    ) -> Self {
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let returns: Vec<f64> = if starting_balance > 0.0 {
            pnls.iter().map(|p| p / starting_balance).collect()
        } else {
            Vec::new()
        };

        let win_count = trades.iter().filter(|t| t.pnl > 0.0).count();
        let loss_count = trades.iter().filter(|t| t.pnl < 0.0).count();
        let breakeven_count = trades.len() - win_count - loss_count;

        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
        let total_pnl: f64 = pnls.iter().sum();

        let years = years_spanned(bar_count, timeframe);
        let max_dd_pct = drawdown.iter().copied().fold(0.0, f64::max);
        let cagr = cagr(equity, years);

        let (win_streak, win_streak_pnl) = longest_streak(trades, true);
        let (loss_streak, loss_streak_pnl) = longest_streak(trades, false);

        Self {
            trade_count: trades.len(),
            win_count,
            loss_count,
            breakeven_count,
            win_rate: ratio(win_count as f64, trades.len() as f64),
            profit_factor: profit_factor(gross_profit, gross_loss),
            expectancy: ratio(total_pnl, trades.len() as f64),
            total_pnl,
            gross_profit,
            gross_loss,
            avg_win: ratio(gross_profit, win_count as f64),
            avg_loss: ratio(-gross_loss, loss_count as f64),
            largest_win: pnls.iter().copied().fold(0.0, f64::max),
            largest_loss: pnls.iter().copied().fold(0.0, f64::min),
            sharpe: sharpe(&returns, trades.len(), years),
            sortino: sortino(&returns, trades.len(), years),
            cagr,
            calmar: calmar(cagr, max_dd_pct),
            max_drawdown_pct: max_dd_pct,
            ulcer_index: ulcer_index(drawdown),
            recovery_factor: recovery_factor(total_pnl, equity),
            skewness: skewness(&pnls),
            kurtosis: kurtosis(&pnls),
            longest_win_streak: win_streak,
            longest_win_streak_pnl: win_streak_pnl,
            longest_loss_streak: loss_streak,
            longest_loss_streak_pnl: loss_streak_pnl,
            monthly_pnl: monthly_pnl(trades),
        }
    }

    /// Look a metric up by its ranking key.
    pub fn value(&self, key: RankBy) -> f64 {
        match key {
            RankBy::TotalPnl => self.total_pnl,
            RankBy::ProfitFactor => self.profit_factor,
            RankBy::WinRate => self.win_rate,
            RankBy::Expectancy => self.expectancy,
            RankBy::Sharpe => self.sharpe,
            RankBy::Sortino => self.sortino,
            RankBy::Calmar => self.calmar,
        }
    }
}

/// Metric a sweep ranks its combinations by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    TotalPnl,
    ProfitFactor,
    WinRate,
    Expectancy,
    Sharpe,
    Sortino,
    Calmar,
}

impl std::str::FromStr for RankBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total_pnl" => Ok(RankBy::TotalPnl),
            "profit_factor" => Ok(RankBy::ProfitFactor),
            "win_rate" => Ok(RankBy::WinRate),
            "expectancy" => Ok(RankBy::Expectancy),
            "sharpe" => Ok(RankBy::Sharpe),
            "sortino" => Ok(RankBy::Sortino),
            "calmar" => Ok(RankBy::Calmar),
            other => Err(format!("unknown ranking metric '{other}'")),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// 0.0 when the denominator is zero.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Gross profit ÷ gross loss; 0 when both are zero, capped sentinel when
/// only the loss is zero.
pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };
    }
    (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
}

fn years_spanned(bar_count: usize, timeframe: Timeframe) -> f64 {
    bar_count as f64 / timeframe.periods_per_year()
}

/// Annualized Sharpe over per-trade returns. 0.0 for fewer than two trades,
/// zero variance, or a zero-length run.
fn sharpe(returns: &[f64], trade_count: usize, years: f64) -> f64 {
    if returns.len() < 2 || years <= 0.0 {
        return 0.0;
    }
    let mean = mean(returns);
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    let trades_per_year = trade_count as f64 / years;
    (mean / std) * trades_per_year.sqrt()
}

/// Annualized Sortino: downside deviation only. 0.0 when there is no
/// downside (the ratio is undefined, not infinite).
fn sortino(returns: &[f64], trade_count: usize, years: f64) -> f64 {
    if returns.len() < 2 || years <= 0.0 {
        return 0.0;
    }
    let mean = mean(returns);
    let downside_sq: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    if downside_sq.is_empty() {
        return 0.0;
    }
    let downside_std = (downside_sq.iter().sum::<f64>() / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    let trades_per_year = trade_count as f64 / years;
    (mean / downside_std) * trades_per_year.sqrt()
}

/// Compound annual growth rate of the equity curve.
fn cagr(equity: &[f64], years: f64) -> f64 {
    if equity.len() < 2 || years <= 0.0 {
        return 0.0;
    }
    let initial = equity[0];
    let final_eq = *equity.last().unwrap();
    if initial <= 0.0 || final_eq <= 0.0 {
        return 0.0;
    }
    (final_eq / initial).powf(1.0 / years) - 1.0
}

/// CAGR ÷ max drawdown fraction. 0.0 when there was no drawdown.
fn calmar(cagr: f64, max_drawdown_pct: f64) -> f64 {
    if max_drawdown_pct <= 0.0 {
        return 0.0;
    }
    cagr / (max_drawdown_pct / 100.0)
}

/// Root-mean-square of the drawdown series (percent values).
fn ulcer_index(drawdown: &[f64]) -> f64 {
    if drawdown.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = drawdown.iter().map(|d| d * d).sum();
    (sum_sq / drawdown.len() as f64).sqrt()
}

/// Net profit ÷ max drawdown in currency. 0.0 when equity never drew down.
fn recovery_factor(total_pnl: f64, equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd_abs = 0.0_f64;
    for &e in equity {
        if e > peak {
            peak = e;
        }
        max_dd_abs = max_dd_abs.max(peak - e);
    }
    if max_dd_abs < 1e-10 {
        return 0.0;
    }
    total_pnl / max_dd_abs
}

/// Fisher skewness of the P&L distribution; 0.0 below three samples or at
/// zero variance.
fn skewness(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let m = mean(values);
    let std = std_dev(values);
    if std < 1e-15 {
        return 0.0;
    }
    let n_f = n as f64;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n_f;
    m3 / std.powi(3)
}

/// Excess kurtosis; 0.0 below four samples or at zero variance.
fn kurtosis(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return 0.0;
    }
    let m = mean(values);
    let std = std_dev(values);
    if std < 1e-15 {
        return 0.0;
    }
    let n_f = n as f64;
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n_f;
    m4 / std.powi(4) - 3.0
}

/// Longest run of winners (or losers) and the total P&L over it.
fn longest_streak(trades: &[Trade], winners: bool) -> (usize, f64) {
    let mut best_len = 0;
    let mut best_pnl = 0.0;
    let mut len = 0;
    let mut pnl = 0.0;
    for trade in trades {
        let qualifies = if winners {
            trade.pnl > 0.0
        } else {
            trade.pnl < 0.0
        };
        if qualifies {
            len += 1;
            pnl += trade.pnl;
            if len > best_len {
                best_len = len;
                best_pnl = pnl;
            }
        } else {
            len = 0;
            pnl = 0.0;
        }
    }
    (best_len, best_pnl)
}

/// P&L bucketed by close month.
fn monthly_pnl(trades: &[Trade]) -> BTreeMap<String, f64> {
    let mut buckets = BTreeMap::new();
    for trade in trades {
        let key = trade.close_time.format("%Y-%m").to_string();
        *buckets.entry(key).or_insert(0.0) += trade.pnl;
    }
    buckets
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use playbook_core::domain::{classify_outcome, Direction, ExitReason};
    use std::collections::BTreeMap as Map;

    fn make_trade(pnl: f64, month: u32) -> Trade {
        let t = NaiveDate::from_ymd_opt(2024, month, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        Trade {
            ticket: 1,
            direction: Direction::Buy,
            open_bar: 0,
            open_time: t,
            open_price: 100.0,
            close_bar: 5,
            close_time: t,
            close_price: 100.0 + pnl,
            sl: None,
            tp: None,
            lot: 1.0,
            pnl,
            pnl_points: pnl,
            rr_achieved: 0.0,
            outcome: classify_outcome(pnl),
            exit_reason: ExitReason::Manual,
            entry_phase: "p".into(),
            entry_snapshot: Map::new(),
            events: Vec::new(),
        }
    }

    fn compute(trades: &[Trade], equity: &[f64], drawdown: &[f64]) -> Metrics {
        Metrics::compute(trades, equity, drawdown, 10_000.0, 252, Timeframe::D1)
    }

    // ─── Profit factor guards ────────────────────────────────────

    #[test]
    fn profit_factor_mixed() {
        let trades = vec![make_trade(500.0, 1), make_trade(-200.0, 2), make_trade(300.0, 3)];
        let m = compute(&trades, &[10_000.0, 10_600.0], &[0.0, 0.0]);
        assert!((m.profit_factor - 4.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_all_winners_capped() {
        let trades = vec![make_trade(500.0, 1), make_trade(300.0, 2)];
        let m = compute(&trades, &[10_000.0, 10_800.0], &[0.0, 0.0]);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_CAP);
    }

    #[test]
    fn profit_factor_no_trades_zero() {
        let m = compute(&[], &[10_000.0], &[0.0]);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.trade_count, 0);
    }

    // ─── Degenerate inputs stay finite ───────────────────────────

    #[test]
    fn zero_trades_all_finite() {
        let m = compute(&[], &[10_000.0], &[0.0]);
        assert!(m.sharpe.is_finite());
        assert!(m.sortino.is_finite());
        assert!(m.calmar.is_finite());
        assert!(m.expectancy.is_finite());
        assert!(m.skewness.is_finite());
        assert!(m.kurtosis.is_finite());
        assert_eq!(m.win_rate, 0.0);
    }

    #[test]
    fn zero_variance_sharpe_is_zero() {
        let trades = vec![make_trade(100.0, 1), make_trade(100.0, 2), make_trade(100.0, 3)];
        let m = compute(&trades, &[10_000.0, 10_300.0], &[0.0, 0.0]);
        assert_eq!(m.sharpe, 0.0);
    }

    #[test]
    fn all_winning_trades_sortino_zero_not_infinite() {
        let trades = vec![make_trade(100.0, 1), make_trade(200.0, 2)];
        let m = compute(&trades, &[10_000.0, 10_300.0], &[0.0, 0.0]);
        assert_eq!(m.sortino, 0.0);
        assert!(m.sortino.is_finite());
    }

    // ─── Win rate and expectancy ─────────────────────────────────

    #[test]
    fn win_rate_and_expectancy() {
        let trades = vec![
            make_trade(100.0, 1),
            make_trade(-50.0, 1),
            make_trade(100.0, 2),
            make_trade(-50.0, 2),
        ];
        let m = compute(&trades, &[10_000.0, 10_100.0], &[0.0, 0.0]);
        assert!((m.win_rate - 0.5).abs() < 1e-10);
        assert!((m.expectancy - 25.0).abs() < 1e-10);
        assert!((m.avg_win - 100.0).abs() < 1e-10);
        assert!((m.avg_loss + 50.0).abs() < 1e-10);
        assert_eq!(m.largest_win, 100.0);
        assert_eq!(m.largest_loss, -50.0);
    }

    // ─── Streaks ─────────────────────────────────────────────────

    #[test]
    fn streaks_with_pnl() {
        let trades = vec![
            make_trade(10.0, 1),
            make_trade(20.0, 1),
            make_trade(30.0, 1),
            make_trade(-5.0, 2),
            make_trade(-5.0, 2),
            make_trade(40.0, 3),
        ];
        let m = compute(&trades, &[10_000.0, 10_090.0], &[0.0, 0.0]);
        assert_eq!(m.longest_win_streak, 3);
        assert!((m.longest_win_streak_pnl - 60.0).abs() < 1e-10);
        assert_eq!(m.longest_loss_streak, 2);
        assert!((m.longest_loss_streak_pnl + 10.0).abs() < 1e-10);
    }

    // ─── Monthly buckets ─────────────────────────────────────────

    #[test]
    fn monthly_buckets_sum_by_close_month() {
        let trades = vec![make_trade(10.0, 1), make_trade(15.0, 1), make_trade(-5.0, 2)];
        let m = compute(&trades, &[10_000.0, 10_020.0], &[0.0, 0.0]);
        assert_eq!(m.monthly_pnl.len(), 2);
        assert!((m.monthly_pnl["2024-01"] - 25.0).abs() < 1e-10);
        assert!((m.monthly_pnl["2024-02"] + 5.0).abs() < 1e-10);
    }

    // ─── Drawdown-derived metrics ────────────────────────────────

    #[test]
    fn ulcer_index_of_flat_drawdown_is_zero() {
        let m = compute(&[], &[10_000.0, 10_000.0], &[0.0, 0.0]);
        assert_eq!(m.ulcer_index, 0.0);
    }

    #[test]
    fn ulcer_index_known_value() {
        let dd = vec![0.0, 3.0, 4.0];
        let m = compute(&[], &[10_000.0, 9_700.0, 9_600.0], &dd);
        let expected = ((9.0 + 16.0) / 3.0_f64).sqrt();
        assert!((m.ulcer_index - expected).abs() < 1e-10);
    }

    #[test]
    fn recovery_factor_guarded() {
        // No drawdown → 0, not infinity.
        let m = compute(&[make_trade(100.0, 1)], &[10_000.0, 10_100.0], &[0.0, 0.0]);
        assert_eq!(m.recovery_factor, 0.0);

        let trades = vec![make_trade(-200.0, 1), make_trade(500.0, 2)];
        let m = compute(&trades, &[10_000.0, 9_800.0, 10_300.0], &[0.0, 2.0, 0.0]);
        assert!((m.recovery_factor - 300.0 / 200.0).abs() < 1e-10);
    }

    #[test]
    fn calmar_no_drawdown_is_zero() {
        let m = compute(&[], &[10_000.0, 11_000.0], &[0.0, 0.0]);
        assert_eq!(m.calmar, 0.0);
    }

    // ─── Distribution shape ──────────────────────────────────────

    #[test]
    fn skewness_of_symmetric_distribution_near_zero() {
        let trades = vec![
            make_trade(-10.0, 1),
            make_trade(0.0, 1),
            make_trade(10.0, 1),
        ];
        let m = compute(&trades, &[10_000.0, 10_000.0], &[0.0, 0.0]);
        assert!(m.skewness.abs() < 1e-10);
    }

    #[test]
    fn ranking_lookup_matches_fields() {
        let trades = vec![make_trade(100.0, 1), make_trade(-50.0, 2)];
        let m = compute(&trades, &[10_000.0, 10_050.0], &[0.0, 0.0]);
        assert_eq!(m.value(RankBy::TotalPnl), m.total_pnl);
        assert_eq!(m.value(RankBy::ProfitFactor), m.profit_factor);
        assert_eq!(m.value(RankBy::WinRate), m.win_rate);
    }
}
