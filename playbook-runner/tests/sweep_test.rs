//! Sweep orchestration: completeness, failure isolation, ranking, and
//! cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use chrono::{Duration, NaiveDate};
use playbook_core::domain::{
    Action, Bar, CompareOp, ConditionTree, Direction, IndicatorSpec, Phase, Playbook, RiskLimits,
    Timeframe, Transition, VarKind, VarSpec,
};
use playbook_core::expr::Snapshot;
use playbook_core::feed::BarSeries;
use playbook_core::sim::SimParams;
use playbook_runner::metrics::RankBy;
use playbook_runner::sweep::{run_sweep, SweepAxis};

fn axis(path: &str, values: &[f64]) -> SweepAxis {
    SweepAxis {
        path: path.to_string(),
        values: values.to_vec(),
    }
}

/// Buy the RSI dip, hold to stop or target.
fn dip_playbook() -> Playbook {
    Playbook {
        id: "sweep-pb".into(),
        name: String::new(),
        initial_phase: "idle".into(),
        phases: vec![
            Phase {
                name: "idle".into(),
                evaluate_on: vec![Timeframe::H1],
                transitions: vec![Transition {
                    priority: 0,
                    to: "in_position".into(),
                    when: ConditionTree::leaf("ind.rsi.value", CompareOp::Lt, "var.threshold"),
                    actions: vec![Action::OpenTrade {
                        direction: Direction::Buy,
                        lot: "var.lot".into(),
                        sl: "_price - 10".into(),
                        tp: "_price + 20".into(),
                    }],
                }],
                timeout: None,
                management: vec![],
                on_trade_closed: None,
            },
            Phase {
                name: "in_position".into(),
                evaluate_on: vec![Timeframe::H1],
                transitions: vec![],
                timeout: None,
                management: vec![],
                on_trade_closed: Some("idle".into()),
            },
        ],
        indicators: vec![IndicatorSpec {
            id: "rsi".into(),
            kind: "rsi".into(),
            timeframe: Timeframe::H1,
            params: BTreeMap::new(),
        }],
        variables: BTreeMap::from([
            (
                "lot".to_string(),
                VarSpec {
                    kind: VarKind::Number,
                    default: 0.1,
                },
            ),
            (
                "threshold".to_string(),
                VarSpec {
                    kind: VarKind::Number,
                    default: 30.0,
                },
            ),
        ]),
        risk: RiskLimits::default(),
    }
}

fn winning_series() -> BarSeries {
    let start = NaiveDate::from_ymd_opt(2024, 2, 5)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let specs: [(f64, f64, f64, f64, f64); 4] = [
        (100.0, 101.0, 99.0, 100.0, 55.0),
        (100.0, 101.0, 98.0, 100.0, 25.0), // dip → entry at 100
        (100.0, 112.0, 99.5, 111.0, 50.0),
        (111.0, 121.0, 110.0, 118.0, 60.0), // tp 120
    ];
    let mut bars = Vec::new();
    let mut snapshots = Vec::new();
    for (i, &(open, high, low, close, rsi)) in specs.iter().enumerate() {
        bars.push(Bar {
            time: start + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 1.0,
        });
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), rsi);
        let mut snap = Snapshot::new();
        snap.insert("rsi".to_string(), fields);
        snapshots.push(snap);
    }
    BarSeries::new("EURUSD", Timeframe::H1, bars, snapshots).unwrap()
}

#[test]
fn sweep_produces_full_cartesian_product() {
    let axes = vec![
        axis("variables.lot.default", &[0.1, 0.2, 0.3]),
        axis("variables.threshold.default", &[20.0, 30.0]),
        axis("risk.max_lot", &[1.0, 2.0]),
    ];
    let report = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();

    // 3 × 2 × 2 = 12, every combination accounted for.
    assert_eq!(report.total_combinations, 12);
    assert_eq!(report.ranked.len() + report.failures.len(), 12);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);

    // Each entry is traceable to its exact parameter values.
    for entry in &report.ranked {
        assert_eq!(entry.params.len(), 3);
        assert!(entry.params.contains_key("variables.lot.default"));
    }
}

#[test]
fn sweep_ranks_descending() {
    // Larger lots make proportionally larger profits on the winning series.
    let axes = vec![axis("variables.lot.default", &[0.1, 0.3, 0.2])];
    let report = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();

    assert_eq!(report.ranked.len(), 3);
    let pnls: Vec<f64> = report.ranked.iter().map(|e| e.metrics.total_pnl).collect();
    assert!(pnls[0] >= pnls[1] && pnls[1] >= pnls[2]);
    assert_eq!(report.ranked[0].params["variables.lot.default"], 0.3);
}

#[test]
fn bad_combination_does_not_abort_batch() {
    // Second axis addresses a variable that does not exist: every
    // combination touching it fails, the others complete.
    let axes = vec![
        axis("variables.lot.default", &[0.1, 0.2]),
        axis("variables.ghost.default", &[1.0]),
    ];
    let report = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();

    assert_eq!(report.total_combinations, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report.ranked.is_empty());
    for failure in &report.failures {
        assert!(failure.error.contains("ghost"));
    }
}

#[test]
fn risk_blocked_combination_still_completes() {
    // Lot 5.0 exceeds max_lot, so that combination's entries are all
    // risk-skipped — it completes with zero trades rather than failing.
    let axes = vec![axis("variables.lot.default", &[0.1, 5.0])];
    let report = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();

    assert_eq!(report.ranked.len(), 2);
    // The oversized lot was risk-skipped: zero trades for it.
    let by_lot: BTreeMap<String, usize> = report
        .ranked
        .iter()
        .map(|e| {
            (
                format!("{}", e.params["variables.lot.default"]),
                e.trade_count,
            )
        })
        .collect();
    assert_eq!(by_lot["0.1"], 1);
    assert_eq!(by_lot["5"], 0);
}

#[test]
fn cancelled_sweep_preserves_partial_results() {
    let cancel = AtomicBool::new(true);
    let axes = vec![axis("variables.lot.default", &[0.1, 0.2, 0.3])];
    let report = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        Some(&cancel),
    )
    .unwrap();

    // Pre-set flag: nothing ran, and that is reported, not an error.
    assert!(report.cancelled);
    assert!(report.ranked.is_empty());
    assert_eq!(report.total_combinations, 3);
}

#[test]
fn sweep_is_deterministic_across_runs() {
    let axes = vec![
        axis("variables.lot.default", &[0.1, 0.2]),
        axis("variables.threshold.default", &[20.0, 30.0]),
    ];
    let a = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();
    let b = run_sweep(
        &dip_playbook(),
        &winning_series(),
        &SimParams::default(),
        &axes,
        RankBy::TotalPnl,
        None,
    )
    .unwrap();

    let a_json = serde_json::to_string(&a.ranked).unwrap();
    let b_json = serde_json::to_string(&b.ranked).unwrap();
    assert_eq!(a_json, b_json);
}
