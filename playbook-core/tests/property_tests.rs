//! Generative tests: tie-break consistency, parser robustness, and
//! document round-trips.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use proptest::prelude::*;

use playbook_core::domain::{Bar, Direction, ExitReason, OpenPosition};
use playbook_core::expr::parse;
use playbook_core::sim::detect_exit;

fn position(direction: Direction, sl: f64, tp: f64) -> OpenPosition {
    OpenPosition {
        ticket: 1,
        direction,
        entry_bar: 0,
        entry_time: NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        entry_price: (sl + tp) / 2.0,
        lot: 1.0,
        sl: Some(sl),
        tp: Some(tp),
        initial_sl: Some(sl),
        entry_phase: "p".into(),
        trail_anchor: None,
        realized_partial: 0.0,
        entry_snapshot: BTreeMap::new(),
        events: Vec::new(),
    }
}

fn bar(low: f64, high: f64) -> Bar {
    Bar {
        time: NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        open: (low + high) / 2.0,
        high,
        low,
        close: (low + high) / 2.0,
        volume: 1.0,
    }
}

proptest! {
    /// Every bar constructed to cross both the stop and the target exits
    /// at the stop, for both directions.
    #[test]
    fn ambiguous_bars_always_exit_at_stop(
        sl_offset in 1.0_f64..50.0,
        tp_offset in 1.0_f64..50.0,
        overshoot in 0.1_f64..20.0,
    ) {
        let entry = 1000.0;

        // Long: stop below entry, target above; the bar spans both.
        let long = position(Direction::Buy, entry - sl_offset, entry + tp_offset);
        let wide = bar(entry - sl_offset - overshoot, entry + tp_offset + overshoot);
        let (reason, level) = detect_exit(&long, &wide).unwrap();
        prop_assert_eq!(reason, ExitReason::Sl);
        prop_assert!((level - (entry - sl_offset)).abs() < 1e-9);

        // Short: stop above entry, target below.
        let short = position(Direction::Sell, entry + sl_offset, entry - tp_offset);
        let wide = bar(entry - tp_offset - overshoot, entry + sl_offset + overshoot);
        let (reason, level) = detect_exit(&short, &wide).unwrap();
        prop_assert_eq!(reason, ExitReason::Sl);
        prop_assert!((level - (entry + sl_offset)).abs() < 1e-9);
    }

    /// A bar that touches neither level never exits.
    #[test]
    fn inside_bars_never_exit(
        sl_offset in 2.0_f64..50.0,
        tp_offset in 2.0_f64..50.0,
    ) {
        let entry = 1000.0;
        let long = position(Direction::Buy, entry - sl_offset, entry + tp_offset);
        let inside = bar(entry - sl_offset + 1.0, entry + tp_offset - 1.0);
        prop_assert!(detect_exit(&long, &inside).is_none());
    }

    /// The parser rejects or accepts arbitrary input without panicking.
    #[test]
    fn parser_never_panics(input in ".{0,64}") {
        let _ = parse(&input);
    }

    /// Well-formed arithmetic over literals always parses.
    #[test]
    fn literal_arithmetic_parses(a in -1e6_f64..1e6, b in -1e6_f64..1e6) {
        let source = format!("({a:.4}) + ({b:.4}) * 2");
        prop_assert!(parse(&source).is_ok());
    }
}

#[test]
fn playbook_document_roundtrip() {
    // Serialize → deserialize → serialize is stable.
    let json = r##"{
        "id": "pb-roundtrip",
        "name": "roundtrip",
        "initial_phase": "idle",
        "phases": [
            {
                "name": "idle",
                "evaluate_on": ["H1"],
                "transitions": [
                    {
                        "priority": 0,
                        "to": "idle",
                        "when": {
                            "type": "all",
                            "children": [
                                { "type": "leaf", "left": "ind.rsi.value", "op": "<", "right": "30" }
                            ]
                        },
                        "actions": [
                            { "type": "open_trade", "direction": "buy", "lot": "0.1", "sl": "_price - 10", "tp": "_price + 20" },
                            { "type": "log", "message": "entered" }
                        ]
                    }
                ],
                "timeout": { "bars": 12, "timeframe": "H1", "to": "idle" },
                "management": [
                    {
                        "name": "breakeven",
                        "once": true,
                        "when": { "type": "leaf", "left": "trade.profit_points", "op": ">=", "right": "10" },
                        "action": { "type": "modify_sl", "to": "trade.entry_price" }
                    }
                ],
                "on_trade_closed": "idle"
            }
        ],
        "indicators": [
            { "id": "rsi", "kind": "rsi", "timeframe": "H1", "params": { "period": 14.0 } }
        ],
        "variables": {
            "lot": { "kind": "number", "default": 0.1 }
        },
        "risk": {
            "max_lot": 1.0,
            "max_daily_trades": 5,
            "max_drawdown_pct": 20.0,
            "max_concurrent_positions": 1
        }
    }"##;

    let pb: playbook_core::domain::Playbook = serde_json::from_str(json).unwrap();
    let out = serde_json::to_string(&pb).unwrap();
    let pb2: playbook_core::domain::Playbook = serde_json::from_str(&out).unwrap();
    assert_eq!(serde_json::to_string(&pb2).unwrap(), out);
    assert!(playbook_core::engine::validate(&pb).is_ok());
}
