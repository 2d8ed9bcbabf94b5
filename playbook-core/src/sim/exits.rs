//! Exit detection — does a bar's range cross the position's stop or target?

use crate::domain::bar::Bar;
use crate::domain::position::{Direction, OpenPosition};
use crate::domain::trade::ExitReason;

/// Check whether `bar`'s high/low range crosses the position's stop-loss or
/// take-profit, and at which level the exit fills.
///
/// When both levels are crossed within the same bar, the stop-loss wins:
/// OHLC data cannot reveal which level traded first, so the simulator
/// resolves to the conservative outcome for the position. This tie-break is
/// deliberate and must never vary between runs.
pub fn detect_exit(position: &OpenPosition, bar: &Bar) -> Option<(ExitReason, f64)> {
    match position.direction {
        Direction::Buy => {
            if let Some(sl) = position.sl {
                if bar.low <= sl {
                    return Some((ExitReason::Sl, sl));
                }
            }
            if let Some(tp) = position.tp {
                if bar.high >= tp {
                    return Some((ExitReason::Tp, tp));
                }
            }
        }
        Direction::Sell => {
            if let Some(sl) = position.sl {
                if bar.high >= sl {
                    return Some((ExitReason::Sl, sl));
                }
            }
            if let Some(tp) = position.tp {
                if bar.low <= tp {
                    return Some((ExitReason::Tp, tp));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

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

    fn position(direction: Direction, sl: Option<f64>, tp: Option<f64>) -> OpenPosition {
        OpenPosition {
            ticket: 1,
            direction,
            entry_bar: 0,
            entry_time: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            entry_price: 100.0,
            lot: 1.0,
            sl,
            tp,
            initial_sl: sl,
            entry_phase: "p".into(),
            trail_anchor: None,
            realized_partial: 0.0,
            entry_snapshot: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn buy_stop_hit() {
        let pos = position(Direction::Buy, Some(95.0), Some(110.0));
        let hit = detect_exit(&pos, &bar(94.0, 101.0)).unwrap();
        assert_eq!(hit, (ExitReason::Sl, 95.0));
    }

    #[test]
    fn buy_target_hit() {
        let pos = position(Direction::Buy, Some(95.0), Some(110.0));
        let hit = detect_exit(&pos, &bar(99.0, 111.0)).unwrap();
        assert_eq!(hit, (ExitReason::Tp, 110.0));
    }

    #[test]
    fn buy_both_crossed_stop_wins() {
        let pos = position(Direction::Buy, Some(95.0), Some(110.0));
        let hit = detect_exit(&pos, &bar(94.0, 111.0)).unwrap();
        assert_eq!(hit.0, ExitReason::Sl);
    }

    #[test]
    fn sell_stop_hit() {
        let pos = position(Direction::Sell, Some(105.0), Some(90.0));
        let hit = detect_exit(&pos, &bar(99.0, 106.0)).unwrap();
        assert_eq!(hit, (ExitReason::Sl, 105.0));
    }

    #[test]
    fn sell_both_crossed_stop_wins() {
        let pos = position(Direction::Sell, Some(105.0), Some(90.0));
        let hit = detect_exit(&pos, &bar(89.0, 106.0)).unwrap();
        assert_eq!(hit.0, ExitReason::Sl);
    }

    #[test]
    fn no_levels_no_exit() {
        let pos = position(Direction::Buy, None, None);
        assert!(detect_exit(&pos, &bar(0.1, 1000.0)).is_none());
    }

    #[test]
    fn range_inside_levels_no_exit() {
        let pos = position(Direction::Buy, Some(95.0), Some(110.0));
        assert!(detect_exit(&pos, &bar(96.0, 109.0)).is_none());
    }
}
