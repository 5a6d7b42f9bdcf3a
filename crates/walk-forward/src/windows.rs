use chrono::{Days, NaiveDate};

use crate::models::{AnalysisWindow, WalkForwardConfig};

/// Derive the ordered window sequence for a trade history spanning
/// `[span_start, span_end]` (both calendar days, UTC-floored).
///
/// Rolling mode emits `[t, t+is) / [t+is, t+is+oos)` and advances `t` by
/// the step size while the out-of-sample segment still fits inside the
/// span. Anchored mode pins the in-sample start at `span_start`, so the
/// training segment expands by the step each iteration.
///
/// Returns an empty vector when the span cannot fit one full window; that
/// is a normal outcome, not an error.
pub fn build_windows(
    span_start: NaiveDate,
    span_end: NaiveDate,
    config: &WalkForwardConfig,
) -> Vec<AnalysisWindow> {
    let mut windows = Vec::new();
    if span_end < span_start {
        return windows;
    }

    let is_days = config.in_sample_days as u64;
    let oos_days = config.out_of_sample_days as u64;
    let step = config.step_size_days as u64;

    let mut cursor = span_start;
    loop {
        let is_start = if config.anchored { span_start } else { cursor };
        let is_end = cursor + Days::new(is_days);
        let oos_end = is_end + Days::new(oos_days);

        // oos_end is an exclusive day bound; the last covered day must
        // not pass the last trade day.
        if oos_end - Days::new(1) > span_end {
            break;
        }

        windows.push(AnalysisWindow {
            index: windows.len(),
            is_start,
            is_end,
            oos_start: is_end,
            oos_end,
        });

        cursor = cursor + Days::new(step);
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptimizationTarget;

    fn config(is: i64, oos: i64, step: i64, anchored: bool) -> WalkForwardConfig {
        WalkForwardConfig {
            in_sample_days: is,
            out_of_sample_days: oos,
            step_size_days: step,
            anchored,
            optimization_target: OptimizationTarget::NetProfitLoss,
            parameter_ranges: vec![],
            min_in_sample_trades: 1,
            min_out_of_sample_trades: 1,
            initial_capital: 100_000.0,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new((d - 1) as u64)
    }

    #[test]
    fn test_rolling_window_boundaries() {
        // 60-day span, 30/15 windows stepping 15 -> exactly two windows.
        let windows = build_windows(day(1), day(60), &config(30, 15, 15, false));
        assert_eq!(windows.len(), 2);

        assert_eq!(windows[0].is_start, day(1));
        assert_eq!(windows[0].is_end, day(31));
        assert_eq!(windows[0].oos_start, day(31));
        assert_eq!(windows[0].oos_end, day(46));

        assert_eq!(windows[1].is_start, day(16));
        assert_eq!(windows[1].oos_end, day(61));
    }

    #[test]
    fn test_coverage_invariant() {
        let windows = build_windows(day(1), day(120), &config(30, 15, 10, false));
        assert!(!windows.is_empty());
        for w in &windows {
            assert_eq!(w.is_end, w.oos_start);
            assert_eq!((w.oos_end - w.is_start).num_days(), 30 + 15);
        }
    }

    #[test]
    fn test_short_span_yields_no_windows() {
        let windows = build_windows(day(1), day(44), &config(30, 15, 15, false));
        assert!(windows.is_empty());
    }

    #[test]
    fn test_exact_span_yields_one_window() {
        let windows = build_windows(day(1), day(45), &config(30, 15, 15, false));
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_anchored_in_sample_expands() {
        let windows = build_windows(day(1), day(90), &config(30, 15, 15, true));
        assert!(windows.len() >= 2);
        for w in &windows {
            assert_eq!(w.is_start, day(1));
        }
        assert!(windows[1].in_sample_days() > windows[0].in_sample_days());
        assert_eq!(windows[1].in_sample_days() - windows[0].in_sample_days(), 15);
    }

    #[test]
    fn test_window_indices_are_sequential() {
        let windows = build_windows(day(1), day(120), &config(30, 15, 15, false));
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
        }
    }
}
