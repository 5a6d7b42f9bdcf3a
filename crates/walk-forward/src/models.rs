use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::WfaError;

pub use portfolio_stats::{DailyLogEntry, ScenarioTrade, StatisticsSnapshot};

/// Scalar used to rank parameter combinations in-sample and to measure
/// in-sample vs out-of-sample degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptimizationTarget {
    NetProfitLoss,
    ProfitFactor,
    Sharpe,
    Sortino,
    Calmar,
    Cagr,
    AvgDailyProfitLoss,
    WinRate,
}

impl OptimizationTarget {
    /// Extract the target value from a statistics snapshot. Missing ratio
    /// metrics read as 0.0 so they never win against a real value.
    pub fn extract(&self, snapshot: &StatisticsSnapshot) -> f64 {
        match self {
            Self::NetProfitLoss => snapshot.net_profit_loss,
            Self::ProfitFactor => snapshot.profit_factor.unwrap_or(0.0),
            Self::Sharpe => snapshot.sharpe_ratio.unwrap_or(0.0),
            Self::Sortino => snapshot.sortino_ratio.unwrap_or(0.0),
            Self::Calmar => snapshot.calmar_ratio.unwrap_or(0.0),
            Self::Cagr => snapshot.cagr.unwrap_or(0.0),
            Self::AvgDailyProfitLoss => snapshot.avg_daily_profit_loss,
            Self::WinRate => snapshot.win_rate,
        }
    }
}

/// Inclusive sweep range for one parameter: min, min+step, ... up to max.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Configuration for one walk-forward analysis run. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub in_sample_days: i64,
    pub out_of_sample_days: i64,
    pub step_size_days: i64,
    /// Anchored mode pins the in-sample start at the history start so the
    /// training segment expands with each step.
    #[serde(default)]
    pub anchored: bool,
    pub optimization_target: OptimizationTarget,
    /// Insertion order determines combination generation order.
    pub parameter_ranges: Vec<ParamRange>,
    pub min_in_sample_trades: usize,
    pub min_out_of_sample_trades: usize,
    pub initial_capital: f64,
}

impl WalkForwardConfig {
    /// Fail-fast validation, run before any window is built.
    pub fn validate(&self) -> Result<(), WfaError> {
        if self.in_sample_days <= 0 || self.out_of_sample_days <= 0 || self.step_size_days <= 0 {
            return Err(WfaError::InvalidConfig(format!(
                "window sizes must be positive (in-sample {}, out-of-sample {}, step {})",
                self.in_sample_days, self.out_of_sample_days, self.step_size_days
            )));
        }
        if self.initial_capital <= 0.0 {
            return Err(WfaError::InvalidConfig(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        for range in &self.parameter_ranges {
            if range.step <= 0.0 {
                return Err(WfaError::InvalidConfig(format!(
                    "parameter '{}': step must be positive, got {}",
                    range.name, range.step
                )));
            }
            if range.min > range.max {
                return Err(WfaError::InvalidConfig(format!(
                    "parameter '{}': min {} exceeds max {}",
                    range.name, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// An externally-owned trade. The engine never mutates these; all scaling
/// produces fresh derived records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub open_date: String,
    pub close_date: String,
    pub profit_loss: f64,
    pub contracts: f64,
    pub margin_requirement: f64,
    pub strategy: String,
}

/// A trade with its timestamps parsed once for the duration of a run, so
/// the innermost comparison loops never re-parse strings.
#[derive(Debug, Clone)]
pub struct CachedTrade<'a> {
    pub record: &'a TradeRecord,
    pub opened_at: NaiveDateTime,
    pub closed_at: NaiveDateTime,
}

/// Parse a trade timestamp: date-time first, then bare date (midnight).
pub fn parse_trade_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// One concrete parameter combination, in generation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamCombo {
    pub values: Vec<(String, f64)>,
}

impl ParamCombo {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

// --- Windows ---

/// One in-sample/out-of-sample window pair. Boundaries are half-open at
/// day granularity: `is_end == oos_start`, and a trade belongs to the OOS
/// segment when its close day is in `[oos_start, oos_end)` (so the last
/// OOS day is covered end-of-day inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub index: usize,
    pub is_start: NaiveDate,
    pub is_end: NaiveDate,
    pub oos_start: NaiveDate,
    pub oos_end: NaiveDate,
}

impl AnalysisWindow {
    pub fn in_sample_days(&self) -> i64 {
        (self.is_end - self.is_start).num_days()
    }

    pub fn out_of_sample_days(&self) -> i64 {
        (self.oos_end - self.oos_start).num_days()
    }
}

// --- Results ---

/// Why a window produced no period result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    InsufficientInSampleTrades,
    InsufficientOutOfSampleTrades,
    NoAcceptedCombination,
}

/// A window that was counted but not evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPeriod {
    pub window: AnalysisWindow,
    pub reason: SkipReason,
}

/// Outcome of one evaluated window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodResult {
    pub window: AnalysisWindow,
    pub best_combination: ParamCombo,
    pub in_sample: StatisticsSnapshot,
    pub out_of_sample: StatisticsSnapshot,
    pub in_sample_target: f64,
    pub out_of_sample_target: f64,
}

/// Cross-window robustness summary, computed once at run end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub avg_in_sample_target: f64,
    pub avg_out_of_sample_target: f64,
    /// Mean of per-window OOS/IS target ratios; the primary overfitting
    /// signal (values near 1.0 mean the edge generalizes).
    pub degradation_factor: f64,
    /// 1 - coefficient_of_variation of each winning parameter across
    /// windows, averaged, clamped to [0, 1].
    pub parameter_stability: f64,
    /// Fraction of evaluated windows with a positive OOS target.
    pub consistency_score: f64,
    /// Mean of (OOS - IS) / |IS| * 100 across evaluated windows.
    pub avg_performance_delta_percent: f64,
    /// 0.4 * efficiency + 0.3 * stability + 0.3 * consistency, with
    /// efficiency clamped to [0, 1] for the blend.
    pub robustness_score: f64,
}

/// Run bookkeeping counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_periods: usize,
    pub evaluated_periods: usize,
    pub skipped_periods: usize,
    pub combinations_tested: u64,
    pub trades_processed: u64,
    pub duration_ms: u64,
    pub consistency_score: f64,
    pub avg_performance_delta_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResults {
    pub periods: Vec<PeriodResult>,
    pub skipped: Vec<SkippedPeriod>,
    pub summary: WalkForwardSummary,
    pub stats: RunStats,
}

/// The full computation record handed to external persistence and
/// reporting layers. The engine itself performs no I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardComputation {
    pub config: WalkForwardConfig,
    pub results: WalkForwardResults,
    /// RFC 3339.
    pub started_at: String,
    pub completed_at: String,
}

/// Shape of one persisted run, owned by an external store. Never re-read
/// by the engine; included so storage and listing layers share one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardRecord {
    pub id: String,
    pub trade_block_id: String,
    pub computation: WalkForwardComputation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> WalkForwardConfig {
        WalkForwardConfig {
            in_sample_days: 30,
            out_of_sample_days: 15,
            step_size_days: 15,
            anchored: false,
            optimization_target: OptimizationTarget::NetProfitLoss,
            parameter_ranges: vec![],
            min_in_sample_trades: 10,
            min_out_of_sample_trades: 1,
            initial_capital: 100_000.0,
        }
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nonpositive_window() {
        let mut config = base_config();
        config.out_of_sample_days = 0;
        assert!(matches!(
            config.validate(),
            Err(WfaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        let mut config = base_config();
        config.parameter_ranges.push(ParamRange {
            name: "positionMultiplier".to_string(),
            min: 2.0,
            max: 1.0,
            step: 0.5,
        });
        assert!(config.validate().is_err());

        config.parameter_ranges[0] = ParamRange {
            name: "positionMultiplier".to_string(),
            min: 1.0,
            max: 2.0,
            step: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_trade_datetime_formats() {
        assert!(parse_trade_datetime("2024-03-05 09:31:00").is_some());
        assert!(parse_trade_datetime("2024-03-05T09:31:00").is_some());
        let midnight = parse_trade_datetime("2024-03-05").unwrap();
        assert_eq!(midnight.time(), chrono::NaiveTime::MIN);
        assert!(parse_trade_datetime("05/03/2024").is_none());
    }

    #[test]
    fn test_target_extraction_missing_metric_reads_zero() {
        let snapshot = StatisticsSnapshot {
            net_profit_loss: 500.0,
            total_trades: 3,
            winning_trades: 2,
            losing_trades: 1,
            win_rate: 66.7,
            profit_factor: None,
            sharpe_ratio: None,
            sortino_ratio: None,
            max_drawdown_percent: None,
            calmar_ratio: None,
            cagr: None,
            avg_daily_profit_loss: 250.0,
            avg_win: Some(300.0),
            avg_loss: Some(100.0),
            kelly_fraction: Some(0.2),
            max_consecutive_losses: 1,
            max_consecutive_wins: 2,
        };
        assert_eq!(OptimizationTarget::Sharpe.extract(&snapshot), 0.0);
        assert_eq!(
            OptimizationTarget::NetProfitLoss.extract(&snapshot),
            500.0
        );
    }
}
