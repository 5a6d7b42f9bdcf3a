use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use portfolio_stats::{compute_snapshot, DailyLogEntry, ScenarioTrade, StatisticsSnapshot};

use crate::error::WfaError;
use crate::models::*;
use crate::param_grid::ParamGrid;
use crate::progress::{AnalysisPhase, CancellationToken, ProgressCallback, ProgressUpdate};
use crate::risk_filter::{self, RiskCaps};
use crate::scenario::{self, ScalingBaseline};
use crate::windows::build_windows;

/// Combinations evaluated between cooperative suspension points. Each
/// suspension point yields to the host runtime, reports progress, and
/// checks for cancellation.
const COMBO_BATCH_SIZE: usize = 32;

/// The portfolio-statistics collaborator. The engine treats this as a
/// pure black box; a failing call rejects that single combination rather
/// than aborting the run.
pub trait StatsProvider: Send + Sync {
    fn snapshot(
        &self,
        trades: &[ScenarioTrade],
        daily_logs: Option<&[DailyLogEntry]>,
        initial_capital: f64,
    ) -> anyhow::Result<StatisticsSnapshot>;
}

/// Default provider backed by the portfolio-stats crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatsProvider;

impl StatsProvider for DefaultStatsProvider {
    fn snapshot(
        &self,
        trades: &[ScenarioTrade],
        daily_logs: Option<&[DailyLogEntry]>,
        initial_capital: f64,
    ) -> anyhow::Result<StatisticsSnapshot> {
        compute_snapshot(trades, daily_logs, initial_capital)
    }
}

/// Walk-forward analyzer: builds the window sequence, optimizes each
/// in-sample segment over the parameter grid, evaluates the winner
/// out-of-sample, and aggregates cross-window robustness metrics.
pub struct WalkForwardAnalyzer {
    config: WalkForwardConfig,
    stats: Arc<dyn StatsProvider>,
}

/// Winning combination tracked during one window's optimization pass.
struct BestCombo {
    combo: ParamCombo,
    snapshot: StatisticsSnapshot,
    target_value: f64,
}

impl WalkForwardAnalyzer {
    pub fn new(config: WalkForwardConfig) -> Result<Self, WfaError> {
        Self::with_stats_provider(config, Arc::new(DefaultStatsProvider))
    }

    pub fn with_stats_provider(
        config: WalkForwardConfig,
        stats: Arc<dyn StatsProvider>,
    ) -> Result<Self, WfaError> {
        config.validate()?;
        Ok(Self { config, stats })
    }

    /// Run the full analysis over a chronological trade history.
    ///
    /// `daily_logs` are forwarded to the statistics collaborator but not
    /// used by the engine's own calculations. The optional cancellation
    /// token is honored at every suspension point; a cancelled run
    /// surfaces [`WfaError::Cancelled`] and no partial result.
    pub async fn run(
        &self,
        trades: &[TradeRecord],
        daily_logs: &[DailyLogEntry],
        cancel: Option<CancellationToken>,
        progress: Option<ProgressCallback>,
    ) -> Result<WalkForwardComputation, WfaError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let config = &self.config;

        // Parse every trade timestamp exactly once for this run.
        let mut cached = cache_trades(trades)?;
        cached.sort_by_key(|t| t.opened_at);

        let windows = match trade_span(&cached) {
            Some((span_start, span_end)) => build_windows(span_start, span_end, config),
            None => Vec::new(),
        };
        let total_periods = windows.len();

        let grid = ParamGrid::new(&config.parameter_ranges);
        let total_combinations = grid.total_count();

        info!(
            total_periods,
            total_combinations,
            trades = cached.len(),
            optimization_target = ?config.optimization_target,
            "starting walk-forward analysis"
        );

        let baseline = self.build_baseline(&cached, daily_logs);

        let mut periods: Vec<PeriodResult> = Vec::new();
        let mut skipped: Vec<SkippedPeriod> = Vec::new();
        let mut combinations_tested = 0u64;
        let mut trades_processed = 0u64;

        let completed = |periods: &Vec<PeriodResult>, skipped: &Vec<SkippedPeriod>| {
            periods.len() + skipped.len()
        };

        for window in &windows {
            if is_cancelled(&cancel) {
                return Err(WfaError::Cancelled {
                    completed_periods: completed(&periods, &skipped),
                    total_periods,
                });
            }

            let period_index = window.index + 1;
            emit(
                &progress,
                ProgressUpdate {
                    phase: AnalysisPhase::Segmenting,
                    current_period: period_index,
                    total_periods,
                    tested_combinations: None,
                    total_combinations: Some(total_combinations),
                    window: Some(*window),
                    message: None,
                },
            );

            // Segment by close date. The OOS end bound is exclusive at
            // day granularity, which makes the final OOS day end-of-day
            // inclusive.
            let is_trades: Vec<CachedTrade<'_>> = cached
                .iter()
                .filter(|t| {
                    let day = t.closed_at.date();
                    day >= window.is_start && day < window.is_end
                })
                .cloned()
                .collect();
            let oos_trades: Vec<CachedTrade<'_>> = cached
                .iter()
                .filter(|t| {
                    let day = t.closed_at.date();
                    day >= window.oos_start && day < window.oos_end
                })
                .cloned()
                .collect();
            trades_processed += (is_trades.len() + oos_trades.len()) as u64;

            if is_trades.len() < config.min_in_sample_trades {
                debug!(
                    period = period_index,
                    in_sample_trades = is_trades.len(),
                    "skipping window: too few in-sample trades"
                );
                skipped.push(SkippedPeriod {
                    window: *window,
                    reason: SkipReason::InsufficientInSampleTrades,
                });
                emit_completed(&progress, period_index, total_periods, window);
                continue;
            }
            if oos_trades.len() < config.min_out_of_sample_trades {
                debug!(
                    period = period_index,
                    out_of_sample_trades = oos_trades.len(),
                    "skipping window: too few out-of-sample trades"
                );
                skipped.push(SkippedPeriod {
                    window: *window,
                    reason: SkipReason::InsufficientOutOfSampleTrades,
                });
                emit_completed(&progress, period_index, total_periods, window);
                continue;
            }

            emit(
                &progress,
                ProgressUpdate {
                    phase: AnalysisPhase::Optimizing,
                    current_period: period_index,
                    total_periods,
                    tested_combinations: Some(0),
                    total_combinations: Some(total_combinations),
                    window: Some(*window),
                    message: None,
                },
            );

            // In-sample grid sweep.
            let mut best: Option<BestCombo> = None;
            let mut tested_in_window = 0u64;
            let mut stats_failures = 0u64;

            for (ci, combo) in grid.combinations().enumerate() {
                if ci > 0 && ci % COMBO_BATCH_SIZE == 0 {
                    if is_cancelled(&cancel) {
                        return Err(WfaError::Cancelled {
                            completed_periods: completed(&periods, &skipped),
                            total_periods,
                        });
                    }
                    emit(
                        &progress,
                        ProgressUpdate {
                            phase: AnalysisPhase::Optimizing,
                            current_period: period_index,
                            total_periods,
                            tested_combinations: Some(tested_in_window),
                            total_combinations: Some(total_combinations),
                            window: Some(*window),
                            message: None,
                        },
                    );
                    tokio::task::yield_now().await;
                }

                tested_in_window += 1;
                combinations_tested += 1;

                let scenario = scenario::apply_scenario(&is_trades, &combo, &baseline, None);
                let snapshot =
                    match self
                        .stats
                        .snapshot(&scenario.trades, Some(daily_logs), scenario.capital)
                    {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            stats_failures += 1;
                            debug!(period = period_index, combination = ci, %err,
                                "statistics collaborator failed; combination rejected");
                            continue;
                        }
                    };

                let caps = RiskCaps::from_combo(&combo);
                if !risk_filter::accepts(&caps, &snapshot, &scenario.trades, scenario.capital) {
                    continue;
                }

                let value = config.optimization_target.extract(&snapshot);
                if value.is_nan() {
                    continue;
                }

                // Strict improvement only: ties keep the earlier
                // combination, per the generator's deterministic order.
                let improves = best
                    .as_ref()
                    .map(|b| value > b.target_value)
                    .unwrap_or(true);
                if improves {
                    best = Some(BestCombo {
                        combo,
                        snapshot,
                        target_value: value,
                    });
                }
            }

            if stats_failures == tested_in_window && tested_in_window > 0 {
                warn!(
                    period = period_index,
                    "statistics collaborator failed for every combination in window"
                );
            }

            let Some(best) = best else {
                debug!(period = period_index, "skipping window: no combination accepted");
                skipped.push(SkippedPeriod {
                    window: *window,
                    reason: SkipReason::NoAcceptedCombination,
                });
                emit_completed(&progress, period_index, total_periods, window);
                continue;
            };

            emit(
                &progress,
                ProgressUpdate {
                    phase: AnalysisPhase::Evaluating,
                    current_period: period_index,
                    total_periods,
                    tested_combinations: Some(tested_in_window),
                    total_combinations: Some(total_combinations),
                    window: Some(*window),
                    message: None,
                },
            );

            // Out-of-sample evaluation with the in-sample winner.
            let oos_scenario =
                scenario::apply_scenario(&oos_trades, &best.combo, &baseline, None);
            let oos_snapshot = match self.stats.snapshot(
                &oos_scenario.trades,
                Some(daily_logs),
                oos_scenario.capital,
            ) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(period = period_index, %err,
                        "statistics collaborator failed on out-of-sample evaluation");
                    skipped.push(SkippedPeriod {
                        window: *window,
                        reason: SkipReason::NoAcceptedCombination,
                    });
                    emit_completed(&progress, period_index, total_periods, window);
                    continue;
                }
            };
            let oos_value = config.optimization_target.extract(&oos_snapshot);

            debug!(
                period = period_index,
                in_sample_target = best.target_value,
                out_of_sample_target = oos_value,
                "window evaluated"
            );
            periods.push(PeriodResult {
                window: *window,
                best_combination: best.combo,
                in_sample: best.snapshot,
                out_of_sample: oos_snapshot,
                in_sample_target: best.target_value,
                out_of_sample_target: oos_value,
            });

            emit_completed(&progress, period_index, total_periods, window);
            tokio::task::yield_now().await;
        }

        let summary = aggregate_summary(&periods, &config.parameter_ranges);
        let stats = RunStats {
            total_periods,
            evaluated_periods: periods.len(),
            skipped_periods: skipped.len(),
            combinations_tested,
            trades_processed,
            duration_ms: timer.elapsed().as_millis() as u64,
            consistency_score: summary.consistency_score,
            avg_performance_delta_percent: summary.avg_performance_delta_percent,
        };

        info!(
            evaluated = stats.evaluated_periods,
            skipped = stats.skipped_periods,
            combinations = stats.combinations_tested,
            duration_ms = stats.duration_ms,
            robustness = summary.robustness_score,
            "walk-forward analysis complete"
        );

        Ok(WalkForwardComputation {
            config: config.clone(),
            results: WalkForwardResults {
                periods,
                skipped,
                summary,
                stats,
            },
            started_at: started_at.to_rfc3339(),
            completed_at: Utc::now().to_rfc3339(),
        })
    }

    /// Whole-history scaling baseline: reference Kelly fraction and
    /// average contract count, computed once per run.
    fn build_baseline(
        &self,
        cached: &[CachedTrade<'_>],
        daily_logs: &[DailyLogEntry],
    ) -> ScalingBaseline {
        let capital = self.config.initial_capital;
        if cached.is_empty() {
            return ScalingBaseline::new(None, 1.0, capital);
        }

        let identity: Vec<ScenarioTrade> = cached
            .iter()
            .map(|t| ScenarioTrade {
                closed_at: t.closed_at,
                profit_loss: t.record.profit_loss,
                contracts: t.record.contracts,
                margin_requirement: t.record.margin_requirement,
            })
            .collect();

        let kelly = match self.stats.snapshot(&identity, Some(daily_logs), capital) {
            Ok(snapshot) => snapshot.kelly_fraction,
            Err(err) => {
                warn!(%err, "statistics collaborator failed on full history; baseline Kelly floored");
                None
            }
        };

        let avg_contracts =
            cached.iter().map(|t| t.record.contracts).sum::<f64>() / cached.len() as f64;
        ScalingBaseline::new(kelly, avg_contracts.max(1.0), capital)
    }
}

fn cache_trades(trades: &[TradeRecord]) -> Result<Vec<CachedTrade<'_>>, WfaError> {
    trades
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let opened_at = parse_trade_datetime(&record.open_date).ok_or_else(|| {
                WfaError::InvalidInput(format!(
                    "trade {}: unparseable open date '{}'",
                    i, record.open_date
                ))
            })?;
            let closed_at = parse_trade_datetime(&record.close_date).ok_or_else(|| {
                WfaError::InvalidInput(format!(
                    "trade {}: unparseable close date '{}'",
                    i, record.close_date
                ))
            })?;
            Ok(CachedTrade {
                record,
                opened_at,
                closed_at,
            })
        })
        .collect()
}

/// History span: earliest open day (UTC-floored) through latest close day.
fn trade_span(cached: &[CachedTrade<'_>]) -> Option<(chrono::NaiveDate, chrono::NaiveDate)> {
    let first_open = cached.iter().map(|t| t.opened_at.date()).min()?;
    let last_close = cached.iter().map(|t| t.closed_at.date()).max()?;
    Some((first_open, last_close))
}

fn is_cancelled(cancel: &Option<CancellationToken>) -> bool {
    cancel.as_ref().is_some_and(|token| token.is_cancelled())
}

fn emit(progress: &Option<ProgressCallback>, update: ProgressUpdate) {
    if let Some(callback) = progress {
        callback(update);
    }
}

fn emit_completed(
    progress: &Option<ProgressCallback>,
    current_period: usize,
    total_periods: usize,
    window: &AnalysisWindow,
) {
    emit(
        progress,
        ProgressUpdate {
            phase: AnalysisPhase::Completed,
            current_period,
            total_periods,
            tested_combinations: None,
            total_combinations: None,
            window: Some(*window),
            message: None,
        },
    );
}

/// Roll per-window results into the cross-window robustness summary.
fn aggregate_summary(periods: &[PeriodResult], ranges: &[ParamRange]) -> WalkForwardSummary {
    if periods.is_empty() {
        return WalkForwardSummary::default();
    }

    let n = periods.len() as f64;
    let avg_in_sample_target = periods.iter().map(|p| p.in_sample_target).sum::<f64>() / n;
    let avg_out_of_sample_target =
        periods.iter().map(|p| p.out_of_sample_target).sum::<f64>() / n;

    // Degradation factor: mean OOS/IS ratio. Windows with a ~zero IS
    // target are excluded from the mean (division guard).
    let ratios: Vec<f64> = periods
        .iter()
        .filter(|p| p.in_sample_target.abs() > 1e-9)
        .map(|p| p.out_of_sample_target / p.in_sample_target)
        .collect();
    let degradation_factor = if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    let parameter_stability = parameter_stability(periods, ranges);

    let consistency_score = periods
        .iter()
        .filter(|p| p.out_of_sample_target > 0.0)
        .count() as f64
        / n;

    let deltas: Vec<f64> = periods
        .iter()
        .filter(|p| p.in_sample_target.abs() > 1e-9)
        .map(|p| (p.out_of_sample_target - p.in_sample_target) / p.in_sample_target.abs() * 100.0)
        .collect();
    let avg_performance_delta_percent = if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    };

    let efficiency = degradation_factor.clamp(0.0, 1.0);
    let robustness_score =
        0.4 * efficiency + 0.3 * parameter_stability + 0.3 * consistency_score;

    WalkForwardSummary {
        avg_in_sample_target,
        avg_out_of_sample_target,
        degradation_factor,
        parameter_stability,
        consistency_score,
        avg_performance_delta_percent,
        robustness_score,
    }
}

/// 1 - coefficient_of_variation of each winning parameter's value across
/// windows (sample standard deviation), averaged over parameters and
/// clamped to [0, 1]. No swept parameters means trivially stable.
fn parameter_stability(periods: &[PeriodResult], ranges: &[ParamRange]) -> f64 {
    if ranges.is_empty() {
        return 1.0;
    }

    let mut scores = Vec::with_capacity(ranges.len());
    for range in ranges {
        let values: Vec<f64> = periods
            .iter()
            .filter_map(|p| p.best_combination.value(&range.name))
            .collect();
        if values.len() < 2 {
            scores.push(1.0);
            continue;
        }

        let mean = values.iter().mean();
        let std_dev = values.iter().std_dev();
        let score = if mean.abs() > 1e-9 {
            (1.0 - std_dev / mean.abs()).clamp(0.0, 1.0)
        } else if std_dev < 1e-9 {
            1.0
        } else {
            0.0
        };
        scores.push(score);
    }

    scores.iter().sum::<f64>() / scores.len() as f64
}
