use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const RISK_FREE_DAILY: f64 = 0.02 / 252.0;

/// Minimal trade projection the statistics calculator operates on.
///
/// The walk-forward engine hands over freshly scaled copies of this shape
/// per parameter combination, so the struct deliberately carries only what
/// the metrics below need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTrade {
    pub closed_at: NaiveDateTime,
    pub profit_loss: f64,
    pub contracts: f64,
    pub margin_requirement: f64,
}

/// One row of the daily portfolio log. Accepted for future equity-curve
/// refinement; current metrics are derived from trade close dates only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLogEntry {
    pub date: String,
    pub net_liquidity: f64,
    pub profit_loss: f64,
}

/// Portfolio metrics snapshot for one trade subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub net_profit_loss: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// 0-100 percentage.
    pub win_rate: f64,
    pub profit_factor: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown_percent: Option<f64>,
    pub calmar_ratio: Option<f64>,
    /// Annualized growth rate, percent.
    pub cagr: Option<f64>,
    pub avg_daily_profit_loss: f64,
    pub avg_win: Option<f64>,
    pub avg_loss: Option<f64>,
    /// Kelly criterion optimal fraction, clamped to [0, 1].
    pub kelly_fraction: Option<f64>,
    /// Longest run of losing trades, in close-date order.
    pub max_consecutive_losses: usize,
    pub max_consecutive_wins: usize,
}

/// Compute the statistics snapshot for a trade subset.
///
/// Daily P/L is grouped by close calendar day; the equity curve is the
/// cumulative sum over those days starting from `initial_capital`. Ratio
/// metrics that need a return series (Sharpe, Sortino, Calmar, CAGR) are
/// `None` when fewer than two distinct trading days are present.
pub fn compute_snapshot(
    trades: &[ScenarioTrade],
    _daily_logs: Option<&[DailyLogEntry]>,
    initial_capital: f64,
) -> Result<StatisticsSnapshot> {
    if initial_capital <= 0.0 {
        bail!("initial capital must be positive, got {initial_capital}");
    }

    let net_profit_loss: f64 = trades.iter().map(|t| t.profit_loss).sum();
    let winning: Vec<f64> = trades
        .iter()
        .filter(|t| t.profit_loss > 0.0)
        .map(|t| t.profit_loss)
        .collect();
    let losing: Vec<f64> = trades
        .iter()
        .filter(|t| t.profit_loss < 0.0)
        .map(|t| t.profit_loss)
        .collect();

    let total_trades = trades.len();
    let win_rate = if total_trades > 0 {
        winning.len() as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let gross_profit: f64 = winning.iter().sum();
    let gross_loss: f64 = losing.iter().map(|l| l.abs()).sum();
    let profit_factor = if gross_loss > 1e-10 {
        Some(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        Some(f64::INFINITY)
    } else {
        None
    };

    let avg_win = if winning.is_empty() {
        None
    } else {
        Some(gross_profit / winning.len() as f64)
    };
    let avg_loss = if losing.is_empty() {
        None
    } else {
        Some(gross_loss / losing.len() as f64)
    };

    let kelly = kelly_fraction(
        winning.len() as f64 / total_trades.max(1) as f64,
        avg_win.unwrap_or(0.0),
        avg_loss.unwrap_or(0.0),
    );

    // Daily P/L grouped by close calendar day, chronological.
    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for trade in trades {
        *daily.entry(trade.closed_at.date()).or_insert(0.0) += trade.profit_loss;
    }

    let avg_daily_profit_loss = if daily.is_empty() {
        0.0
    } else {
        net_profit_loss / daily.len() as f64
    };

    // Equity curve and daily return series.
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown_pct = 0.0f64;
    let mut returns: Vec<f64> = Vec::with_capacity(daily.len());
    for pnl in daily.values() {
        let prev = equity;
        equity += pnl;
        if prev > 0.0 {
            returns.push(pnl / prev);
        }
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            max_drawdown_pct = max_drawdown_pct.max((peak - equity) / peak * 100.0);
        }
    }

    let max_drawdown_percent = if daily.is_empty() {
        None
    } else {
        Some(max_drawdown_pct)
    };

    let (sharpe_ratio, sortino_ratio) = if returns.len() >= 2 {
        (sharpe(&returns), sortino(&returns))
    } else {
        (None, None)
    };

    let cagr = compute_cagr(&daily, initial_capital, equity);
    let (max_consecutive_wins, max_consecutive_losses) = streaks(trades);
    let calmar_ratio = match (cagr, max_drawdown_percent) {
        (Some(c), Some(dd)) if dd > 1e-10 => Some(c / dd),
        _ => None,
    };

    Ok(StatisticsSnapshot {
        net_profit_loss,
        total_trades,
        winning_trades: winning.len(),
        losing_trades: losing.len(),
        win_rate,
        profit_factor,
        sharpe_ratio,
        sortino_ratio,
        max_drawdown_percent,
        calmar_ratio,
        cagr,
        avg_daily_profit_loss,
        avg_win,
        avg_loss,
        kelly_fraction: kelly,
        max_consecutive_losses,
        max_consecutive_wins,
    })
}

/// Longest win and loss runs in close-date order.
fn streaks(trades: &[ScenarioTrade]) -> (usize, usize) {
    let mut ordered: Vec<&ScenarioTrade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.closed_at);

    let mut max_wins = 0usize;
    let mut max_losses = 0usize;
    let mut win_run = 0usize;
    let mut loss_run = 0usize;
    for trade in ordered {
        if trade.profit_loss > 0.0 {
            win_run += 1;
            loss_run = 0;
        } else if trade.profit_loss < 0.0 {
            loss_run += 1;
            win_run = 0;
        } else {
            win_run = 0;
            loss_run = 0;
        }
        max_wins = max_wins.max(win_run);
        max_losses = max_losses.max(loss_run);
    }
    (max_wins, max_losses)
}

/// Kelly criterion: f* = (p*b - q) / b where b = avg_win / avg_loss.
///
/// Returns `None` when there is no loss history to size against.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss <= 0.0 || avg_win <= 0.0 {
        return None;
    }
    let b = avg_win / avg_loss;
    let kelly = (win_rate * b - (1.0 - win_rate)) / b;
    Some(kelly.clamp(0.0, 1.0))
}

fn sharpe(returns: &[f64]) -> Option<f64> {
    let mean = returns.iter().mean();
    let std = returns.iter().std_dev();
    if std > 1e-10 {
        Some((mean - RISK_FREE_DAILY) / std * TRADING_DAYS_PER_YEAR.sqrt())
    } else {
        None
    }
}

fn sortino(returns: &[f64]) -> Option<f64> {
    let mean = returns.iter().mean();
    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    if downside.is_empty() {
        return None;
    }
    let downside_dev = (downside.iter().sum::<f64>() / returns.len() as f64).sqrt();
    if downside_dev > 1e-10 {
        Some((mean - RISK_FREE_DAILY) / downside_dev * TRADING_DAYS_PER_YEAR.sqrt())
    } else {
        None
    }
}

fn compute_cagr(
    daily: &BTreeMap<NaiveDate, f64>,
    initial_capital: f64,
    final_equity: f64,
) -> Option<f64> {
    let first = daily.keys().next()?;
    let last = daily.keys().next_back()?;
    let days = (*last - *first).num_days();
    if days < 1 || initial_capital <= 0.0 || final_equity <= 0.0 {
        return None;
    }
    let years = days as f64 / 365.25;
    Some(((final_equity / initial_capital).powf(1.0 / years) - 1.0) * 100.0)
}
