use std::collections::HashMap;

use chrono::NaiveDate;
use portfolio_stats::{ScenarioTrade, StatisticsSnapshot};

use crate::models::ParamCombo;
use crate::scenario::{PARAM_MAX_CONSECUTIVE_LOSSES, PARAM_MAX_DAILY_LOSS_PCT};

/// Default ceilings applied when a combination does not sweep the cap
/// itself. Deliberately permissive: the filter exists to prune clearly
/// unsafe sizing, not to act as a second optimizer.
pub const DEFAULT_MAX_CONSECUTIVE_LOSSES: usize = 10;
pub const DEFAULT_MAX_DAILY_LOSS_PCT: f64 = 20.0;

/// Hard risk constraints for one combination. Both caps are sweepable
/// parameters; absent ones fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCaps {
    pub max_consecutive_losses: usize,
    pub max_daily_loss_pct: f64,
}

impl RiskCaps {
    pub fn from_combo(combo: &ParamCombo) -> Self {
        Self {
            max_consecutive_losses: combo
                .value(PARAM_MAX_CONSECUTIVE_LOSSES)
                .map(|v| v.max(0.0) as usize)
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_LOSSES),
            max_daily_loss_pct: combo
                .value(PARAM_MAX_DAILY_LOSS_PCT)
                .unwrap_or(DEFAULT_MAX_DAILY_LOSS_PCT),
        }
    }
}

/// Accept or reject a scaled combination against the hard caps.
///
/// Rejects when the longest losing streak exceeds the cap, or when the
/// worst single calendar-day loss exceeds the cap as a percentage of the
/// scenario capital. A rejected combination is excluded from best-so-far
/// comparison but still counts toward the tested statistic.
pub fn accepts(
    caps: &RiskCaps,
    snapshot: &StatisticsSnapshot,
    trades: &[ScenarioTrade],
    capital: f64,
) -> bool {
    if snapshot.max_consecutive_losses > caps.max_consecutive_losses {
        return false;
    }
    worst_daily_loss_pct(trades, capital) <= caps.max_daily_loss_pct
}

/// Worst single-calendar-day loss as a positive percentage of capital
/// (0.0 when no day closed at a net loss).
pub fn worst_daily_loss_pct(trades: &[ScenarioTrade], capital: f64) -> f64 {
    if capital <= 0.0 {
        return f64::INFINITY;
    }

    let mut daily: HashMap<NaiveDate, f64> = HashMap::new();
    for trade in trades {
        *daily.entry(trade.closed_at.date()).or_insert(0.0) += trade.profit_loss;
    }

    daily
        .values()
        .filter(|pnl| **pnl < 0.0)
        .map(|pnl| -pnl / capital * 100.0)
        .fold(0.0, f64::max)
}
