use portfolio_stats::ScenarioTrade;

use crate::models::{CachedTrade, ParamCombo};

/// Kelly-like sizing parameter, interpreted relative to the baseline
/// Kelly fraction.
pub const PARAM_KELLY_FRACTION: &str = "kellyFraction";
/// Already-normalized position multiplier (1.0 = trade as recorded).
pub const PARAM_POSITION_MULTIPLIER: &str = "positionMultiplier";
/// Risk-filter cap: longest tolerated run of losing trades.
pub const PARAM_MAX_CONSECUTIVE_LOSSES: &str = "maxConsecutiveLosses";
/// Risk-filter cap: worst tolerated single-day loss, % of capital.
pub const PARAM_MAX_DAILY_LOSS_PCT: &str = "maxDailyLossPct";

const RESERVED_PARAMS: [&str; 4] = [
    PARAM_KELLY_FRACTION,
    PARAM_POSITION_MULTIPLIER,
    PARAM_MAX_CONSECUTIVE_LOSSES,
    PARAM_MAX_DAILY_LOSS_PCT,
];

/// Floor for the baseline Kelly fraction so a degenerate (zero-edge)
/// history cannot blow up the multiplier ratio.
const MIN_BASELINE_KELLY: f64 = 0.01;

/// Whole-history reference point against which a combination's sizing
/// parameter is interpreted. Run-scoped: computed once at run start from
/// the full trade history, discarded at run end.
#[derive(Debug, Clone, Copy)]
pub struct ScalingBaseline {
    pub kelly_fraction: f64,
    pub avg_contracts: f64,
    pub initial_capital: f64,
}

impl ScalingBaseline {
    pub fn new(kelly_fraction: Option<f64>, avg_contracts: f64, initial_capital: f64) -> Self {
        Self {
            kelly_fraction: kelly_fraction.unwrap_or(MIN_BASELINE_KELLY).max(MIN_BASELINE_KELLY),
            avg_contracts,
            initial_capital,
        }
    }
}

/// A scaled trade subset plus the capital it should be evaluated against.
#[derive(Debug, Clone)]
pub struct ScaledScenario {
    pub trades: Vec<ScenarioTrade>,
    pub capital: f64,
}

/// Apply one parameter combination to a trade subset.
///
/// Produces freshly constructed records carrying only what the statistics
/// collaborator needs; the input trades are never touched. P/L, contract
/// count, and margin are scaled by the combination's position multiplier
/// and by an optional per-strategy weight (non-reserved parameter names
/// are `strategyKey -> weight`, matched case- and whitespace-insensitively;
/// unweighted strategies keep weight 1.0).
pub fn apply_scenario(
    trades: &[CachedTrade<'_>],
    combo: &ParamCombo,
    baseline: &ScalingBaseline,
    capital_override: Option<f64>,
) -> ScaledScenario {
    let multiplier = position_multiplier(combo, baseline);

    let weights: Vec<(String, f64)> = combo
        .values
        .iter()
        .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
        .map(|(name, weight)| (normalize_strategy_key(name), *weight))
        .collect();

    let scaled = trades
        .iter()
        .map(|trade| {
            let record = trade.record;
            let weight = if weights.is_empty() {
                1.0
            } else {
                let key = normalize_strategy_key(&record.strategy);
                weights
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, w)| *w)
                    .unwrap_or(1.0)
            };
            let scale = multiplier * weight;

            // Contracts stay whole; a sized-down trade still holds at
            // least one contract. Trades recorded without a contract
            // count fall back to the whole-history average.
            let base_contracts = if record.contracts > 0.0 {
                record.contracts
            } else {
                baseline.avg_contracts
            };
            let contracts = if base_contracts > 0.0 && scale > 0.0 {
                (base_contracts * scale).round().max(1.0)
            } else {
                0.0
            };

            ScenarioTrade {
                closed_at: trade.closed_at,
                profit_loss: record.profit_loss * scale,
                contracts,
                margin_requirement: record.margin_requirement * scale,
            }
        })
        .collect();

    ScaledScenario {
        trades: scaled,
        capital: capital_override.unwrap_or(baseline.initial_capital),
    }
}

fn position_multiplier(combo: &ParamCombo, baseline: &ScalingBaseline) -> f64 {
    if let Some(kelly) = combo.value(PARAM_KELLY_FRACTION) {
        kelly / baseline.kelly_fraction
    } else if let Some(multiplier) = combo.value(PARAM_POSITION_MULTIPLIER) {
        multiplier
    } else {
        1.0
    }
}

fn normalize_strategy_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_trade_datetime, TradeRecord};

    fn record(pl: f64, contracts: f64, margin: f64, strategy: &str) -> TradeRecord {
        TradeRecord {
            open_date: "2024-01-02 09:30:00".to_string(),
            close_date: "2024-01-02 16:00:00".to_string(),
            profit_loss: pl,
            contracts,
            margin_requirement: margin,
            strategy: strategy.to_string(),
        }
    }

    fn cache(records: &[TradeRecord]) -> Vec<CachedTrade<'_>> {
        records
            .iter()
            .map(|r| CachedTrade {
                record: r,
                opened_at: parse_trade_datetime(&r.open_date).unwrap(),
                closed_at: parse_trade_datetime(&r.close_date).unwrap(),
            })
            .collect()
    }

    fn baseline() -> ScalingBaseline {
        ScalingBaseline::new(Some(0.2), 4.0, 100_000.0)
    }

    fn combo(values: &[(&str, f64)]) -> ParamCombo {
        ParamCombo {
            values: values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_kelly_ratio_multiplier() {
        let records = vec![record(100.0, 2.0, 5_000.0, "PCS")];
        let trades = cache(&records);

        // combo kelly 0.4 vs baseline 0.2 -> 2x
        let scenario = apply_scenario(
            &trades,
            &combo(&[(PARAM_KELLY_FRACTION, 0.4)]),
            &baseline(),
            None,
        );
        let t = &scenario.trades[0];
        assert!((t.profit_loss - 200.0).abs() < 1e-9);
        assert!((t.contracts - 4.0).abs() < 1e-9);
        assert!((t.margin_requirement - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_direct_position_multiplier() {
        let records = vec![record(100.0, 2.0, 5_000.0, "PCS")];
        let trades = cache(&records);

        let scenario = apply_scenario(
            &trades,
            &combo(&[(PARAM_POSITION_MULTIPLIER, 0.5)]),
            &baseline(),
            None,
        );
        assert!((scenario.trades[0].profit_loss - 50.0).abs() < 1e-9);
        // 2 contracts halved rounds to 1, never below one contract.
        assert_eq!(scenario.trades[0].contracts, 1.0);
    }

    #[test]
    fn test_strategy_weight_is_normalized() {
        let records = vec![
            record(100.0, 1.0, 1_000.0, "Put Credit Spread"),
            record(100.0, 1.0, 1_000.0, "Other"),
        ];
        let trades = cache(&records);

        let scenario = apply_scenario(
            &trades,
            &combo(&[("putcreditspread", 0.5)]),
            &baseline(),
            None,
        );
        assert!((scenario.trades[0].profit_loss - 50.0).abs() < 1e-9);
        // Unweighted strategy keeps weight 1.0.
        assert!((scenario.trades[1].profit_loss - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let records = vec![record(100.0, 2.0, 5_000.0, "PCS")];
        let before = records.clone();
        let trades = cache(&records);

        let _ = apply_scenario(
            &trades,
            &combo(&[(PARAM_POSITION_MULTIPLIER, 3.0)]),
            &baseline(),
            None,
        );
        assert_eq!(records, before);
    }

    #[test]
    fn test_missing_contracts_fall_back_to_baseline_average() {
        let records = vec![record(100.0, 0.0, 1_000.0, "PCS")];
        let trades = cache(&records);

        let scenario = apply_scenario(&trades, &combo(&[]), &baseline(), None);
        assert_eq!(scenario.trades[0].contracts, 4.0);
    }

    #[test]
    fn test_capital_override() {
        let records = vec![record(100.0, 1.0, 1_000.0, "PCS")];
        let trades = cache(&records);

        let default_cap = apply_scenario(&trades, &combo(&[]), &baseline(), None);
        assert_eq!(default_cap.capital, 100_000.0);

        let overridden = apply_scenario(&trades, &combo(&[]), &baseline(), Some(25_000.0));
        assert_eq!(overridden.capital, 25_000.0);
    }

    #[test]
    fn test_degenerate_baseline_kelly_is_floored() {
        let floored = ScalingBaseline::new(Some(0.0), 1.0, 100_000.0);
        assert_eq!(floored.kelly_fraction, 0.01);
        let missing = ScalingBaseline::new(None, 1.0, 100_000.0);
        assert_eq!(missing.kelly_fraction, 0.01);
    }
}
