use crate::models::{ParamCombo, ParamRange};

/// Cartesian-product combination generator over the configured parameter
/// ranges.
///
/// Per-axis values are `min, min+step, min+2*step, ...` up to and
/// including `max`, with every value clamped so floating-point drift can
/// never step outside the range. Iteration order is parameter-insertion
/// order, nested, lexicographic, which makes "first wins" tie-breaking in
/// the optimizer reproducible.
///
/// The total count is the closed-form product of per-axis counts and is
/// available without materializing anything, so callers can budget and
/// report before the sweep starts.
#[derive(Debug, Clone)]
pub struct ParamGrid {
    axes: Vec<ParamAxis>,
}

#[derive(Debug, Clone)]
struct ParamAxis {
    name: String,
    values: Vec<f64>,
}

/// Closed-form per-range value count: floor((max - min) / step) + 1.
///
/// The epsilon absorbs float drift so e.g. (0.5, 1.5, 0.5) counts 3, not 2.
pub fn range_value_count(range: &ParamRange) -> u64 {
    ((range.max - range.min) / range.step + 1e-9).floor() as u64 + 1
}

/// Closed-form combination count for a range set, without materializing.
/// An empty set produces exactly one (empty) combination.
pub fn combination_count(ranges: &[ParamRange]) -> u64 {
    ranges.iter().map(range_value_count).product()
}

impl ParamGrid {
    pub fn new(ranges: &[ParamRange]) -> Self {
        let axes = ranges
            .iter()
            .map(|range| {
                let count = range_value_count(range) as usize;
                let values = (0..count)
                    .map(|i| (range.min + i as f64 * range.step).min(range.max))
                    .collect();
                ParamAxis {
                    name: range.name.clone(),
                    values,
                }
            })
            .collect();
        Self { axes }
    }

    pub fn total_count(&self) -> u64 {
        self.axes.iter().map(|a| a.values.len() as u64).product()
    }

    /// Iterate all combinations via a mixed-radix counter over the axis
    /// indices (no recursion, no upfront allocation of the full list).
    pub fn combinations(&self) -> Combinations<'_> {
        Combinations {
            grid: self,
            indices: vec![0; self.axes.len()],
            done: false,
        }
    }

    pub fn materialize(&self) -> Vec<ParamCombo> {
        self.combinations().collect()
    }
}

pub struct Combinations<'a> {
    grid: &'a ParamGrid,
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Combinations<'_> {
    type Item = ParamCombo;

    fn next(&mut self) -> Option<ParamCombo> {
        if self.done {
            return None;
        }

        let combo = ParamCombo {
            values: self
                .grid
                .axes
                .iter()
                .zip(&self.indices)
                .map(|(axis, &i)| (axis.name.clone(), axis.values[i]))
                .collect(),
        };

        // Increment the mixed-radix counter, last axis fastest.
        self.done = true;
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.grid.axes[pos].values.len() {
                self.done = false;
                break;
            }
            self.indices[pos] = 0;
        }

        Some(combo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(name: &str, min: f64, max: f64, step: f64) -> ParamRange {
        ParamRange {
            name: name.to_string(),
            min,
            max,
            step,
        }
    }

    #[test]
    fn test_count_matches_materialized_length() {
        let ranges = vec![
            range("a", 0.5, 1.5, 0.5),
            range("b", 1.0, 3.0, 1.0),
            range("c", 10.0, 10.0, 5.0),
        ];
        let grid = ParamGrid::new(&ranges);

        assert_eq!(combination_count(&ranges), 3 * 3 * 1);
        assert_eq!(grid.total_count(), 9);
        assert_eq!(grid.materialize().len(), 9);
    }

    #[test]
    fn test_float_drift_does_not_drop_final_value() {
        // 0.1 steps accumulate binary error; the last value must still be
        // emitted and must not exceed max.
        let ranges = vec![range("x", 0.1, 0.3, 0.1)];
        let grid = ParamGrid::new(&ranges);
        let combos = grid.materialize();

        assert_eq!(combos.len(), 3);
        let last = combos.last().unwrap().value("x").unwrap();
        assert!(last <= 0.3);
        assert!((last - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_iteration_order_is_nested_lexicographic() {
        let ranges = vec![range("a", 1.0, 2.0, 1.0), range("b", 10.0, 20.0, 10.0)];
        let combos = ParamGrid::new(&ranges).materialize();

        let pairs: Vec<(f64, f64)> = combos
            .iter()
            .map(|c| (c.value("a").unwrap(), c.value("b").unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1.0, 10.0), (1.0, 20.0), (2.0, 10.0), (2.0, 20.0)]
        );
    }

    #[test]
    fn test_determinism() {
        let ranges = vec![range("a", 0.0, 1.0, 0.25), range("b", 5.0, 6.0, 0.5)];
        let grid = ParamGrid::new(&ranges);
        assert_eq!(grid.materialize(), grid.materialize());
    }

    #[test]
    fn test_empty_ranges_yield_single_empty_combination() {
        let grid = ParamGrid::new(&[]);
        assert_eq!(grid.total_count(), 1);
        let combos = grid.materialize();
        assert_eq!(combos.len(), 1);
        assert!(combos[0].values.is_empty());
    }

    #[test]
    fn test_degenerate_range_single_value() {
        let ranges = vec![range("a", 2.5, 2.5, 1.0)];
        let combos = ParamGrid::new(&ranges).materialize();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].value("a"), Some(2.5));
    }
}
