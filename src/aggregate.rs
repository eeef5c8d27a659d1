//! Turns raw fetched samples into one clean distribution per variable.
//!
//! The aggregator does no statistics of its own. It filters quality, drops
//! non-finite values and merges same-day duplicates, so the estimator sees at
//! most one value per (year, date).

use crate::grid::cell::CellId;
use crate::types::sample::HistoricalSample;
use crate::types::variable::Variable;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One merged daily value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyValue {
    pub year: i32,
    pub date: NaiveDate,
    pub value: f64,
}

/// Quality-filtered, deduplicated values for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDistribution {
    pub variable: Variable,
    /// Cells that contributed at least one value.
    pub cells: Vec<CellId>,
    /// Ordered by (year, date), unique per (year, date).
    pub values: Vec<DailyValue>,
    /// Flagged samples had to be kept because they were not outnumbered.
    pub degraded: bool,
    /// Flagged samples dropped in favour of an unflagged majority.
    pub discarded_flagged: usize,
}

impl VariableDistribution {
    pub fn empty(variable: Variable) -> Self {
        Self {
            variable,
            cells: Vec::new(),
            values: Vec::new(),
            degraded: false,
            discarded_flagged: 0,
        }
    }

    /// Distinct historical years that contributed a value.
    pub fn sample_size(&self) -> usize {
        self.years().len()
    }

    pub fn observation_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn years(&self) -> BTreeSet<i32> {
        self.values.iter().map(|v| v.year).collect()
    }

    /// All values in ascending order.
    pub fn sorted_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.values.iter().map(|v| v.value).collect();
        values.sort_by(f64::total_cmp);
        values
    }
}

/// Aggregates samples, giving every cell the same weight.
pub fn aggregate(samples: &[HistoricalSample]) -> BTreeMap<Variable, VariableDistribution> {
    aggregate_weighted(samples, &HashMap::new())
}

/// Aggregates samples, merging same-day values from different cells with the
/// given interpolation weights. Weights are renormalised over the cells present
/// on each day; cells without a weight count as 1.
pub fn aggregate_weighted(
    samples: &[HistoricalSample],
    weights: &HashMap<CellId, f64>,
) -> BTreeMap<Variable, VariableDistribution> {
    let mut by_variable: BTreeMap<Variable, Vec<&HistoricalSample>> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.value.is_finite()) {
        by_variable.entry(sample.variable).or_default().push(sample);
    }

    by_variable
        .into_iter()
        .map(|(variable, samples)| (variable, distribution(variable, samples, weights)))
        .collect()
}

fn distribution(
    variable: Variable,
    samples: Vec<&HistoricalSample>,
    weights: &HashMap<CellId, f64>,
) -> VariableDistribution {
    let flagged = samples.iter().filter(|s| s.is_flagged()).count();
    let unflagged = samples.len() - flagged;
    let drop_flagged = flagged > 0 && unflagged > flagged;
    let degraded = flagged > 0 && !drop_flagged;

    // (weighted sum, weight total, plain sum, count) per day.
    let mut days: BTreeMap<(i32, NaiveDate), (f64, f64, f64, usize)> = BTreeMap::new();
    let mut cells = BTreeSet::new();
    for sample in samples {
        if drop_flagged && sample.is_flagged() {
            continue;
        }
        let weight = weights.get(&sample.cell).copied().unwrap_or(1.0).max(0.0);
        let day = days.entry((sample.year, sample.date)).or_default();
        day.0 += weight * sample.value;
        day.1 += weight;
        day.2 += sample.value;
        day.3 += 1;
        cells.insert(sample.cell);
    }

    let values = days
        .into_iter()
        .map(|((year, date), (weighted, total, plain, count))| DailyValue {
            year,
            date,
            value: if total > 0.0 {
                weighted / total
            } else {
                plain / count as f64
            },
        })
        .collect();

    VariableDistribution {
        variable,
        cells: cells.into_iter().collect(),
        values,
        degraded,
        discarded_flagged: if drop_flagged { flagged } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_run;
    use crate::types::sample::QualityFlag;

    const A: CellId = CellId { row: 27, col: 19 };
    const B: CellId = CellId { row: 28, col: 19 };

    fn flag(mut samples: Vec<HistoricalSample>) -> Vec<HistoricalSample> {
        for s in samples.iter_mut() {
            s.quality = Some(QualityFlag::Suspect);
        }
        samples
    }

    #[test]
    fn test_same_day_duplicates_are_averaged() {
        let mut samples = sample_run(A, Variable::Temperature, 2000, 5, 20.0);
        samples.extend(sample_run(A, Variable::Temperature, 2000, 5, 22.0));

        let dists = aggregate(&samples);
        let dist = &dists[&Variable::Temperature];
        assert_eq!(dist.observation_count(), 5);
        assert!(dist.values.iter().all(|v| (v.value - 21.0).abs() < 1e-12));
    }

    #[test]
    fn test_cells_merge_with_interpolation_weights() {
        let mut samples = sample_run(A, Variable::Temperature, 2000, 3, 20.0);
        samples.extend(sample_run(B, Variable::Temperature, 2000, 2, 24.0));
        let weights = HashMap::from([(A, 0.75), (B, 0.25)]);

        let dists = aggregate_weighted(&samples, &weights);
        let values: Vec<f64> = dists[&Variable::Temperature]
            .values
            .iter()
            .map(|v| v.value)
            .collect();
        // Days with both cells blend; the third day only has cell A.
        assert_eq!(values.len(), 3);
        assert!((values[0] - 21.0).abs() < 1e-12);
        assert!((values[1] - 21.0).abs() < 1e-12);
        assert!((values[2] - 20.0).abs() < 1e-12);
        assert_eq!(dists[&Variable::Temperature].cells, vec![A, B]);
    }

    #[test]
    fn test_groups_by_variable() {
        let mut samples = sample_run(A, Variable::Temperature, 2000, 4, 20.0);
        samples.extend(sample_run(A, Variable::Precipitation, 2000, 6, 0.0));
        let dists = aggregate(&samples);
        assert_eq!(dists.len(), 2);
        assert_eq!(dists[&Variable::Temperature].observation_count(), 4);
        assert_eq!(dists[&Variable::Precipitation].observation_count(), 6);
    }

    #[test]
    fn test_flagged_minority_is_dropped() {
        let mut samples = sample_run(A, Variable::WindSpeed, 2001, 6, 4.0);
        samples.extend(flag(sample_run(A, Variable::WindSpeed, 2002, 2, 40.0)));

        let dist = &aggregate(&samples)[&Variable::WindSpeed];
        assert!(!dist.degraded);
        assert_eq!(dist.discarded_flagged, 2);
        assert_eq!(dist.sample_size(), 1);
        assert!(dist.values.iter().all(|v| v.value == 4.0));
    }

    #[test]
    fn test_without_unflagged_majority_all_are_kept_and_degraded() {
        let mut samples = sample_run(A, Variable::WindSpeed, 2001, 3, 4.0);
        samples.extend(flag(sample_run(A, Variable::WindSpeed, 2002, 3, 5.0)));

        let dist = &aggregate(&samples)[&Variable::WindSpeed];
        assert!(dist.degraded);
        assert_eq!(dist.discarded_flagged, 0);
        assert_eq!(dist.observation_count(), 6);
        assert_eq!(dist.sample_size(), 2);
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let mut samples = sample_run(A, Variable::Temperature, 2000, 3, 18.0);
        samples[1].value = f64::NAN;
        let dist = &aggregate(&samples)[&Variable::Temperature];
        assert_eq!(dist.observation_count(), 2);
        assert_eq!(dist.sorted_values(), vec![18.0, 18.0]);
    }

    #[test]
    fn test_sample_size_counts_distinct_years() {
        let samples: Vec<HistoricalSample> = (1990..2000)
            .flat_map(|year| sample_run(A, Variable::Temperature, year, 15, 10.0))
            .collect();
        let dist = &aggregate(&samples)[&Variable::Temperature];
        assert_eq!(dist.sample_size(), 10);
        assert_eq!(dist.observation_count(), 150);
    }
}
