//! Point estimates, percentile bands and derived labels from a distribution.
//!
//! Everything here is empirical: percentiles are read off the pooled daily
//! values with linear interpolation between order statistics, with no
//! parametric fit.

use crate::aggregate::VariableDistribution;
use crate::types::variable::{Variable, VariableKind};
use serde::{Deserialize, Serialize};

/// How far an estimate can be trusted, driven by the number of years sampled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// No data at all; point estimates are absent.
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// One level lower, never below `Low`.
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
            Confidence::None => Confidence::None,
        }
    }
}

/// Year counts at which confidence steps up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceThresholds {
    pub medium_min_years: usize,
    pub high_min_years: usize,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            medium_min_years: 10,
            high_min_years: 20,
        }
    }
}

impl ConfidenceThresholds {
    pub fn classify(&self, years: usize) -> Confidence {
        match years {
            0 => Confidence::None,
            n if n >= self.high_min_years => Confidence::High,
            n if n >= self.medium_min_years => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelThresholds {
    pub likely_rain_probability: f64,
    pub possible_rain_probability: f64,
    pub hot_celsius: f64,
    pub freezing_celsius: f64,
    pub windy_ms: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            likely_rain_probability: 0.5,
            possible_rain_probability: 0.2,
            hot_celsius: 30.0,
            freezing_celsius: 0.0,
            windy_ms: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorConfig {
    pub confidence: ConfidenceThresholds,
    /// A day counts as wet at or above this much precipitation, mm.
    pub wet_day_threshold_mm: f64,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub labels: LabelThresholds,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidenceThresholds::default(),
            wet_day_threshold_mm: 1.0,
            lower_percentile: 10.0,
            upper_percentile: 90.0,
            labels: LabelThresholds::default(),
        }
    }
}

/// Probability that a day reaches `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Occurrence {
    pub threshold: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherLabel {
    LikelyRain,
    PossibleRain,
    LikelyDry,
    Hot,
    Freezing,
    Windy,
}

/// Summary of one variable for the requested place and day.
///
/// The `p10`/`p90` band is only present from medium confidence upwards. Below
/// that the median is still given but should be read as indicative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub variable: Variable,
    pub unit: &'static str,
    pub median: Option<f64>,
    pub p10: Option<f64>,
    pub p90: Option<f64>,
    pub mean: Option<f64>,
    /// Distinct years behind the estimate.
    pub sample_size: usize,
    /// Daily values behind the estimate.
    pub observation_count: usize,
    pub confidence: Confidence,
    pub occurrence: Option<Occurrence>,
    pub labels: Vec<WeatherLabel>,
    pub degraded_quality: bool,
}

impl Estimate {
    pub fn has_band(&self) -> bool {
        self.p10.is_some() && self.p90.is_some()
    }
}

/// Estimates one variable. An empty distribution yields confidence `none` and
/// no point estimates rather than an error.
pub fn estimate(distribution: &VariableDistribution, config: &EstimatorConfig) -> Estimate {
    let variable = distribution.variable;
    let sorted = distribution.sorted_values();
    let sample_size = distribution.sample_size();

    let mut confidence = config.confidence.classify(sample_size);
    if distribution.degraded {
        confidence = confidence.downgrade();
    }

    let median = percentile(&sorted, 50.0);
    let with_band = confidence >= Confidence::Medium;
    let (p10, p90) = if with_band {
        (
            percentile(&sorted, config.lower_percentile),
            percentile(&sorted, config.upper_percentile),
        )
    } else {
        (None, None)
    };
    let mean = (!sorted.is_empty()).then(|| sorted.iter().sum::<f64>() / sorted.len() as f64);

    let occurrence = match variable.kind() {
        VariableKind::Threshold if !sorted.is_empty() => {
            let threshold = config.wet_day_threshold_mm;
            let hits = sorted.iter().filter(|v| **v >= threshold).count();
            Some(Occurrence {
                threshold,
                probability: hits as f64 / sorted.len() as f64,
            })
        }
        _ => None,
    };

    Estimate {
        variable,
        unit: variable.unit(),
        median,
        p10,
        p90,
        mean,
        sample_size,
        observation_count: sorted.len(),
        confidence,
        labels: labels(variable, median, occurrence, &config.labels),
        occurrence,
        degraded_quality: distribution.degraded,
    }
}

fn labels(
    variable: Variable,
    median: Option<f64>,
    occurrence: Option<Occurrence>,
    thresholds: &LabelThresholds,
) -> Vec<WeatherLabel> {
    let mut labels = Vec::new();
    match variable {
        Variable::Precipitation => {
            if let Some(Occurrence { probability, .. }) = occurrence {
                labels.push(if probability >= thresholds.likely_rain_probability {
                    WeatherLabel::LikelyRain
                } else if probability >= thresholds.possible_rain_probability {
                    WeatherLabel::PossibleRain
                } else {
                    WeatherLabel::LikelyDry
                });
            }
        }
        Variable::Temperature => match median {
            Some(m) if m >= thresholds.hot_celsius => labels.push(WeatherLabel::Hot),
            Some(m) if m <= thresholds.freezing_celsius => labels.push(WeatherLabel::Freezing),
            _ => {}
        },
        Variable::WindSpeed => {
            if median.is_some_and(|m| m >= thresholds.windy_ms) {
                labels.push(WeatherLabel::Windy);
            }
        }
    }
    labels
}

/// Empirical percentile `p` (0 to 100) of ascending `sorted` values, linearly
/// interpolated between the closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() - 1) as f64 * p.clamp(0.0, 100.0) / 100.0;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Some(sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, DailyValue};
    use crate::grid::cell::CellId;
    use crate::test_support::sample_run;
    use chrono::{Datelike, NaiveDate};

    fn distribution(
        variable: Variable,
        years: std::ops::Range<i32>,
        f: impl Fn(i32, u32) -> f64,
    ) -> VariableDistribution {
        let values = years
            .flat_map(|year| {
                let f = &f;
                let start = NaiveDate::from_ymd_opt(year, 7, 7).unwrap();
                start.iter_days().take(15).map(move |date| DailyValue {
                    year,
                    date,
                    value: f(year, date.ordinal()),
                })
            })
            .collect();
        VariableDistribution {
            values,
            cells: vec![CellId::new(277, 291)],
            ..VariableDistribution::empty(variable)
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
        assert_eq!(percentile(&sorted, 50.0), Some(2.5));
        assert!((percentile(&sorted, 10.0).unwrap() - 1.3).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 90.0), Some(7.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_empty_distribution_has_no_confidence() {
        let est = estimate(
            &VariableDistribution::empty(Variable::Temperature),
            &EstimatorConfig::default(),
        );
        assert_eq!(est.confidence, Confidence::None);
        assert_eq!(est.median, None);
        assert_eq!(est.p10, None);
        assert_eq!(est.sample_size, 0);
        assert!(est.labels.is_empty());
    }

    #[test]
    fn test_paris_july_temperatures() {
        // 20 summers with afternoons between 24 and 31 °C.
        let dist = distribution(Variable::Temperature, 2000..2020, |year, day| {
            24.0 + ((year * 7 + day as i32) % 8) as f64
        });
        let est = estimate(&dist, &EstimatorConfig::default());

        let median = est.median.unwrap();
        assert!((27.0..=28.0).contains(&median), "median {median}");
        assert_eq!(est.sample_size, 20);
        assert_eq!(est.confidence, Confidence::High);
        assert!(est.p10.unwrap() >= 24.0 && est.p90.unwrap() <= 31.0);
        assert!(est.p10.unwrap() < median && median < est.p90.unwrap());
        assert!(est.labels.is_empty());
    }

    #[test]
    fn test_confidence_thresholds() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(thresholds.classify(0), Confidence::None);
        assert_eq!(thresholds.classify(4), Confidence::Low);
        assert_eq!(thresholds.classify(9), Confidence::Low);
        assert_eq!(thresholds.classify(10), Confidence::Medium);
        assert_eq!(thresholds.classify(19), Confidence::Medium);
        assert_eq!(thresholds.classify(20), Confidence::High);
    }

    #[test]
    fn test_low_confidence_has_no_band() {
        let dist = distribution(Variable::Temperature, 2000..2004, |_, day| day as f64);
        let est = estimate(&dist, &EstimatorConfig::default());
        assert_eq!(est.sample_size, 4);
        assert_eq!(est.confidence, Confidence::Low);
        assert!(est.median.is_some());
        assert!(!est.has_band());
    }

    #[test]
    fn test_degraded_quality_lowers_confidence() {
        let mut dist = distribution(Variable::WindSpeed, 1990..2015, |_, _| 4.0);
        dist.degraded = true;
        let est = estimate(&dist, &EstimatorConfig::default());
        assert_eq!(est.confidence, Confidence::Medium);
        assert!(est.degraded_quality);
        assert_eq!(Confidence::Low.downgrade(), Confidence::Low);
    }

    #[test]
    fn test_precipitation_probability_and_labels() {
        let config = EstimatorConfig::default();

        // One wet day in five.
        let dist = distribution(Variable::Precipitation, 2000..2012, |_, day| {
            if day % 5 == 0 {
                6.0
            } else {
                0.0
            }
        });
        let est = estimate(&dist, &config);
        let occurrence = est.occurrence.unwrap();
        assert_eq!(occurrence.threshold, 1.0);
        assert!((occurrence.probability - 0.2).abs() < 1e-12);
        assert_eq!(est.labels, vec![WeatherLabel::PossibleRain]);

        let wet = distribution(Variable::Precipitation, 2000..2012, |_, _| 3.0);
        assert_eq!(estimate(&wet, &config).labels, vec![WeatherLabel::LikelyRain]);

        let dry = distribution(Variable::Precipitation, 2000..2012, |_, _| 0.2);
        assert_eq!(estimate(&dry, &config).labels, vec![WeatherLabel::LikelyDry]);
    }

    #[test]
    fn test_temperature_and_wind_labels() {
        let config = EstimatorConfig::default();
        let hot = distribution(Variable::Temperature, 2000..2010, |_, _| 33.0);
        assert_eq!(estimate(&hot, &config).labels, vec![WeatherLabel::Hot]);
        let cold = distribution(Variable::Temperature, 2000..2010, |_, _| -4.0);
        assert_eq!(estimate(&cold, &config).labels, vec![WeatherLabel::Freezing]);
        let gale = distribution(Variable::WindSpeed, 2000..2010, |_, _| 14.0);
        assert_eq!(estimate(&gale, &config).labels, vec![WeatherLabel::Windy]);
        assert!(estimate(&gale, &config).occurrence.is_none());
    }

    #[test]
    fn test_estimate_from_aggregated_samples() {
        let cell = CellId::new(277, 291);
        let samples: Vec<_> = (2001..2013)
            .flat_map(|year| sample_run(cell, Variable::Temperature, year, 15, year as f64 - 2000.0))
            .collect();
        let dists = aggregate(&samples);
        let est = estimate(&dists[&Variable::Temperature], &EstimatorConfig::default());
        assert_eq!(est.sample_size, 12);
        assert_eq!(est.observation_count, 180);
        assert_eq!(est.confidence, Confidence::Medium);
        assert_eq!(est.median, Some(6.5));
    }
}
