//! Carrier-week performance scoring.
//!
//! Raw metrics are min-max scaled across the performance data loaded for
//! the current run, so scores only compare within that run.

use crate::config::MetricWeights;
use crate::error::ConfigError;
use crate::models::{CanonicalRecord, CarrierCode, PerformanceObservation, PerformanceRecord, Week};
use std::collections::{BTreeMap, HashMap};

pub type CarrierWeek = (CarrierCode, Week);

/// Observed range of one metric across the loaded dataset.
#[derive(Debug, Clone, Copy)]
struct MetricRange {
    min: f64,
    max: f64,
}

impl MetricRange {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        values.fold(None, |acc, v| match acc {
            None => Some(Self { min: v, max: v }),
            Some(r) => Some(Self {
                min: r.min.min(v),
                max: r.max.max(v),
            }),
        })
    }

    /// Higher raw value is better.
    fn scale_up(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            1.0
        } else {
            (value - self.min) / span
        }
    }

    /// Lower raw value is better.
    fn scale_down(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            1.0
        } else {
            (self.max - value) / span
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceScorer {
    weights: MetricWeights,
}

impl PerformanceScorer {
    pub fn new(weights: MetricWeights) -> Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> MetricWeights {
        self.weights
    }

    /// Score every carrier-week in the loaded performance data.
    ///
    /// A carrier-week missing any metric maps to `None`. When the same
    /// carrier-week appears twice the first observation wins.
    pub fn score(&self, records: &[PerformanceRecord]) -> HashMap<CarrierWeek, Option<f64>> {
        let metrics = || {
            records.iter().filter_map(|r| match r.observation {
                PerformanceObservation::Metrics(m) => Some(m),
                PerformanceObservation::Reported(_) => None,
            })
        };
        let on_time = MetricRange::from_values(metrics().filter_map(|m| m.on_time_rate));
        let damage = MetricRange::from_values(metrics().filter_map(|m| m.damage_rate));
        let exception = MetricRange::from_values(metrics().filter_map(|m| m.exception_rate));

        let mut scores = HashMap::with_capacity(records.len());
        for record in records {
            let score = match record.observation {
                PerformanceObservation::Reported(value) => value.map(normalize_reported),
                PerformanceObservation::Metrics(m) => {
                    match (
                        m.on_time_rate.zip(on_time),
                        m.damage_rate.zip(damage),
                        m.exception_rate.zip(exception),
                    ) {
                        (Some((ot, ot_range)), Some((dmg, dmg_range)), Some((exc, exc_range))) => {
                            let blended = self.weights.on_time * ot_range.scale_up(ot)
                                + self.weights.damage * dmg_range.scale_down(dmg)
                                + self.weights.exception * exc_range.scale_down(exc);
                            Some((blended * 100.0).clamp(0.0, 100.0))
                        }
                        _ => None,
                    }
                }
            };
            scores
                .entry((record.carrier.clone(), record.week))
                .or_insert(score);
        }
        scores
    }
}

/// Bring a scorecard value onto the 0-100 scale.
///
/// Values up to 1 are fractions, values up to 100 are percentages and
/// anything larger is capped.
pub fn normalize_reported(raw: f64) -> f64 {
    if raw <= 1.0 {
        (raw * 100.0).max(0.0)
    } else {
        raw.min(100.0)
    }
}

/// Container-weighted mean score per key over records that have one.
///
/// Keys without any present score are left out of the map rather than
/// given a default.
pub fn volume_weighted_scores<K, F>(records: &[CanonicalRecord], key: F) -> BTreeMap<K, f64>
where
    K: Ord,
    F: Fn(&CanonicalRecord) -> K,
{
    let mut sums: BTreeMap<K, (f64, f64, f64, usize)> = BTreeMap::new();
    for record in records {
        if let Some(score) = record.performance {
            let entry = sums.entry(key(record)).or_default();
            let volume = f64::from(record.container_count);
            entry.0 += score * volume;
            entry.1 += volume;
            entry.2 += score;
            entry.3 += 1;
        }
    }

    sums.into_iter()
        .map(|(k, (weighted, volume, plain, n))| {
            // Zero-volume keys fall back to the plain mean.
            let score = if volume > 0.0 { weighted / volume } else { plain / n as f64 };
            (k, score)
        })
        .collect()
}

pub fn carrier_volume_weighted_scores(records: &[CanonicalRecord]) -> BTreeMap<CarrierCode, f64> {
    volume_weighted_scores(records, |r| r.carrier.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use crate::models::PerformanceMetrics;

    fn metrics(carrier: &str, week: Week, ot: Option<f64>, dmg: Option<f64>, exc: Option<f64>) -> PerformanceRecord {
        PerformanceRecord {
            carrier: CarrierCode::from(carrier),
            week,
            observation: PerformanceObservation::Metrics(PerformanceMetrics {
                on_time_rate: ot,
                damage_rate: dmg,
                exception_rate: exc,
            }),
        }
    }

    fn key(carrier: &str, week: Week) -> CarrierWeek {
        (CarrierCode::from(carrier), week)
    }

    #[test]
    fn min_max_scaling_spans_loaded_dataset() {
        let scorer = PerformanceScorer::new(MetricWeights::default()).unwrap();
        let records = vec![
            metrics("BEST", 5, Some(99.0), Some(0.0), Some(1.0)),
            metrics("WORST", 5, Some(80.0), Some(2.0), Some(9.0)),
            metrics("MID", 5, Some(89.5), Some(1.0), Some(5.0)),
        ];
        let scores = scorer.score(&records);

        assert_eq!(scores[&key("BEST", 5)], Some(100.0));
        assert_eq!(scores[&key("WORST", 5)], Some(0.0));
        let mid = scores[&key("MID", 5)].unwrap();
        assert!((mid - 50.0).abs() < 1e-9);
    }

    #[test]
    fn missing_metric_leaves_score_absent() {
        let scorer = PerformanceScorer::new(MetricWeights::default()).unwrap();
        let records = vec![
            metrics("AAAA", 1, Some(90.0), None, Some(1.0)),
            metrics("BBBB", 1, Some(95.0), Some(0.5), Some(2.0)),
        ];
        let scores = scorer.score(&records);
        assert_eq!(scores[&key("AAAA", 1)], None);
        assert!(scores[&key("BBBB", 1)].is_some());
    }

    #[test]
    fn flat_metric_counts_as_best() {
        let scorer = PerformanceScorer::new(MetricWeights {
            on_time: 1.0,
            damage: 0.0,
            exception: 0.0,
        })
        .unwrap();
        let records = vec![
            metrics("AAAA", 1, Some(90.0), Some(1.0), Some(1.0)),
            metrics("BBBB", 1, Some(90.0), Some(3.0), Some(2.0)),
        ];
        let scores = scorer.score(&records);
        assert_eq!(scores[&key("AAAA", 1)], Some(100.0));
        assert_eq!(scores[&key("BBBB", 1)], Some(100.0));
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let err = PerformanceScorer::new(MetricWeights {
            on_time: 0.6,
            damage: 0.3,
            exception: 0.2,
        });
        assert!(matches!(err, Err(ConfigError::WeightSum { .. })));
    }

    #[test]
    fn reported_scores_are_rescaled() {
        assert_eq!(normalize_reported(0.85), 85.0);
        assert_eq!(normalize_reported(85.0), 85.0);
        assert_eq!(normalize_reported(140.0), 100.0);

        let scorer = PerformanceScorer::new(MetricWeights::default()).unwrap();
        let records = vec![
            PerformanceRecord {
                carrier: CarrierCode::from("AAAA"),
                week: 3,
                observation: PerformanceObservation::Reported(Some(0.9)),
            },
            PerformanceRecord {
                carrier: CarrierCode::from("BBBB"),
                week: 3,
                observation: PerformanceObservation::Reported(None),
            },
        ];
        let scores = scorer.score(&records);
        assert_eq!(scores[&key("AAAA", 3)], Some(90.0));
        assert_eq!(scores[&key("BBBB", 3)], None);
    }

    #[test]
    fn volume_weighting_ignores_absent_scores() {
        let records = vec![
            record("P", "F", "AAAA", 1, 100.0, 3, Some(90.0)),
            record("P", "F", "AAAA", 2, 100.0, 1, Some(50.0)),
            record("P", "F", "AAAA", 3, 100.0, 5, None),
            record("P", "F", "BBBB", 1, 100.0, 2, None),
        ];
        let weighted = carrier_volume_weighted_scores(&records);
        assert_eq!(weighted.len(), 1);
        assert!((weighted[&CarrierCode::from("AAAA")] - 80.0).abs() < 1e-9);
    }
}
