//! Z-score outlier detection on rates and performance.
//!
//! Cost outliers are measured against two peer groups, every record on the
//! same lane and every record of the same carrier. Performance outliers are
//! measured per carrier across its weekly scores. Peer groups too small or
//! too flat to produce a z-score are reported as skipped, never silently
//! dropped.

use crate::config::AnalysisConfig;
use crate::models::{CanonicalRecord, CarrierCode, Lane, Week};
use crate::optimizer::OptimizationResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CostOutlier,
    PerformanceOutlier,
}

/// What the peer group has in common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerScope {
    Lane,
    Carrier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Grade an outlier by how far `|z|` clears the threshold.
    pub fn classify(abs_z: f64, threshold: f64) -> Self {
        if abs_z <= threshold + 1.0 {
            Severity::Low
        } else if abs_z <= threshold + 2.0 {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

/// The flagged observation. Performance flags have no lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySubject {
    pub lane: Option<Lane>,
    pub carrier: CarrierCode,
    pub week: Week,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFlag {
    pub kind: AnomalyKind,
    pub scope: PeerScope,
    pub peer_key: String,
    pub subject: AnomalySubject,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
    pub severity: Severity,
    /// Whether the optimizer picked the flagged record. Always false for
    /// performance flags.
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientSample,
    ZeroVariance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPeerGroup {
    pub kind: AnomalyKind,
    pub scope: PeerScope,
    pub peer_key: String,
    pub sample_size: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub flags: Vec<AnomalyFlag>,
    pub skipped: Vec<SkippedPeerGroup>,
}

/// Mean and sample standard deviation (n - 1).
fn sample_stats(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Flat up to rounding noise in the mean.
fn is_flat(mean: f64, std_dev: f64) -> bool {
    std_dev <= 1e-12 * mean.abs().max(1.0)
}

struct PeerGroup {
    kind: AnomalyKind,
    scope: PeerScope,
    peer_key: String,
    members: Vec<(AnomalySubject, f64, bool)>,
}

struct Detector<'a> {
    threshold: f64,
    min_sample: usize,
    report: &'a mut AnomalyReport,
}

impl Detector<'_> {
    fn scan(&mut self, group: PeerGroup) {
        let skip = |reason| SkippedPeerGroup {
            kind: group.kind,
            scope: group.scope,
            peer_key: group.peer_key.clone(),
            sample_size: group.members.len(),
            reason,
        };

        if group.members.len() < self.min_sample {
            self.report.skipped.push(skip(SkipReason::InsufficientSample));
            return;
        }
        let values: Vec<f64> = group.members.iter().map(|(_, v, _)| *v).collect();
        let (mean, std_dev) = sample_stats(&values);
        if is_flat(mean, std_dev) {
            self.report.skipped.push(skip(SkipReason::ZeroVariance));
            return;
        }

        for (subject, value, selected) in group.members {
            let z_score = (value - mean) / std_dev;
            if z_score.abs() > self.threshold {
                self.report.flags.push(AnomalyFlag {
                    kind: group.kind,
                    scope: group.scope,
                    peer_key: group.peer_key.clone(),
                    subject,
                    value,
                    mean,
                    std_dev,
                    z_score,
                    severity: Severity::classify(z_score.abs(), self.threshold),
                    selected,
                });
            }
        }
    }
}

/// Scan canonical records for cost and performance outliers.
pub fn detect(
    records: &[CanonicalRecord],
    selections: &[OptimizationResult],
    config: &AnalysisConfig,
) -> AnomalyReport {
    let selected: HashSet<(&Lane, Week, &CarrierCode)> = selections
        .iter()
        .map(|r| (&r.lane, r.week, &r.selected_carrier))
        .collect();

    let mut by_lane: BTreeMap<&Lane, Vec<(AnomalySubject, f64, bool)>> = BTreeMap::new();
    let mut by_carrier: BTreeMap<&CarrierCode, Vec<(AnomalySubject, f64, bool)>> = BTreeMap::new();
    let mut scores: BTreeMap<&CarrierCode, BTreeMap<Week, f64>> = BTreeMap::new();

    for record in records {
        let subject = AnomalySubject {
            lane: Some(record.lane.clone()),
            carrier: record.carrier.clone(),
            week: record.week,
        };
        let is_selected = selected.contains(&(&record.lane, record.week, &record.carrier));
        by_lane
            .entry(&record.lane)
            .or_default()
            .push((subject.clone(), record.total_rate, is_selected));
        by_carrier
            .entry(&record.carrier)
            .or_default()
            .push((subject, record.total_rate, is_selected));

        // The score is per carrier-week, repeated on each lane.
        if let Some(score) = record.performance {
            scores
                .entry(&record.carrier)
                .or_default()
                .entry(record.week)
                .or_insert(score);
        }
    }

    let mut report = AnomalyReport::default();
    let mut detector = Detector {
        threshold: config.anomaly_zscore_threshold,
        min_sample: config.min_peer_sample,
        report: &mut report,
    };

    for (lane, members) in by_lane {
        detector.scan(PeerGroup {
            kind: AnomalyKind::CostOutlier,
            scope: PeerScope::Lane,
            peer_key: lane.to_string(),
            members,
        });
    }
    for (carrier, members) in by_carrier {
        detector.scan(PeerGroup {
            kind: AnomalyKind::CostOutlier,
            scope: PeerScope::Carrier,
            peer_key: carrier.to_string(),
            members,
        });
    }
    for (carrier, weekly) in scores {
        let members = weekly
            .into_iter()
            .map(|(week, score)| {
                let subject = AnomalySubject {
                    lane: None,
                    carrier: carrier.clone(),
                    week,
                };
                (subject, score, false)
            })
            .collect();
        detector.scan(PeerGroup {
            kind: AnomalyKind::PerformanceOutlier,
            scope: PeerScope::Carrier,
            peer_key: carrier.to_string(),
            members,
        });
    }

    debug!("{} peer groups skipped by outlier scan", report.skipped.len());
    info!(
        "Anomaly scan flagged {} records ({} high severity)",
        report.flags.len(),
        report
            .flags
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectiveWeights;
    use crate::models::fixtures::record;
    use crate::models::group_by_lane_week;
    use crate::optimizer::{AssignmentSolver, WeightedGroupSolver};

    fn spike_lane() -> Vec<CanonicalRecord> {
        let mut records: Vec<_> = (1..=5)
            .map(|week| record("P", "F", &format!("C{week}"), week, 100.0, 1, None))
            .collect();
        records.push(record("P", "F", "C6", 6, 1000.0, 1, None));
        records
    }

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::classify(2.5, 2.0), Severity::Low);
        assert_eq!(Severity::classify(3.0, 2.0), Severity::Low);
        assert_eq!(Severity::classify(3.5, 2.0), Severity::Medium);
        assert_eq!(Severity::classify(4.01, 2.0), Severity::High);
    }

    #[test]
    fn cost_spike_is_flagged_within_lane() {
        let records = spike_lane();
        let report = detect(&records, &[], &AnalysisConfig::default());

        assert_eq!(report.flags.len(), 1);
        let flag = &report.flags[0];
        assert_eq!(flag.kind, AnomalyKind::CostOutlier);
        assert_eq!(flag.scope, PeerScope::Lane);
        assert_eq!(flag.subject.carrier.as_str(), "C6");
        assert_eq!(flag.value, 1000.0);
        assert!((flag.mean - 250.0).abs() < 1e-9);
        assert!(flag.z_score > 2.0);
        assert_eq!(flag.severity, Severity::Low);
        assert!(!flag.selected);

        // One carrier per record: every carrier peer group is too small.
        let carrier_skips = report
            .skipped
            .iter()
            .filter(|s| s.scope == PeerScope::Carrier)
            .count();
        assert_eq!(carrier_skips, 6);
    }

    #[test]
    fn small_peer_group_is_skipped_not_flagged() {
        let records = vec![
            record("P", "F", "AAAA", 1, 100.0, 1, Some(10.0)),
            record("P", "F", "AAAA", 2, 10_000.0, 1, Some(99.0)),
        ];
        let report = detect(&records, &[], &AnalysisConfig::default());

        assert!(report.flags.is_empty());
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::InsufficientSample && s.sample_size == 2));
        assert_eq!(report.skipped.len(), 3);
    }

    #[test]
    fn flat_peer_group_reports_zero_variance() {
        let records: Vec<_> = (1..=4)
            .map(|week| record("P", "F", "AAAA", week, 0.1, 3, None))
            .collect();
        let report = detect(&records, &[], &AnalysisConfig::default());

        assert!(report.flags.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().all(|s| s.reason == SkipReason::ZeroVariance));
    }

    #[test]
    fn flags_know_whether_optimizer_selected_them() {
        let records = spike_lane();
        let groups = group_by_lane_week(&records);
        let weights = ObjectiveWeights::new(1.0, 0.0).unwrap();
        let selections = WeightedGroupSolver.solve(&groups, weights).unwrap();

        // Every lane-week has one candidate, so the spike was selected.
        let report = detect(&records, &selections, &AnalysisConfig::default());
        assert!(report.flags[0].selected);
    }

    #[test]
    fn performance_dip_is_flagged_per_carrier() {
        let mut records: Vec<_> = (1..=6)
            .map(|week| record("P", "F", "AAAA", week, 100.0, 1, Some(90.0 + f64::from(week % 2))))
            .collect();
        records.push(record("P", "F", "AAAA", 7, 100.0, 1, Some(20.0)));
        // Same carrier-week seen on a second lane must not double count.
        records.push(record("Q", "F", "AAAA", 7, 100.0, 1, Some(20.0)));
        let report = detect(&records, &[], &AnalysisConfig::default());

        let perf: Vec<_> = report
            .flags
            .iter()
            .filter(|f| f.kind == AnomalyKind::PerformanceOutlier)
            .collect();
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].subject.week, 7);
        assert_eq!(perf[0].subject.lane, None);
        assert!(perf[0].z_score < -2.0);
    }
}
