//! Aggregate views for the dashboard tables.

use crate::cost;
use crate::error::EmptyGroupError;
use crate::models::{CanonicalRecord, CarrierCode, Lane, LaneWeekGroup, Week};
use crate::optimizer::OptimizationResult;
use crate::performance::volume_weighted_scores;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Port,
    Facility,
    Lane,
    Carrier,
    Week,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Port,
        Dimension::Facility,
        Dimension::Lane,
        Dimension::Carrier,
        Dimension::Week,
    ];

    fn key(self, record: &CanonicalRecord) -> SummaryKey {
        match self {
            Dimension::Port => SummaryKey::Text(record.lane.port.clone()),
            Dimension::Facility => SummaryKey::Text(record.lane.facility.clone()),
            Dimension::Lane => SummaryKey::Text(record.lane.to_string()),
            Dimension::Carrier => SummaryKey::Text(record.carrier.to_string()),
            Dimension::Week => SummaryKey::Week(record.week),
        }
    }
}

/// Row label; weeks stay numeric so they sort as numbers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum SummaryKey {
    Text(String),
    Week(Week),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub key: SummaryKey,
    pub records: usize,
    pub containers: u64,
    pub total_cost: f64,
    pub potential_savings: f64,
    pub savings_pct: f64,
    /// Container-weighted mean base rate.
    pub avg_base_rate: f64,
    /// Container-weighted mean over present scores only.
    pub avg_performance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionSummary {
    pub dimension: Dimension,
    pub rows: Vec<SummaryRow>,
}

#[derive(Default)]
struct Totals {
    records: usize,
    containers: u64,
    total_cost: f64,
    potential_savings: f64,
    base_rate_sum: f64,
}

/// Roll records up by one dimension, with savings measured against each
/// record's own lane-week group.
pub fn summarize(
    groups: &[LaneWeekGroup],
    dimension: Dimension,
) -> Result<Vec<SummaryRow>, EmptyGroupError> {
    let mut totals: BTreeMap<SummaryKey, Totals> = BTreeMap::new();
    for group in groups {
        let costs = cost::cost_breakdown(group)?;
        for (record, cost) in group.records.iter().zip(&costs) {
            let entry = totals.entry(dimension.key(record)).or_default();
            entry.records += 1;
            entry.containers += u64::from(record.container_count);
            entry.total_cost += record.total_rate;
            entry.potential_savings += cost.potential_savings;
            entry.base_rate_sum += record.base_rate;
        }
    }

    let records: Vec<CanonicalRecord> = groups.iter().flat_map(|g| g.records.clone()).collect();
    let mut scores = volume_weighted_scores(&records, |r| dimension.key(r));

    Ok(totals
        .into_iter()
        .map(|(key, t)| SummaryRow {
            avg_performance: scores.remove(&key),
            key,
            records: t.records,
            containers: t.containers,
            total_cost: t.total_cost,
            potential_savings: t.potential_savings,
            savings_pct: if t.total_cost > 0.0 {
                t.potential_savings / t.total_cost * 100.0
            } else {
                0.0
            },
            avg_base_rate: if t.containers > 0 {
                t.total_cost / t.containers as f64
            } else {
                t.base_rate_sum / t.records as f64
            },
        })
        .collect())
}

/// Total spend under each selection rule, and what each saves against
/// what was actually paid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyComparison {
    pub current_cost: f64,
    pub cheapest_cost: f64,
    pub optimized_cost: f64,
    pub best_performance_cost: f64,
    pub cheapest_savings: f64,
    pub optimized_savings: f64,
    pub best_performance_savings: f64,
}

/// Highest present score; ties go to the lower base rate, then carrier code.
fn best_performer(group: &LaneWeekGroup) -> Option<&CanonicalRecord> {
    group
        .records
        .iter()
        .filter(|r| r.performance.is_some())
        .min_by(|a, b| {
            let (pa, pb) = (a.performance.unwrap_or_default(), b.performance.unwrap_or_default());
            pb.total_cmp(&pa)
                .then(a.base_rate.total_cmp(&b.base_rate))
                .then_with(|| a.carrier.cmp(&b.carrier))
        })
}

pub fn compare_strategies(
    groups: &[LaneWeekGroup],
    selections: &[OptimizationResult],
) -> StrategyComparison {
    let selected: HashMap<(&Lane, Week), &CarrierCode> = selections
        .iter()
        .map(|r| ((&r.lane, r.week), &r.selected_carrier))
        .collect();

    let mut comparison = StrategyComparison::default();
    for group in groups {
        let volume = group.total_containers() as f64;
        let current: f64 = group.records.iter().map(|r| r.total_rate).sum();
        let lowest_base = group
            .records
            .iter()
            .map(|r| r.base_rate)
            .min_by(f64::total_cmp)
            .unwrap_or_default();
        let base_rate_of = |carrier: &CarrierCode| {
            group
                .records
                .iter()
                .find(|r| &r.carrier == carrier)
                .map(|r| r.base_rate)
        };

        comparison.current_cost += current;
        comparison.cheapest_cost += group
            .records
            .iter()
            .map(|r| cost::total_rate(lowest_base, r.container_count))
            .sum::<f64>();
        comparison.optimized_cost += match selected
            .get(&(&group.lane, group.week))
            .and_then(|carrier| base_rate_of(*carrier))
        {
            Some(base_rate) => base_rate * volume,
            None => {
                warn!("No optimizer selection for {} week {}", group.lane, group.week);
                current
            }
        };
        comparison.best_performance_cost += match best_performer(group) {
            Some(best) => best.base_rate * volume,
            None => current,
        };
    }

    comparison.cheapest_savings = comparison.current_cost - comparison.cheapest_cost;
    comparison.optimized_savings = comparison.current_cost - comparison.optimized_cost;
    comparison.best_performance_savings = comparison.current_cost - comparison.best_performance_cost;
    info!(
        "Strategy costs: current ${:.2}, cheapest ${:.2}, optimized ${:.2}, best performance ${:.2}",
        comparison.current_cost,
        comparison.cheapest_cost,
        comparison.optimized_cost,
        comparison.best_performance_cost
    );
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectiveWeights;
    use crate::models::fixtures::record;
    use crate::models::group_by_lane_week;
    use crate::optimizer::{AssignmentSolver, WeightedGroupSolver};

    fn groups() -> Vec<LaneWeekGroup> {
        group_by_lane_week(&[
            record("PortA", "FacX", "A", 5, 1000.0, 2, Some(70.0)),
            record("PortA", "FacX", "B", 5, 900.0, 2, Some(95.0)),
            record("PortA", "FacX", "C", 5, 950.0, 2, Some(80.0)),
            record("PortB", "FacX", "A", 5, 500.0, 4, None),
            record("PortB", "FacX", "C", 6, 400.0, 1, None),
        ])
    }

    #[test]
    fn carrier_summary_rolls_up_across_lanes() {
        let rows = summarize(&groups(), Dimension::Carrier).unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                SummaryKey::Text("A".into()),
                SummaryKey::Text("B".into()),
                SummaryKey::Text("C".into()),
            ]
        );

        let a = &rows[0];
        assert_eq!(a.records, 2);
        assert_eq!(a.containers, 6);
        assert_eq!(a.total_cost, 4000.0);
        assert_eq!(a.potential_savings, 200.0);
        assert!((a.savings_pct - 5.0).abs() < 1e-9);
        assert!((a.avg_base_rate - 4000.0 / 6.0).abs() < 1e-9);
        // Absent scores do not drag the average down.
        assert_eq!(a.avg_performance, Some(70.0));
    }

    #[test]
    fn week_summary_sorts_numerically_and_keeps_absent_scores_absent() {
        let groups = group_by_lane_week(&[
            record("P", "F", "A", 10, 100.0, 1, None),
            record("P", "F", "A", 9, 100.0, 1, None),
        ]);
        let rows = summarize(&groups, Dimension::Week).unwrap();
        assert_eq!(rows[0].key, SummaryKey::Week(9));
        assert_eq!(rows[1].key, SummaryKey::Week(10));
        assert!(rows.iter().all(|r| r.avg_performance.is_none()));
    }

    #[test]
    fn strategy_costs() {
        let groups = groups();
        let weights = ObjectiveWeights::new(0.5, 0.5).unwrap();
        let selections = WeightedGroupSolver.solve(&groups, weights).unwrap();
        let strategies = compare_strategies(&groups, &selections);

        // 2000 + 1800 + 1900 + 2000 + 400
        assert_eq!(strategies.current_cost, 8100.0);
        // PortA week 5 all at 900; single-carrier groups unchanged.
        assert_eq!(strategies.cheapest_cost, 5400.0 + 2000.0 + 400.0);
        // B selected on PortA: 6 containers at 900.
        assert_eq!(strategies.optimized_cost, 5400.0 + 2000.0 + 400.0);
        // B is also the best performer; unscored groups keep current cost.
        assert_eq!(strategies.best_performance_cost, 5400.0 + 2000.0 + 400.0);
        assert_eq!(strategies.cheapest_savings, 300.0);
    }

    #[test]
    fn best_performance_can_cost_more() {
        let groups = group_by_lane_week(&[
            record("P", "F", "CHEAP", 1, 100.0, 2, Some(40.0)),
            record("P", "F", "GOOD", 1, 150.0, 2, Some(90.0)),
        ]);
        let weights = ObjectiveWeights::new(1.0, 0.0).unwrap();
        let selections = WeightedGroupSolver.solve(&groups, weights).unwrap();
        let strategies = compare_strategies(&groups, &selections);

        assert_eq!(strategies.current_cost, 500.0);
        assert_eq!(strategies.optimized_cost, 400.0);
        assert_eq!(strategies.optimized_savings, 100.0);
        assert_eq!(strategies.best_performance_cost, 600.0);
        assert_eq!(strategies.best_performance_savings, -100.0);
    }

    #[test]
    fn cost_only_optimum_never_costs_more_than_current() {
        let groups = group_by_lane_week(&[
            record("P", "F", "A", 1, 100.0, 10, None),
            record("P", "F", "B", 1, 500.0, 1, None),
        ]);
        let weights = ObjectiveWeights::new(1.0, 0.0).unwrap();
        let selections = WeightedGroupSolver.solve(&groups, weights).unwrap();
        let strategies = compare_strategies(&groups, &selections);

        assert_eq!(selections[0].selected_carrier.as_str(), "A");
        assert_eq!(strategies.current_cost, 1500.0);
        assert_eq!(strategies.cheapest_cost, 1100.0);
        assert_eq!(strategies.optimized_cost, 1100.0);
        assert_eq!(strategies.optimized_savings, 400.0);
    }
}
