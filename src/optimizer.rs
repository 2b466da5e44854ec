//! Carrier assignment per lane-week.
//!
//! Each group is scored independently: base rate and performance are
//! min-max normalised inside the group and blended with the configured
//! objective weights. Lower objective wins. The winner is awarded the whole
//! lane-week volume, so comparing base rates compares what each carrier
//! would charge for the lane.

use crate::config::ObjectiveWeights;
use crate::cost;
use crate::error::{EmptyGroupError, Result};
use crate::models::{CarrierCode, Lane, LaneWeekGroup, Week};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Objectives closer than this are treated as equal.
pub const OBJECTIVE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub carrier: CarrierCode,
    pub base_rate: f64,
    pub total_rate: f64,
    pub normalized_cost: f64,
    pub performance_penalty: f64,
    pub objective: f64,
    pub performance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub lane: Lane,
    pub week: Week,
    pub selected_carrier: CarrierCode,
    pub selected_base_rate: f64,
    pub selected_total_rate: f64,
    pub cheapest_total_rate: f64,
    /// Lane-week volume at the selected base rate minus the same volume at
    /// the lowest base rate.
    pub premium_over_cheapest: f64,
    pub objective: f64,
    /// Every candidate, best first.
    pub ranked: Vec<RankedCandidate>,
    pub single_candidate: bool,
}

/// Picks one carrier for every lane-week group.
///
/// [`WeightedGroupSolver`] treats groups independently. A solver enforcing
/// carrier capacity across groups would implement this same trait.
pub trait AssignmentSolver {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        groups: &[LaneWeekGroup],
        weights: ObjectiveWeights,
    ) -> Result<Vec<OptimizationResult>>;
}

/// Exhaustive per-group minimum of the weighted objective.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedGroupSolver;

impl AssignmentSolver for WeightedGroupSolver {
    fn name(&self) -> &'static str {
        "weighted-group"
    }

    fn solve(
        &self,
        groups: &[LaneWeekGroup],
        weights: ObjectiveWeights,
    ) -> Result<Vec<OptimizationResult>> {
        // Fields are public, so re-check what the caller built.
        let weights = ObjectiveWeights::new(weights.cost, weights.performance)?;

        let results = groups
            .iter()
            .map(|group| optimize_group(group, weights))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let premium: f64 = results.iter().map(|r| r.premium_over_cheapest).sum();
        info!(
            "{} solver assigned {} lane-week groups (premium over cheapest: ${:.2})",
            self.name(),
            results.len(),
            premium
        );
        Ok(results)
    }
}

fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Score and rank one group.
pub fn optimize_group(
    group: &LaneWeekGroup,
    weights: ObjectiveWeights,
) -> std::result::Result<OptimizationResult, EmptyGroupError> {
    let cheapest = cost::cheapest_total_rate(group)?;
    let cost_range = span(group.records.iter().map(|r| r.base_rate));
    let perf_range = span(group.records.iter().filter_map(|r| r.performance));

    let candidates = group
        .records
        .iter()
        .map(|record| {
            let normalized_cost = match cost_range {
                Some((lo, hi)) if hi > lo => (record.base_rate - lo) / (hi - lo),
                _ => 0.0,
            };
            let performance_penalty = match (record.performance, perf_range) {
                (Some(score), Some((lo, hi))) if hi > lo => 1.0 - (score - lo) / (hi - lo),
                (Some(_), _) => 0.0,
                (None, _) => 1.0,
            };
            RankedCandidate {
                carrier: record.carrier.clone(),
                base_rate: record.base_rate,
                total_rate: record.total_rate,
                normalized_cost,
                performance_penalty,
                objective: weights.cost * normalized_cost
                    + weights.performance * performance_penalty,
                performance: record.performance,
            }
        })
        .collect();

    let ranked = rank(candidates);
    let Some(best) = ranked.first() else {
        return Err(EmptyGroupError {
            lane: group.lane.clone(),
            week: group.week,
        });
    };
    debug!(
        "{} week {}: {} selected from {} candidates",
        group.lane,
        group.week,
        best.carrier,
        ranked.len()
    );

    let lowest_base = cost_range.map_or(best.base_rate, |(lo, _)| lo);
    let volume = group.total_containers() as f64;

    Ok(OptimizationResult {
        lane: group.lane.clone(),
        week: group.week,
        selected_carrier: best.carrier.clone(),
        selected_base_rate: best.base_rate,
        selected_total_rate: best.total_rate,
        cheapest_total_rate: cheapest,
        premium_over_cheapest: ((best.base_rate - lowest_base) * volume).max(0.0),
        objective: best.objective,
        single_candidate: group.is_single_candidate(),
        ranked,
    })
}

/// `a` should rank ahead of `b`: lower objective, then lower base rate,
/// then lower carrier code.
fn precedes(a: &RankedCandidate, b: &RankedCandidate) -> bool {
    if (a.objective - b.objective).abs() > OBJECTIVE_TOLERANCE {
        return a.objective < b.objective;
    }
    match a.base_rate.total_cmp(&b.base_rate) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a.carrier < b.carrier,
    }
}

/// Selection ranking. The tolerance makes `precedes` non-transitive, so
/// candidates are picked one at a time instead of handed to `sort_by`.
fn rank(mut pool: Vec<RankedCandidate>) -> Vec<RankedCandidate> {
    let mut ranked = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let mut best = 0;
        for i in 1..pool.len() {
            if precedes(&pool[i], &pool[best]) {
                best = i;
            }
        }
        ranked.push(pool.swap_remove(best));
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::fixtures::record;
    use crate::models::group_by_lane_week;

    fn weights(cost: f64, performance: f64) -> ObjectiveWeights {
        ObjectiveWeights::new(cost, performance).unwrap()
    }

    fn candidate<'a>(result: &'a OptimizationResult, carrier: &str) -> &'a RankedCandidate {
        result
            .ranked
            .iter()
            .find(|c| c.carrier.as_str() == carrier)
            .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn worked_example_selects_cheapest_best_performer() {
        let records = vec![
            record("PortA", "FacX", "A", 5, 1000.0, 2, Some(70.0)),
            record("PortA", "FacX", "B", 5, 900.0, 2, Some(95.0)),
            record("PortA", "FacX", "C", 5, 950.0, 2, Some(80.0)),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.5, 0.5)).unwrap();
        let result = &results[0];

        let (a, b, c) = (
            candidate(result, "A"),
            candidate(result, "B"),
            candidate(result, "C"),
        );
        assert!(close(a.normalized_cost, 1.0));
        assert!(close(b.normalized_cost, 0.0));
        assert!(close(c.normalized_cost, 0.5));
        assert!(close(a.performance_penalty, 1.0));
        assert!(close(b.performance_penalty, 0.0));
        assert!(close(c.performance_penalty, 0.6));
        assert!(close(a.objective, 1.0));
        assert!(close(b.objective, 0.0));
        assert!(close(c.objective, 0.55));

        assert_eq!(result.selected_carrier.as_str(), "B");
        assert_eq!(result.selected_total_rate, 1800.0);
        assert_eq!(result.cheapest_total_rate, 1800.0);
        assert_eq!(result.premium_over_cheapest, 0.0);
        let order: Vec<_> = result.ranked.iter().map(|c| c.carrier.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn performance_weight_can_buy_a_premium() {
        let records = vec![
            record("P", "F", "CHEAP", 1, 100.0, 1, Some(10.0)),
            record("P", "F", "GOOD", 1, 120.0, 1, Some(90.0)),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.2, 0.8)).unwrap();

        assert_eq!(results[0].selected_carrier.as_str(), "GOOD");
        // Both containers at 120 instead of 100.
        assert_eq!(results[0].premium_over_cheapest, 40.0);
    }

    #[test]
    fn cost_compares_rates_not_carrier_volume() {
        // A handled ten containers at the lower rate, B one at a higher rate.
        let records = vec![
            record("P", "F", "A", 1, 100.0, 10, None),
            record("P", "F", "B", 1, 500.0, 1, None),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(1.0, 0.0)).unwrap();
        let result = &results[0];

        assert_eq!(result.selected_carrier.as_str(), "A");
        assert_eq!(result.selected_base_rate, 100.0);
        assert_eq!(candidate(result, "A").normalized_cost, 0.0);
        assert_eq!(candidate(result, "B").normalized_cost, 1.0);
        assert_eq!(result.premium_over_cheapest, 0.0);
        // Per-record cheapest stays on total rate.
        assert_eq!(result.cheapest_total_rate, 500.0);
    }

    #[test]
    fn premium_prices_the_whole_lane_volume() {
        let records = vec![
            record("P", "F", "CHEAP", 1, 100.0, 3, Some(10.0)),
            record("P", "F", "GOOD", 1, 120.0, 1, Some(90.0)),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.2, 0.8)).unwrap();

        assert_eq!(results[0].selected_carrier.as_str(), "GOOD");
        assert!(close(results[0].premium_over_cheapest, 80.0));
    }

    #[test]
    fn single_candidate_is_selected_trivially() {
        let records = vec![record("P", "F", "ONLY", 3, 500.0, 4, None)];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.5, 0.5)).unwrap();
        let result = &results[0];

        assert!(result.single_candidate);
        assert_eq!(result.selected_carrier.as_str(), "ONLY");
        assert_eq!(result.selected_total_rate, result.cheapest_total_rate);
        assert_eq!(result.premium_over_cheapest, 0.0);
        assert_eq!(result.ranked.len(), 1);
    }

    #[test]
    fn absent_performance_is_worst_not_excluded() {
        let records = vec![
            record("P", "F", "KNOWN", 1, 100.0, 1, Some(50.0)),
            record("P", "F", "UNKNOWN", 1, 100.0, 1, None),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.5, 0.5)).unwrap();
        let result = &results[0];

        assert_eq!(result.ranked.len(), 2);
        assert_eq!(candidate(result, "UNKNOWN").performance_penalty, 1.0);
        // Single present score: zero range normalises to best.
        assert_eq!(candidate(result, "KNOWN").performance_penalty, 0.0);
        assert_eq!(result.selected_carrier.as_str(), "KNOWN");
    }

    #[test]
    fn ties_break_on_base_rate_then_carrier_code() {
        let records = vec![
            record("P", "F", "ZZZZ", 1, 200.0, 1, Some(90.0)),
            record("P", "F", "YYYY", 1, 100.0, 1, Some(90.0)),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.0, 1.0)).unwrap();
        assert_eq!(results[0].selected_carrier.as_str(), "YYYY");

        let records = vec![
            record("P", "F", "BBBB", 1, 100.0, 1, None),
            record("P", "F", "AAAA", 1, 100.0, 1, None),
        ];
        let groups = group_by_lane_week(&records);
        let results = WeightedGroupSolver.solve(&groups, weights(0.5, 0.5)).unwrap();
        assert_eq!(results[0].selected_carrier.as_str(), "AAAA");
    }

    #[test]
    fn result_does_not_depend_on_record_order() {
        let forward = vec![
            record("P", "F", "A", 1, 100.0, 1, Some(80.0)),
            record("P", "F", "B", 1, 100.0, 1, Some(80.0)),
            record("P", "F", "C", 1, 90.0, 1, Some(70.0)),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let solve = |records: Vec<_>| {
            let group = LaneWeekGroup::new(Lane::new("P", "F"), 1, records);
            optimize_group(&group, weights(0.5, 0.5)).unwrap()
        };
        assert_eq!(solve(forward), solve(backward));
    }

    #[test]
    fn empty_group_and_bad_weights_are_errors() {
        let empty = LaneWeekGroup::new(Lane::new("P", "F"), 1, Vec::new());
        assert!(matches!(
            WeightedGroupSolver.solve(&[empty], weights(0.5, 0.5)),
            Err(EngineError::EmptyGroup(_))
        ));

        let unchecked = ObjectiveWeights {
            cost: 0.6,
            performance: 0.6,
        };
        assert!(matches!(
            WeightedGroupSolver.solve(&[], unchecked),
            Err(EngineError::Config(_))
        ));
    }
}
