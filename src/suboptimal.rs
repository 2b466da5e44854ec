use crate::models::{CarrierCode, Lane, LaneWeekGroup, Week};
use serde::Serialize;
use tracing::info;

/// A carrier used on a lane-week while another candidate there was both
/// cheaper and better performing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuboptimalSelection {
    pub lane: Lane,
    pub week: Week,
    pub carrier: CarrierCode,
    pub containers: u32,
    pub base_rate: f64,
    pub performance: f64,
    pub alternative: CarrierCode,
    pub alternative_base_rate: f64,
    pub alternative_performance: f64,
    /// Base-rate difference over the record's containers.
    pub cost_savings: f64,
    pub performance_gain: f64,
}

/// Records dominated by another candidate in their own group.
///
/// Only present scores take part: a record or alternative without one is
/// never called better or worse.
pub fn find_suboptimal(groups: &[LaneWeekGroup]) -> Vec<SuboptimalSelection> {
    let mut found = Vec::new();
    for group in groups {
        for record in &group.records {
            let Some(score) = record.performance else {
                continue;
            };
            let alternative = group.records.iter().find_map(|alt| {
                let alt_score = alt.performance?;
                (alt.base_rate < record.base_rate && alt_score > score).then_some((alt, alt_score))
            });

            if let Some((alt, alt_score)) = alternative {
                found.push(SuboptimalSelection {
                    lane: group.lane.clone(),
                    week: group.week,
                    carrier: record.carrier.clone(),
                    containers: record.container_count,
                    base_rate: record.base_rate,
                    performance: score,
                    alternative: alt.carrier.clone(),
                    alternative_base_rate: alt.base_rate,
                    alternative_performance: alt_score,
                    cost_savings: (record.base_rate - alt.base_rate)
                        * f64::from(record.container_count),
                    performance_gain: alt_score - score,
                });
            }
        }
    }

    if !found.is_empty() {
        let savings: f64 = found.iter().map(|s| s.cost_savings).sum();
        info!(
            "{} dominated carrier choices, ${:.2} recoverable",
            found.len(),
            savings
        );
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use crate::models::group_by_lane_week;

    #[test]
    fn dominated_choice_is_reported() {
        let groups = group_by_lane_week(&[
            record("P", "F", "A", 1, 1000.0, 3, Some(70.0)),
            record("P", "F", "B", 1, 900.0, 2, Some(95.0)),
            record("P", "F", "C", 1, 950.0, 1, Some(80.0)),
        ]);
        let found = find_suboptimal(&groups);

        assert_eq!(found.len(), 2);
        let a = &found[0];
        assert_eq!(a.carrier.as_str(), "A");
        assert_eq!(a.alternative.as_str(), "B");
        assert_eq!(a.cost_savings, 300.0);
        assert_eq!(a.performance_gain, 25.0);

        let c = &found[1];
        assert_eq!(c.carrier.as_str(), "C");
        assert_eq!(c.alternative.as_str(), "B");
        assert_eq!(c.cost_savings, 50.0);
    }

    #[test]
    fn cheaper_but_worse_is_not_dominating() {
        let groups = group_by_lane_week(&[
            record("P", "F", "A", 1, 1000.0, 1, Some(90.0)),
            record("P", "F", "B", 1, 900.0, 1, Some(60.0)),
            record("P", "F", "C", 1, 800.0, 1, None),
        ]);
        assert!(find_suboptimal(&groups).is_empty());
    }
}
