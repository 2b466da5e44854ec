//! Cost and savings arithmetic over lane-week groups.

use crate::error::EmptyGroupError;
use crate::models::{CanonicalRecord, CarrierCode, LaneWeekGroup};
use serde::Serialize;

/// Savings view of one record against its lane-week group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordCost {
    pub carrier: CarrierCode,
    pub total_rate: f64,
    pub cheapest_total_rate: f64,
    pub potential_savings: f64,
    pub savings_pct: f64,
}

pub fn total_rate(base_rate: f64, container_count: u32) -> f64 {
    base_rate * f64::from(container_count)
}

pub fn cheapest_total_rate(group: &LaneWeekGroup) -> Result<f64, EmptyGroupError> {
    group
        .records
        .iter()
        .map(|r| r.total_rate)
        .min_by(f64::total_cmp)
        .ok_or_else(|| EmptyGroupError {
            lane: group.lane.clone(),
            week: group.week,
        })
}

/// Premium paid over the group's cheapest option; zero for the cheapest.
pub fn potential_savings(record: &CanonicalRecord, cheapest: f64) -> f64 {
    (record.total_rate - cheapest).max(0.0)
}

/// Savings as a share of the record's own spend. Zero-rate moves are
/// legitimate and report 0%.
pub fn savings_pct(record: &CanonicalRecord, cheapest: f64) -> f64 {
    if record.total_rate > 0.0 {
        potential_savings(record, cheapest) / record.total_rate * 100.0
    } else {
        0.0
    }
}

/// Savings view of every record in a group, from one scan for the minimum.
pub fn cost_breakdown(group: &LaneWeekGroup) -> Result<Vec<RecordCost>, EmptyGroupError> {
    let cheapest = cheapest_total_rate(group)?;
    Ok(group
        .records
        .iter()
        .map(|record| RecordCost {
            carrier: record.carrier.clone(),
            total_rate: record.total_rate,
            cheapest_total_rate: cheapest,
            potential_savings: potential_savings(record, cheapest),
            savings_pct: savings_pct(record, cheapest),
        })
        .collect())
}

/// Savings rows for every group, in group order.
pub fn cost_breakdowns(groups: &[LaneWeekGroup]) -> Result<Vec<RecordCost>, EmptyGroupError> {
    let mut costs = Vec::with_capacity(groups.iter().map(|g| g.records.len()).sum());
    for group in groups {
        costs.extend(cost_breakdown(group)?);
    }
    Ok(costs)
}
