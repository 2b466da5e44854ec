use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ISO-style week number as carried by the uploaded tables.
pub type Week = u32;

/// Uploaded weeks fall in `1..=MAX_WEEK`.
pub const MAX_WEEK: Week = 53;

/// Shipping route: the ordered (port, facility) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lane {
    pub port: String,
    pub facility: String,
}

impl Lane {
    /// Build a lane from raw cells, normalising both parts.
    pub fn new(port: &str, facility: &str) -> Self {
        Self {
            port: normalize_code(port),
            facility: normalize_code(facility),
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.port, self.facility)
    }
}

/// Carrier SCAC code, trimmed and upper-cased
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarrierCode(String);

impl CarrierCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CarrierCode {
    fn from(s: &str) -> Self {
        CarrierCode(normalize_code(s))
    }
}

impl fmt::Display for CarrierCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join-key normalisation shared by every table.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Identity of a shipment and of the canonical record built from it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordKey {
    pub lane: Lane,
    pub week: Week,
    pub carrier: CarrierCode,
}

/// Container volume moved by one carrier on one lane in one week
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipmentRecord {
    pub lane: Lane,
    pub carrier: CarrierCode,
    pub week: Week,
    pub container_count: u32,
    /// Raw upload rows folded into this record.
    pub source_rows: usize,
}

/// Rate quoted by a carrier for a lane, optionally for a single week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateQuote {
    pub lane: Lane,
    pub carrier: CarrierCode,
    /// `None` means the quote applies to every week.
    pub week: Option<Week>,
    pub base_rate: f64,
}

/// Raw carrier-week metrics; each one may be missing independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub on_time_rate: Option<f64>,
    pub damage_rate: Option<f64>,
    pub exception_rate: Option<f64>,
}

/// What a performance upload says about a carrier-week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceObservation {
    /// Individual metrics, scored by min-max scaling.
    Metrics(PerformanceMetrics),
    /// A score the scorecard already computed, as written there.
    Reported(Option<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub carrier: CarrierCode,
    pub week: Week,
    pub observation: PerformanceObservation,
}

/// Which rate quote priced a canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    WeekSpecific,
    AllWeeks,
}

/// Which inputs contributed to a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Provenance {
    pub shipment_rows: usize,
    pub rate: RateSource,
    pub performance: bool,
}

/// The merged unit of analysis for one (lane, carrier, week).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub lane: Lane,
    pub carrier: CarrierCode,
    pub week: Week,
    pub container_count: u32,
    pub base_rate: f64,
    pub total_rate: f64,
    /// Carrier-week score in [0, 100]. `None` when no score could be
    /// matched or computed; never defaulted to zero.
    pub performance: Option<f64>,
    pub provenance: Provenance,
}

/// All carrier options competing for one lane in one week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneWeekGroup {
    pub lane: Lane,
    pub week: Week,
    pub records: Vec<CanonicalRecord>,
}

impl LaneWeekGroup {
    pub fn new(lane: Lane, week: Week, records: Vec<CanonicalRecord>) -> Self {
        Self { lane, week, records }
    }

    pub fn is_single_candidate(&self) -> bool {
        self.records.len() == 1
    }

    pub fn total_containers(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.container_count)).sum()
    }
}

/// Partition records into lane-week groups in a single pass.
///
/// Groups come out ordered by (lane, week); records inside a group keep
/// carrier order, so every record lands in exactly one group.
pub fn group_by_lane_week(records: &[CanonicalRecord]) -> Vec<LaneWeekGroup> {
    let mut groups: BTreeMap<(Lane, Week), Vec<CanonicalRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.lane.clone(), record.week))
            .or_default()
            .push(record.clone());
    }

    groups
        .into_iter()
        .map(|((lane, week), mut records)| {
            records.sort_by(|a, b| a.carrier.cmp(&b.carrier));
            LaneWeekGroup::new(lane, week, records)
        })
        .collect()
}
