//! Data reconciliation: validate, clean and join the uploaded tables.
//!
//! Shipments and rate quotes are inner-joined on (lane, carrier, week);
//! performance is left-joined on (carrier, week) only, since scorecards are
//! kept per carrier rather than per lane. Every row that does not make it
//! into the canonical set is counted in the [`CoverageReport`] and described
//! by a [`CoverageWarning`].

use crate::config::MetricWeights;
use crate::cost;
use crate::error::{Result, SchemaError};
use crate::models::{
    CanonicalRecord, CarrierCode, Lane, PerformanceMetrics, PerformanceObservation,
    PerformanceRecord, Provenance, RateQuote, RateSource, RecordKey, ShipmentRecord, Week,
    MAX_WEEK,
};
use crate::performance::{CarrierWeek, PerformanceScorer};
use crate::table::{
    cell, normalize_header, parse_count, parse_date_week, parse_number, parse_week, Column,
    Table, TableKind,
};
use csv::StringRecord;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

const PORT: Column = Column::new("port", &["discharged_port"]);
const FACILITY: Column = Column::new("facility", &["fc"]);
const CARRIER: Column = Column::new("carrier", &["dray_scac_fl", "scac"]);
const WEEK: Column = Column::new("week", &["week_number"]);
const ARRIVAL_DATE: Column = Column::new("arrival_date", &["ssl_ata"]);
const CONTAINER_COUNT: Column = Column::new("container_count", &["containers"]);
const BASE_RATE: Column = Column::new("base_rate", &["rate"]);
const ON_TIME: Column = Column::new("on_time_rate", &["on_time"]);
const DAMAGE: Column = Column::new("damage_rate", &["damage"]);
const EXCEPTION: Column = Column::new("exception_rate", &["exceptions"]);
const SCORE: Column = Column::new("score", &["total_score", "performance_score"]);
const SCORECARD_METRIC: Column = Column::new("metrics", &["metric"]);

/// Scorecard row label holding the combined score.
const SCORECARD_TOTAL_LABEL: &str = "total_score";

/// Row-level problems logged individually before switching to a count.
const LOGGED_ISSUES: usize = 5;

/// The uploaded tables for one analysis run.
#[derive(Debug, Clone)]
pub struct InputTables {
    pub shipments: Table,
    pub rates: Table,
    pub performance: Option<Table>,
}

/// Match counts the dashboard shows for data-quality diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub shipment_rows: usize,
    pub rate_rows: usize,
    pub performance_rows: usize,
    pub invalid_rows: usize,
    pub duplicate_rows: usize,
    pub matched: usize,
    pub unmatched_shipments: usize,
    pub unmatched_rates: usize,
    pub performance_matched: usize,
    pub performance_unmatched: usize,
}

/// Non-fatal data-quality finding.
///
/// `row` is the 1-based data row, header excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoverageWarning {
    UnmatchedShipment {
        lane: Lane,
        carrier: CarrierCode,
        week: Week,
        containers: u32,
    },
    UnmatchedRate {
        lane: Lane,
        carrier: CarrierCode,
        week: Option<Week>,
    },
    MissingPerformance {
        carrier: CarrierCode,
        week: Week,
    },
    InvalidRow {
        table: TableKind,
        row: usize,
        reason: String,
    },
    DuplicateRow {
        table: TableKind,
        row: usize,
        key: String,
    },
}

/// Canonical records plus everything needed to explain and re-score them.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledDataset {
    pub records: Vec<CanonicalRecord>,
    pub performance: Vec<PerformanceRecord>,
    pub coverage: CoverageReport,
    pub warnings: Vec<CoverageWarning>,
    /// Metric weights the attached scores were computed with.
    pub metric_weights: MetricWeights,
    pub has_performance_table: bool,
}

impl ReconciledDataset {
    /// Recompute performance scores under different metric weights,
    /// leaving the shipment/rate join untouched.
    pub fn rescored(&self, scorer: &PerformanceScorer) -> Self {
        let mut records = self.records.clone();
        let mut coverage = self.coverage.clone();
        let mut warnings: Vec<CoverageWarning> = self
            .warnings
            .iter()
            .filter(|w| !matches!(w, CoverageWarning::MissingPerformance { .. }))
            .cloned()
            .collect();

        let scores = scorer.score(&self.performance);
        attach_performance(
            &mut records,
            &scores,
            self.has_performance_table,
            &mut coverage,
            &mut warnings,
        );

        Self {
            records,
            performance: self.performance.clone(),
            coverage,
            warnings,
            metric_weights: scorer.weights(),
            has_performance_table: self.has_performance_table,
        }
    }
}

enum WeekSource {
    Column(usize),
    ArrivalDate(usize),
}

struct ShipmentLayout {
    port: usize,
    facility: usize,
    carrier: usize,
    week: WeekSource,
    containers: Option<usize>,
}

struct RateLayout {
    port: usize,
    facility: usize,
    carrier: usize,
    base_rate: usize,
    week: Option<usize>,
}

enum PerformanceLayout {
    Metrics {
        carrier: usize,
        week: usize,
        on_time: usize,
        damage: usize,
        exception: usize,
    },
    Reported {
        carrier: usize,
        week: usize,
        score: usize,
    },
    /// Wide layout: one `WK<n>` column per week.
    Scorecard {
        carrier: usize,
        metric: Option<usize>,
        weeks: Vec<(usize, Week)>,
    },
}

type RateKey = (Lane, CarrierCode, Option<Week>);

/// Join the uploaded tables into canonical records.
///
/// Fails with a [`SchemaError`] before reading any row when a required
/// column is missing from any table.
pub fn reconcile(inputs: &InputTables, scorer: &PerformanceScorer) -> Result<ReconciledDataset> {
    let shipment_layout = shipment_layout(&inputs.shipments)?;
    let rate_layout = rate_layout(&inputs.rates)?;
    let performance_layout = inputs
        .performance
        .as_ref()
        .map(performance_layout)
        .transpose()?;

    let mut coverage = CoverageReport {
        shipment_rows: inputs.shipments.len(),
        rate_rows: inputs.rates.len(),
        performance_rows: inputs.performance.as_ref().map_or(0, Table::len),
        ..CoverageReport::default()
    };
    let mut warnings = Vec::new();

    let shipments = parse_shipments(&inputs.shipments, &shipment_layout, &mut warnings);
    let rates = parse_rates(&inputs.rates, &rate_layout, &mut warnings);
    let performance = match (&inputs.performance, &performance_layout) {
        (Some(table), Some(layout)) => parse_performance(table, layout, &mut warnings),
        _ => Vec::new(),
    };
    info!(
        "Parsed {} shipment keys, {} rate quotes, {} carrier-week performance rows",
        shipments.len(),
        rates.len(),
        performance.len()
    );

    let mut records = Vec::with_capacity(shipments.len());
    let mut used_rates: HashSet<RateKey> = HashSet::new();

    for (key, shipment) in &shipments {
        let specific = (key.lane.clone(), key.carrier.clone(), Some(key.week));
        let general = (key.lane.clone(), key.carrier.clone(), None);

        let (quote, source, rate_key) = if let Some(q) = rates.get(&specific) {
            (q, RateSource::WeekSpecific, specific)
        } else if let Some(q) = rates.get(&general) {
            (q, RateSource::AllWeeks, general)
        } else {
            if coverage.unmatched_shipments < LOGGED_ISSUES {
                warn!(
                    "No rate quote for {} {} week {}",
                    key.lane, key.carrier, key.week
                );
            }
            coverage.unmatched_shipments += 1;
            warnings.push(CoverageWarning::UnmatchedShipment {
                lane: key.lane.clone(),
                carrier: key.carrier.clone(),
                week: key.week,
                containers: shipment.container_count,
            });
            continue;
        };
        used_rates.insert(rate_key);

        records.push(CanonicalRecord {
            lane: shipment.lane.clone(),
            carrier: shipment.carrier.clone(),
            week: shipment.week,
            container_count: shipment.container_count,
            base_rate: quote.base_rate,
            total_rate: cost::total_rate(quote.base_rate, shipment.container_count),
            performance: None,
            provenance: Provenance {
                shipment_rows: shipment.source_rows,
                rate: source,
                performance: false,
            },
        });
    }

    for (key, quote) in &rates {
        if !used_rates.contains(key) {
            coverage.unmatched_rates += 1;
            warnings.push(CoverageWarning::UnmatchedRate {
                lane: quote.lane.clone(),
                carrier: quote.carrier.clone(),
                week: quote.week,
            });
        }
    }
    coverage.matched = records.len();

    let scores = scorer.score(&performance);
    attach_performance(
        &mut records,
        &scores,
        performance_layout.is_some(),
        &mut coverage,
        &mut warnings,
    );

    // A scorecard row can carry several findings; count it once.
    let mut invalid: HashSet<(TableKind, usize)> = HashSet::new();
    let mut duplicate: HashSet<(TableKind, usize)> = HashSet::new();
    for warning in &warnings {
        match warning {
            CoverageWarning::InvalidRow { table, row, .. } => {
                invalid.insert((*table, *row));
            }
            CoverageWarning::DuplicateRow { table, row, .. } => {
                duplicate.insert((*table, *row));
            }
            _ => {}
        }
    }
    coverage.invalid_rows = invalid.len();
    coverage.duplicate_rows = duplicate.len();

    info!(
        "Reconciled {} canonical records ({} unmatched shipments, {} unmatched rates, {} with performance)",
        coverage.matched,
        coverage.unmatched_shipments,
        coverage.unmatched_rates,
        coverage.performance_matched
    );
    if coverage.unmatched_shipments > LOGGED_ISSUES {
        warn!(
            "{} shipment keys in total had no rate quote",
            coverage.unmatched_shipments
        );
    }

    Ok(ReconciledDataset {
        records,
        performance,
        coverage,
        warnings,
        metric_weights: scorer.weights(),
        has_performance_table: performance_layout.is_some(),
    })
}

/// Left join of carrier-week scores onto canonical records.
fn attach_performance(
    records: &mut [CanonicalRecord],
    scores: &HashMap<CarrierWeek, Option<f64>>,
    has_performance_table: bool,
    coverage: &mut CoverageReport,
    warnings: &mut Vec<CoverageWarning>,
) {
    coverage.performance_matched = 0;
    coverage.performance_unmatched = 0;
    let mut missing: BTreeSet<CarrierWeek> = BTreeSet::new();

    for record in records.iter_mut() {
        let key = (record.carrier.clone(), record.week);
        record.performance = scores.get(&key).copied().flatten();
        record.provenance.performance = record.performance.is_some();

        if record.performance.is_some() {
            coverage.performance_matched += 1;
        } else {
            coverage.performance_unmatched += 1;
            if has_performance_table {
                missing.insert(key);
            }
        }
    }

    if !missing.is_empty() {
        debug!("{} carrier-weeks have no usable performance score", missing.len());
    }
    warnings.extend(
        missing
            .into_iter()
            .map(|(carrier, week)| CoverageWarning::MissingPerformance { carrier, week }),
    );
}

fn missing_columns(table: &Table, columns: &[&Column]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| table.column(c).is_none())
        .map(|c| c.name.to_string())
        .collect()
}

fn schema_error(table: &Table, missing: Vec<String>) -> SchemaError {
    SchemaError {
        table: table.kind(),
        missing,
    }
}

fn shipment_layout(table: &Table) -> Result<ShipmentLayout, SchemaError> {
    let mut missing = missing_columns(table, &[&PORT, &FACILITY, &CARRIER]);
    let week = match (table.column(&WEEK), table.column(&ARRIVAL_DATE)) {
        (Some(i), _) => Some(WeekSource::Column(i)),
        (None, Some(i)) => Some(WeekSource::ArrivalDate(i)),
        (None, None) => {
            missing.push(format!("{} (or {})", WEEK.name, ARRIVAL_DATE.name));
            None
        }
    };

    match (table.column(&PORT), table.column(&FACILITY), table.column(&CARRIER), week) {
        (Some(port), Some(facility), Some(carrier), Some(week)) => {
            Ok(ShipmentLayout {
                port,
                facility,
                carrier,
                week,
                containers: table.column(&CONTAINER_COUNT),
            })
        }
        _ => Err(schema_error(table, missing)),
    }
}

fn rate_layout(table: &Table) -> Result<RateLayout, SchemaError> {
    let missing = missing_columns(table, &[&PORT, &FACILITY, &CARRIER, &BASE_RATE]);
    match (
        table.column(&PORT),
        table.column(&FACILITY),
        table.column(&CARRIER),
        table.column(&BASE_RATE),
    ) {
        (Some(port), Some(facility), Some(carrier), Some(base_rate)) => Ok(RateLayout {
            port,
            facility,
            carrier,
            base_rate,
            week: table.column(&WEEK),
        }),
        _ => Err(schema_error(table, missing)),
    }
}

fn scorecard_week(header: &str) -> Option<Week> {
    header
        .strip_prefix("wk")
        .and_then(|n| n.trim_start_matches('_').parse().ok())
        .filter(|w| (1..=MAX_WEEK).contains(w))
}

fn performance_layout(table: &Table) -> Result<PerformanceLayout, SchemaError> {
    let Some(carrier) = table.column(&CARRIER) else {
        let mut missing = vec![CARRIER.name.to_string()];
        if table.column(&WEEK).is_none() {
            missing.push(WEEK.name.to_string());
        }
        return Err(schema_error(table, missing));
    };

    let Some(week) = table.column(&WEEK) else {
        let weeks: Vec<(usize, Week)> = table
            .headers()
            .iter()
            .enumerate()
            .filter_map(|(i, h)| scorecard_week(h).map(|w| (i, w)))
            .collect();
        if weeks.is_empty() {
            return Err(schema_error(table, vec![WEEK.name.to_string()]));
        }
        return Ok(PerformanceLayout::Scorecard {
            carrier,
            metric: table.column(&SCORECARD_METRIC),
            weeks,
        });
    };

    match (
        table.column(&ON_TIME),
        table.column(&DAMAGE),
        table.column(&EXCEPTION),
        table.column(&SCORE),
    ) {
        (Some(on_time), Some(damage), Some(exception), _) => Ok(PerformanceLayout::Metrics {
            carrier,
            week,
            on_time,
            damage,
            exception,
        }),
        (_, _, _, Some(score)) => Ok(PerformanceLayout::Reported {
            carrier,
            week,
            score,
        }),
        _ => {
            let metrics = missing_columns(table, &[&ON_TIME, &DAMAGE, &EXCEPTION]).join(", ");
            Err(schema_error(table, vec![format!("{} (or {})", metrics, SCORE.name)]))
        }
    }
}

fn invalid_row(table: TableKind, index: usize, reason: String) -> CoverageWarning {
    CoverageWarning::InvalidRow {
        table,
        row: index + 1,
        reason,
    }
}

type RowResult<T> = std::result::Result<T, String>;

fn required_codes<'a>(
    row: &'a StringRecord,
    port: usize,
    facility: usize,
    carrier: usize,
) -> RowResult<(&'a str, &'a str, &'a str)> {
    let codes = (cell(row, port), cell(row, facility), cell(row, carrier));
    if codes.0.is_empty() || codes.1.is_empty() || codes.2.is_empty() {
        return Err("port, facility and carrier must not be blank".to_string());
    }
    Ok(codes)
}

fn shipment_row(row: &StringRecord, layout: &ShipmentLayout) -> RowResult<(RecordKey, u32)> {
    let (port, facility, carrier) =
        required_codes(row, layout.port, layout.facility, layout.carrier)?;
    let week = match layout.week {
        WeekSource::Column(idx) => parse_week(cell(row, idx))?,
        WeekSource::ArrivalDate(idx) => parse_date_week(cell(row, idx))?,
    };
    // Without a count column every row is one container.
    let containers = match layout.containers {
        Some(idx) => parse_count(cell(row, idx))?,
        None => 1,
    };
    let key = RecordKey {
        lane: Lane::new(port, facility),
        week,
        carrier: CarrierCode::from(carrier),
    };
    Ok((key, containers))
}

fn parse_shipments(
    table: &Table,
    layout: &ShipmentLayout,
    warnings: &mut Vec<CoverageWarning>,
) -> BTreeMap<RecordKey, ShipmentRecord> {
    let mut shipments: BTreeMap<RecordKey, ShipmentRecord> = BTreeMap::new();
    let mut invalid = 0usize;

    for (i, row) in table.rows().iter().enumerate() {
        match shipment_row(row, layout) {
            Ok((key, containers)) => {
                let entry = shipments.entry(key.clone()).or_insert_with(|| ShipmentRecord {
                    lane: key.lane,
                    carrier: key.carrier,
                    week: key.week,
                    container_count: 0,
                    source_rows: 0,
                });
                entry.container_count = entry.container_count.saturating_add(containers);
                entry.source_rows += 1;
            }
            Err(reason) => {
                if invalid < LOGGED_ISSUES {
                    warn!("Skipping shipment row {}: {}", i + 1, reason);
                }
                invalid += 1;
                warnings.push(invalid_row(TableKind::Shipment, i, reason));
            }
        }
    }

    if invalid > 0 {
        warn!("{} shipment rows could not be parsed", invalid);
    }
    shipments
}

fn rate_row(row: &StringRecord, layout: &RateLayout) -> RowResult<RateQuote> {
    let (port, facility, carrier) =
        required_codes(row, layout.port, layout.facility, layout.carrier)?;
    let base_rate = match parse_number(cell(row, layout.base_rate))? {
        Some(rate) if rate >= 0.0 => rate,
        Some(rate) => return Err(format!("base rate {rate} is negative")),
        None => return Err("base rate is blank".to_string()),
    };
    // A blank week cell makes the quote valid for every week.
    let week = match layout.week.map(|idx| cell(row, idx)) {
        Some(raw) if !raw.is_empty() => Some(parse_week(raw)?),
        _ => None,
    };
    Ok(RateQuote {
        lane: Lane::new(port, facility),
        carrier: CarrierCode::from(carrier),
        week,
        base_rate,
    })
}

fn parse_rates(
    table: &Table,
    layout: &RateLayout,
    warnings: &mut Vec<CoverageWarning>,
) -> BTreeMap<RateKey, RateQuote> {
    let mut rates: BTreeMap<RateKey, RateQuote> = BTreeMap::new();

    for (i, row) in table.rows().iter().enumerate() {
        let quote = match rate_row(row, layout) {
            Ok(quote) => quote,
            Err(reason) => {
                warnings.push(invalid_row(TableKind::Rate, i, reason));
                continue;
            }
        };

        match rates.entry((quote.lane.clone(), quote.carrier.clone(), quote.week)) {
            Entry::Vacant(slot) => {
                slot.insert(quote);
            }
            Entry::Occupied(_) => {
                let week = quote.week.map_or_else(|| "*".to_string(), |w| w.to_string());
                let key = format!("{} {} week {}", quote.lane, quote.carrier, week);
                debug!("Duplicate rate quote for {}", key);
                warnings.push(CoverageWarning::DuplicateRow {
                    table: TableKind::Rate,
                    row: i + 1,
                    key,
                });
            }
        }
    }
    rates
}

fn metric(row: &StringRecord, index: usize, name: &str) -> RowResult<Option<f64>> {
    parse_number(cell(row, index)).map_err(|e| format!("{name}: {e}"))
}

fn carrier_cell(row: &StringRecord, index: usize) -> RowResult<CarrierCode> {
    match cell(row, index) {
        "" => Err("carrier must not be blank".to_string()),
        code => Ok(CarrierCode::from(code)),
    }
}

fn metrics_row(
    row: &StringRecord,
    carrier: usize,
    week: usize,
    [on_time, damage, exception]: [usize; 3],
) -> RowResult<PerformanceRecord> {
    Ok(PerformanceRecord {
        carrier: carrier_cell(row, carrier)?,
        week: parse_week(cell(row, week))?,
        observation: PerformanceObservation::Metrics(PerformanceMetrics {
            on_time_rate: metric(row, on_time, ON_TIME.name)?,
            damage_rate: metric(row, damage, DAMAGE.name)?,
            exception_rate: metric(row, exception, EXCEPTION.name)?,
        }),
    })
}

fn reported_row(
    row: &StringRecord,
    carrier: usize,
    week: usize,
    score: usize,
) -> RowResult<PerformanceRecord> {
    Ok(PerformanceRecord {
        carrier: carrier_cell(row, carrier)?,
        week: parse_week(cell(row, week))?,
        observation: PerformanceObservation::Reported(metric(row, score, SCORE.name)?),
    })
}

/// Rows of one performance upload, long layouts giving one record per row
/// and the wide scorecard one per week column.
fn performance_rows(
    row: &StringRecord,
    layout: &PerformanceLayout,
) -> Vec<RowResult<PerformanceRecord>> {
    match layout {
        PerformanceLayout::Metrics {
            carrier,
            week,
            on_time,
            damage,
            exception,
        } => vec![metrics_row(row, *carrier, *week, [*on_time, *damage, *exception])],
        PerformanceLayout::Reported {
            carrier,
            week,
            score,
        } => vec![reported_row(row, *carrier, *week, *score)],
        PerformanceLayout::Scorecard {
            carrier,
            metric: label,
            weeks,
        } => {
            let is_total = label.map_or(true, |idx| {
                normalize_header(cell(row, idx)) == SCORECARD_TOTAL_LABEL
            });
            // Other scorecard metrics are not scores.
            if !is_total {
                return Vec::new();
            }
            let code = match carrier_cell(row, *carrier) {
                Ok(code) => code,
                Err(reason) => return vec![Err(reason)],
            };
            weeks
                .iter()
                .map(|&(column, week)| -> RowResult<PerformanceRecord> {
                    Ok(PerformanceRecord {
                        carrier: code.clone(),
                        week,
                        observation: PerformanceObservation::Reported(metric(
                            row,
                            column,
                            SCORE.name,
                        )?),
                    })
                })
                .collect()
        }
    }
}

fn parse_performance(
    table: &Table,
    layout: &PerformanceLayout,
    warnings: &mut Vec<CoverageWarning>,
) -> Vec<PerformanceRecord> {
    let mut seen: HashSet<CarrierWeek> = HashSet::new();
    let mut records = Vec::new();

    for (i, row) in table.rows().iter().enumerate() {
        for parsed in performance_rows(row, layout) {
            match parsed {
                Ok(record) if seen.insert((record.carrier.clone(), record.week)) => {
                    records.push(record)
                }
                Ok(record) => warnings.push(CoverageWarning::DuplicateRow {
                    table: TableKind::Performance,
                    row: i + 1,
                    key: format!("{} week {}", record.carrier, record.week),
                }),
                Err(reason) => warnings.push(invalid_row(TableKind::Performance, i, reason)),
            }
        }
    }
    records
}
