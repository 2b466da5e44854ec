//! The end-to-end analysis run.
//!
//! [`run`] reconciles raw tables and hands the result to
//! [`run_on_dataset`], which is also the entry point when only weights,
//! thresholds or filters changed and the join can be reused.

use crate::anomaly::{self, AnomalyReport};
use crate::config::AnalysisConfig;
use crate::cost::{self, RecordCost};
use crate::error::Result;
use crate::filter::RecordFilter;
use crate::forecast::{self, LaneForecast};
use crate::models::{group_by_lane_week, CanonicalRecord, CarrierCode};
use crate::optimizer::{AssignmentSolver, OptimizationResult, WeightedGroupSolver};
use crate::performance::{carrier_volume_weighted_scores, PerformanceScorer};
use crate::reconcile::{self, CoverageReport, CoverageWarning, InputTables, ReconciledDataset};
use crate::suboptimal::{self, SuboptimalSelection};
use crate::summary::{self, Dimension, DimensionSummary, StrategyComparison};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub config: AnalysisConfig,
    pub filter: RecordFilter,
    pub coverage: CoverageReport,
    pub warnings: Vec<CoverageWarning>,
    /// Canonical records removed by the filter.
    pub filtered_out: usize,
    pub records: Vec<CanonicalRecord>,
    pub costs: Vec<RecordCost>,
    pub solver: String,
    pub optimization: Vec<OptimizationResult>,
    pub anomalies: AnomalyReport,
    pub forecasts: Vec<LaneForecast>,
    pub summaries: Vec<DimensionSummary>,
    pub carrier_scores: BTreeMap<CarrierCode, f64>,
    pub strategies: StrategyComparison,
    pub suboptimal: Vec<SuboptimalSelection>,
}

/// Reconcile the uploaded tables and analyse the result.
///
/// Configuration is validated before any row is read.
pub fn run(
    inputs: &InputTables,
    config: &AnalysisConfig,
    filter: &RecordFilter,
) -> Result<AnalysisReport> {
    config.validate()?;
    let scorer = PerformanceScorer::new(config.metric_weights)?;
    let dataset = reconcile::reconcile(inputs, &scorer)?;
    run_on_dataset(&dataset, config, filter)
}

pub fn run_on_dataset(
    dataset: &ReconciledDataset,
    config: &AnalysisConfig,
    filter: &RecordFilter,
) -> Result<AnalysisReport> {
    run_on_dataset_with(&WeightedGroupSolver, dataset, config, filter)
}

/// Analyse an already reconciled dataset with the given solver.
///
/// Performance scores are recomputed only when the metric weights differ
/// from the ones the dataset was scored with.
pub fn run_on_dataset_with<S: AssignmentSolver>(
    solver: &S,
    dataset: &ReconciledDataset,
    config: &AnalysisConfig,
    filter: &RecordFilter,
) -> Result<AnalysisReport> {
    config.validate()?;
    let weights = config.objective_weights()?;

    let dataset = if dataset.metric_weights == config.metric_weights {
        Cow::Borrowed(dataset)
    } else {
        info!("Metric weights changed, rescoring performance");
        let scorer = PerformanceScorer::new(config.metric_weights)?;
        Cow::Owned(dataset.rescored(&scorer))
    };

    let (records, filtered_out) = filter.apply(&dataset.records);
    let groups = group_by_lane_week(&records);
    info!(
        "Analysing {} records in {} lane-week groups ({} filtered out)",
        records.len(),
        groups.len(),
        filtered_out
    );

    let costs = cost::cost_breakdowns(&groups)?;
    let optimization = solver.solve(&groups, weights)?;
    let anomalies = anomaly::detect(&records, &optimization, config);
    let forecasts = forecast::forecast_lanes(&records, config);

    let summaries = Dimension::ALL
        .iter()
        .map(|&dimension| -> Result<DimensionSummary> {
            Ok(DimensionSummary {
                dimension,
                rows: summary::summarize(&groups, dimension)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let strategies = summary::compare_strategies(&groups, &optimization);
    let suboptimal = suboptimal::find_suboptimal(&groups);

    Ok(AnalysisReport {
        config: config.clone(),
        filter: filter.clone(),
        coverage: dataset.coverage.clone(),
        warnings: dataset.warnings.clone(),
        filtered_out,
        carrier_scores: carrier_volume_weighted_scores(&records),
        costs,
        solver: solver.name().to_string(),
        optimization,
        anomalies,
        forecasts,
        summaries,
        strategies,
        suboptimal,
        records,
    })
}
