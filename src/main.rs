//! Carrier tender analysis over CSV uploads.
//!
//! Usage:
//!   cargo run --release --bin tender_optimizer -- --shipments <CSV> --rates <CSV> [OPTIONS]
//!
//! Options:
//!   --performance <CSV>   Carrier performance (metrics, scores or weekly scorecard)
//!   --config <JSON>       Analysis configuration file; flags below override it
//!   --cost-weight <F>     Weight of normalised cost in the objective
//!   --port/--facility/--carrier/--week   Restrict the analysis (repeatable)
//!   --output <JSON>       Write the full report as JSON

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tender_optimizer::analysis::AnalysisReport;
use tender_optimizer::forecast::{Forecast, TrendMetric};
use tender_optimizer::table::{Table, TableKind};
use tender_optimizer::{AnalysisConfig, InputTables, RecordFilter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tender_optimizer")]
#[command(about = "Reconcile carrier tenders, optimise carrier choice per lane-week and flag outliers")]
struct Args {
    /// Shipment volume CSV
    #[arg(long)]
    shipments: PathBuf,

    /// Carrier rate CSV
    #[arg(long)]
    rates: PathBuf,

    /// Carrier performance CSV
    #[arg(long)]
    performance: Option<PathBuf>,

    /// JSON analysis configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weight of normalised cost (performance gets the remainder)
    #[arg(long)]
    cost_weight: Option<f64>,

    /// |z| above which a value is an outlier
    #[arg(long)]
    zscore_threshold: Option<f64>,

    /// Weeks to project past the last observed week
    #[arg(long)]
    horizon: Option<u32>,

    /// Only these ports
    #[arg(long = "port")]
    ports: Vec<String>,

    /// Only these facilities
    #[arg(long = "facility")]
    facilities: Vec<String>,

    /// Only these carriers
    #[arg(long = "carrier")]
    carriers: Vec<String>,

    /// Only these weeks
    #[arg(long = "week")]
    weeks: Vec<u32>,

    /// Rows shown per console table
    #[arg(long, default_value = "10")]
    top: usize,

    /// Write the full report here as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };

    if let Some(cost_weight) = args.cost_weight {
        config.cost_weight = cost_weight;
        config.performance_weight = None;
    }
    if let Some(threshold) = args.zscore_threshold {
        config.anomaly_zscore_threshold = threshold;
    }
    if let Some(horizon) = args.horizon {
        config.forecast_horizon = horizon;
    }
    Ok(config)
}

fn load_table(kind: TableKind, path: &Path) -> Result<Table> {
    let table = Table::from_path(kind, path)
        .with_context(|| format!("Failed to load {} data from {}", kind, path.display()))?;
    info!("Loaded {} {} rows from {:?}", table.len(), kind, path);
    Ok(table)
}

fn print_section_header(title: &str) {
    println!("\n{}", "═".repeat(85));
    println!("  {}", title);
    println!("{}\n", "═".repeat(85));
}

fn print_report(report: &AnalysisReport, top: usize) {
    let coverage = &report.coverage;
    print_section_header("DATA COVERAGE");
    println!("  Shipment rows:          {:>10}", coverage.shipment_rows);
    println!("  Rate rows:              {:>10}", coverage.rate_rows);
    println!("  Performance rows:       {:>10}", coverage.performance_rows);
    println!("  Invalid / duplicate:    {:>10} / {}", coverage.invalid_rows, coverage.duplicate_rows);
    println!("  Matched records:        {:>10}", coverage.matched);
    println!("  Unmatched shipments:    {:>10}", coverage.unmatched_shipments);
    println!("  Unused rate quotes:     {:>10}", coverage.unmatched_rates);
    println!(
        "  With performance:       {:>10} ({} without)",
        coverage.performance_matched, coverage.performance_unmatched
    );
    if report.filtered_out > 0 {
        println!("  Filtered out:           {:>10}", report.filtered_out);
    }

    let s = &report.strategies;
    print_section_header("STRATEGY COMPARISON");
    println!("  {:<22} {:>16} {:>16}", "Strategy", "Cost", "Savings");
    println!("  {}", "─".repeat(56));
    println!("  {:<22} {:>16.2} {:>16}", "Current", s.current_cost, "-");
    println!("  {:<22} {:>16.2} {:>16.2}", "Cheapest", s.cheapest_cost, s.cheapest_savings);
    println!("  {:<22} {:>16.2} {:>16.2}", "Optimized", s.optimized_cost, s.optimized_savings);
    println!(
        "  {:<22} {:>16.2} {:>16.2}",
        "Best performance", s.best_performance_cost, s.best_performance_savings
    );

    print_section_header(&format!("CARRIER SELECTION ({} solver)", report.solver));
    println!(
        "  {:<28} {:>5} {:<10} {:>12} {:>12} {:>9}",
        "Lane", "Week", "Carrier", "Rate", "Premium", "Objective"
    );
    println!("  {}", "─".repeat(81));
    let mut selections: Vec<_> = report.optimization.iter().filter(|r| !r.single_candidate).collect();
    selections.sort_by(|a, b| b.premium_over_cheapest.total_cmp(&a.premium_over_cheapest));
    for result in selections.iter().take(top) {
        println!(
            "  {:<28} {:>5} {:<10} {:>12.2} {:>12.2} {:>9.3}",
            result.lane.to_string(),
            result.week,
            result.selected_carrier.as_str(),
            result.selected_base_rate,
            result.premium_over_cheapest,
            result.objective
        );
    }
    let single = report.optimization.iter().filter(|r| r.single_candidate).count();
    println!("\n  {} lane-weeks had a single candidate", single);

    if !report.suboptimal.is_empty() {
        print_section_header("DOMINATED CARRIER CHOICES");
        let mut dominated: Vec<_> = report.suboptimal.iter().collect();
        dominated.sort_by(|a, b| b.cost_savings.total_cmp(&a.cost_savings));
        for s in dominated.iter().take(top) {
            println!(
                "  {} wk{}: {} ({:.1}) → {} ({:.1}) saves ${:.2}",
                s.lane, s.week, s.carrier, s.performance, s.alternative, s.alternative_performance, s.cost_savings
            );
        }
    }

    print_section_header("ANOMALIES");
    println!(
        "  {} flags, {} peer groups skipped",
        report.anomalies.flags.len(),
        report.anomalies.skipped.len()
    );
    for flag in report.anomalies.flags.iter().take(top) {
        println!(
            "  {:?} [{:?} {}] {} wk{}: {:.2} (z = {:+.2}, {:?}){}",
            flag.kind,
            flag.scope,
            flag.peer_key,
            flag.subject.carrier,
            flag.subject.week,
            flag.value,
            flag.z_score,
            flag.severity,
            if flag.selected { " selected" } else { "" }
        );
    }

    print_section_header("VOLUME FORECAST");
    for lane in report
        .forecasts
        .iter()
        .filter(|f| f.metric == TrendMetric::Volume)
        .take(top)
    {
        match &lane.forecast {
            Forecast::Projected {
                fit,
                projections,
                confidence,
            } => {
                let next = projections.first().map(|p| p.value).unwrap_or_default();
                println!(
                    "  {:<28} next {:>8.1} containers (slope {:+.2}/wk, r² {:.2}, {:?})",
                    lane.lane.to_string(),
                    next,
                    fit.slope,
                    fit.r_squared,
                    confidence
                );
            }
            Forecast::InsufficientData {
                observed_weeks,
                required,
            } => {
                println!(
                    "  {:<28} {} of {} weeks needed",
                    lane.lane.to_string(),
                    observed_weeks,
                    required
                );
            }
        }
    }
    println!();
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let filter = RecordFilter {
        ports: args.ports.clone(),
        facilities: args.facilities.clone(),
        weeks: args.weeks.clone(),
        carriers: args.carriers.clone(),
    };

    let inputs = InputTables {
        shipments: load_table(TableKind::Shipment, &args.shipments)?,
        rates: load_table(TableKind::Rate, &args.rates)?,
        performance: args
            .performance
            .as_deref()
            .map(|path| load_table(TableKind::Performance, path))
            .transpose()?,
    };

    let report = tender_optimizer::run(&inputs, &config, &filter).context("Analysis failed")?;
    print_report(&report, args.top);

    if let Some(path) = &args.output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        serde_json::to_writer_pretty(writer, &report).context("Failed to write report")?;
        info!("Report written to {:?}", path);
    }

    Ok(())
}
