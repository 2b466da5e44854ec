//! Synthetic tender data generator
//!
//! Writes a shipment, rate and performance CSV that `tender_optimizer` can
//! read directly. Shipments use the spreadsheet export layout (one row per
//! container, arrival date instead of week) so the header aliasing and
//! date handling get exercised too.
//!
//! Usage:
//!   cargo run --release --bin generate_synthetic -- [OPTIONS]
//!
//! Options:
//!   --ports <N>         Number of discharge ports (default: 3)
//!   --facilities <N>    Number of facilities (default: 4)
//!   --carriers <N>      Number of dray carriers (default: 6)
//!   --weeks <N>         Consecutive ISO weeks to cover (default: 8)
//!   --scorecard         Write performance as a weekly WK<n> scorecard
//!   --seed <N>          Random seed for reproducibility (optional)
//!   --output-dir <DIR>  Output directory (default: data/synthetic)

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Weekday};
use clap::Parser;
use csv::WriterBuilder;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use tender_optimizer::models::MAX_WEEK;
use tracing::info;

const PORTS: &[&str] = &["USNYC", "USLAX", "USSAV", "USHOU", "USSEA", "USORF"];
const SCAC_LETTERS: &[u8] = b"ABCDEFGHJKLMNPRSTVWXYZ";

#[derive(Parser, Debug)]
#[command(name = "generate_synthetic")]
#[command(about = "Generate synthetic shipment, rate and performance tables")]
struct Args {
    /// Number of discharge ports
    #[arg(long, default_value = "3")]
    ports: usize,

    /// Number of facilities
    #[arg(long, default_value = "4")]
    facilities: usize,

    /// Number of dray carriers
    #[arg(long, default_value = "6")]
    carriers: usize,

    /// Consecutive ISO weeks to cover
    #[arg(long, default_value = "8")]
    weeks: u32,

    /// First ISO week
    #[arg(long, default_value = "27")]
    first_week: u32,

    /// ISO year
    #[arg(long, default_value = "2024")]
    year: i32,

    /// Probability that a carrier serves a given lane
    #[arg(long, default_value = "0.6")]
    coverage: f64,

    /// Share of lane quotes that get a week-specific override
    #[arg(long, default_value = "0.1")]
    promo_rate: f64,

    /// Write performance as a weekly scorecard instead of raw metrics
    #[arg(long)]
    scorecard: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory
    #[arg(long, default_value = "data/synthetic")]
    output_dir: PathBuf,
}

/// Carrier profile driving both its prices and its service.
struct Carrier {
    scac: String,
    /// Multiplier on the lane's market rate.
    price_factor: f64,
    /// Mean on-time percentage.
    reliability: f64,
}

struct Lane {
    port: String,
    facility: String,
    market_rate: f64,
    weekly_volume: f64,
    growth: f64,
}

fn generate_carriers(count: usize, rng: &mut impl Rng) -> Vec<Carrier> {
    let mut seen = std::collections::HashSet::new();
    let mut carriers = Vec::with_capacity(count);
    while carriers.len() < count {
        let scac: String = (0..4)
            .map(|_| char::from(SCAC_LETTERS[rng.gen_range(0..SCAC_LETTERS.len())]))
            .collect();
        if !seen.insert(scac.clone()) {
            continue;
        }
        // Cheaper carriers tend to be less reliable.
        let price_factor = rng.gen_range(0.85..1.20_f64);
        let reliability = (70.0 + (price_factor - 0.85) * 60.0 + rng.gen_range(-5.0..5.0_f64)).min(99.0);
        carriers.push(Carrier {
            scac,
            price_factor,
            reliability,
        });
    }
    carriers
}

fn generate_lanes(args: &Args, rng: &mut impl Rng) -> Vec<Lane> {
    let ports = &PORTS[..args.ports.clamp(1, PORTS.len())];
    let mut lanes = Vec::new();
    for port in ports {
        for f in 1..=args.facilities.max(1) {
            lanes.push(Lane {
                port: port.to_string(),
                facility: format!("FC{:02}", f),
                market_rate: rng.gen_range(450.0..1400.0_f64).round(),
                weekly_volume: rng.gen_range(5.0..40.0_f64),
                growth: rng.gen_range(-0.05..0.08_f64),
            });
        }
    }
    lanes
}

/// A random day inside the ISO week.
fn arrival_date(year: i32, week: u32, rng: &mut impl Rng) -> Option<NaiveDate> {
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some(monday + Duration::days(rng.gen_range(0..7)))
}

fn writer(dir: &Path, name: &str) -> Result<csv::Writer<std::fs::File>> {
    let path = dir.join(name);
    WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let args = Args::parse();

    println!("🔧 Synthetic Tender Data Generator");
    println!("{}", "━".repeat(66));
    println!("Ports:            {}", args.ports);
    println!("Facilities:       {}", args.facilities);
    println!("Carriers:         {}", args.carriers);
    println!("Weeks:            {} (from {}-W{:02})", args.weeks, args.year, args.first_week);
    println!("Lane coverage:    {:.0}%", args.coverage * 100.0);
    println!("Performance:      {}", if args.scorecard { "weekly scorecard" } else { "raw metrics" });
    println!("Output:           {}", args.output_dir.display());
    if let Some(seed) = args.seed {
        println!("Random seed:      {}", seed);
    }
    println!();

    let mut rng: StdRng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    std::fs::create_dir_all(&args.output_dir)?;

    let carriers = generate_carriers(args.carriers.max(1), &mut rng);
    let lanes = generate_lanes(&args, &mut rng);
    let weeks: Vec<u32> = (args.first_week..args.first_week.saturating_add(args.weeks.max(1)))
        .filter(|w| (1..=MAX_WEEK).contains(w))
        .collect();
    if weeks.is_empty() {
        bail!("No weeks of {} fall inside 1..={}", args.year, MAX_WEEK);
    }

    // Which carriers serve which lane; every lane gets at least one.
    let served: Vec<Vec<usize>> = lanes
        .iter()
        .map(|_| {
            let mut picks: Vec<usize> = (0..carriers.len())
                .filter(|_| rng.gen_bool(args.coverage.clamp(0.0, 1.0)))
                .collect();
            if picks.is_empty() {
                picks.push(rng.gen_range(0..carriers.len()));
            }
            picks
        })
        .collect();

    // Rates: one quote per served lane-carrier, plus occasional week promos.
    let mut rates = writer(&args.output_dir, "rates.csv")?;
    rates.write_record(["Port", "FC", "SCAC", "Week", "Base Rate"])?;
    let mut quote_count = 0;
    for (lane, picks) in lanes.iter().zip(&served) {
        for &c in picks {
            let carrier = &carriers[c];
            let rate = (lane.market_rate * carrier.price_factor).round();
            rates.write_record([
                lane.port.as_str(),
                lane.facility.as_str(),
                carrier.scac.as_str(),
                "",
                format!("{:.2}", rate).as_str(),
            ])?;
            quote_count += 1;

            if rng.gen_bool(args.promo_rate.clamp(0.0, 1.0)) {
                let week = weeks[rng.gen_range(0..weeks.len())];
                let promo = (rate * rng.gen_range(0.80..0.95_f64)).round();
                rates.write_record([
                    lane.port.clone(),
                    lane.facility.clone(),
                    carrier.scac.clone(),
                    week.to_string(),
                    format!("{:.2}", promo),
                ])?;
                quote_count += 1;
            }
        }
    }
    rates.flush()?;
    info!("Wrote {} rate quotes", quote_count);

    // Shipments: one row per container, volume split across serving carriers.
    let mut shipments = writer(&args.output_dir, "shipments.csv")?;
    shipments.write_record(["SSL ATA", "Discharged Port", "Dray SCAC(FL)", "Facility"])?;
    let mut container_count = 0;
    for (lane, picks) in lanes.iter().zip(&served) {
        for (i, &week) in weeks.iter().enumerate() {
            let expected = lane.weekly_volume * (1.0 + lane.growth).powi(i as i32);
            let volume = (expected * rng.gen_range(0.8..1.2_f64)).round() as usize;
            for _ in 0..volume {
                let carrier = &carriers[picks[rng.gen_range(0..picks.len())]];
                let Some(date) = arrival_date(args.year, week, &mut rng) else {
                    continue;
                };
                shipments.write_record([
                    date.format("%Y-%m-%d").to_string(),
                    lane.port.clone(),
                    carrier.scac.clone(),
                    lane.facility.clone(),
                ])?;
                container_count += 1;
            }
        }
    }
    shipments.flush()?;
    info!("Wrote {} container rows", container_count);

    // Performance per carrier-week.
    let mut performance = writer(&args.output_dir, "performance.csv")?;
    if args.scorecard {
        let mut header = vec!["Carrier".to_string(), "Metrics".to_string()];
        header.extend(weeks.iter().map(|w| format!("WK{}", w)));
        performance.write_record(&header)?;
        for carrier in &carriers {
            let mut row = vec![carrier.scac.clone(), "Total Score %".to_string()];
            row.extend(weeks.iter().map(|_| {
                let score = (carrier.reliability + rng.gen_range(-6.0..6.0_f64)).clamp(0.0, 100.0);
                format!("{:.1}%", score)
            }));
            performance.write_record(&row)?;
        }
    } else {
        performance.write_record(["carrier", "week", "on_time_rate", "damage_rate", "exception_rate"])?;
        for carrier in &carriers {
            for week in &weeks {
                let on_time = (carrier.reliability + rng.gen_range(-6.0..6.0_f64)).clamp(0.0, 100.0);
                let damage = rng.gen_range(0.0..2.0_f64) * (100.0 - on_time) / 30.0;
                let exceptions = rng.gen_range(0.0..10.0_f64) * (100.0 - on_time) / 30.0;
                performance.write_record([
                    carrier.scac.clone(),
                    week.to_string(),
                    format!("{:.1}%", on_time),
                    format!("{:.3}", damage),
                    format!("{:.2}", exceptions),
                ])?;
            }
        }
    }
    performance.flush()?;

    println!("\n✅ Generation complete!");
    println!("   Lanes:           {}", lanes.len());
    println!("   Rate quotes:     {}", quote_count);
    println!("   Container rows:  {}", container_count);
    println!("   Output:          {}", args.output_dir.display());

    Ok(())
}
