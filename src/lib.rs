//! Carrier tender analysis: reconcile shipment, rate and performance
//! uploads, pick a carrier per lane-week, and flag outliers and trends.

pub mod analysis;
pub mod anomaly;
pub mod config;
pub mod cost;
pub mod error;
pub mod filter;
pub mod forecast;
pub mod models;
pub mod optimizer;
pub mod performance;
pub mod reconcile;
pub mod suboptimal;
pub mod summary;
pub mod table;

pub use analysis::{run, run_on_dataset, AnalysisReport};
pub use config::AnalysisConfig;
pub use error::{EngineError, Result};
pub use filter::RecordFilter;
pub use reconcile::{reconcile, InputTables, ReconciledDataset};
