//! Error taxonomy for the analysis engine.
//!
//! Schema and configuration errors abort a run before any result is
//! produced. Unmatched or malformed rows are not errors: they surface as
//! [`CoverageWarning`](crate::reconcile::CoverageWarning)s in the report.

use crate::models::{Lane, Week};
use crate::table::TableKind;
use thiserror::Error;

/// A required column is missing from an input table.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{table} data is missing required columns: {}", missing.join(", "))]
pub struct SchemaError {
    pub table: TableKind,
    pub missing: Vec<String>,
}

/// Invalid weight or threshold configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A single option is out of its allowed range.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// A weight vector does not sum to one.
    #[error("{what} weights must sum to 1.0 (got {sum})")]
    WeightSum { what: &'static str, sum: f64 },
}

/// A lane-week group reached the optimizer with no candidates.
///
/// Grouping never builds such a group, so this always points at a defect
/// upstream of the optimizer rather than at user data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("lane-week group {lane} week {week} has no carrier candidates")]
pub struct EmptyGroupError {
    pub lane: Lane,
    pub week: Week,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    EmptyGroup(#[from] EmptyGroupError),

    /// The CSV loader could not read a table.
    #[error("failed to read {table} data: {source}")]
    Read {
        table: TableKind,
        #[source]
        source: csv::Error,
    },
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
