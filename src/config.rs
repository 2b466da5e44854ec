//! Analysis configuration.
//!
//! Every option has a default, so an empty JSON object is a valid config.
//! [`AnalysisConfig::validate`] runs before any stage touches data.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Tolerance for weight vectors summing to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const fn default_cost_weight() -> f64 {
    0.5
}

const fn default_zscore_threshold() -> f64 {
    2.0
}

const fn default_min_peer_sample() -> usize {
    3
}

const fn default_min_forecast_weeks() -> usize {
    3
}

const fn default_forecast_horizon() -> u32 {
    1
}

/// Weights blending the raw performance metrics into one score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub on_time: f64,
    pub damage: f64,
    pub exception: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            on_time: 0.5,
            damage: 0.3,
            exception: 0.2,
        }
    }
}

impl MetricWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("metric_weights.on_time", self.on_time)?;
        check_unit_interval("metric_weights.damage", self.damage)?;
        check_unit_interval("metric_weights.exception", self.exception)?;
        check_sum("metric", self.on_time + self.damage + self.exception)
    }
}

/// Validated cost/performance blend for the optimizer objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjectiveWeights {
    pub cost: f64,
    pub performance: f64,
}

impl ObjectiveWeights {
    pub fn new(cost: f64, performance: f64) -> Result<Self, ConfigError> {
        check_unit_interval("cost_weight", cost)?;
        check_unit_interval("performance_weight", performance)?;
        check_sum("objective", cost + performance)?;
        Ok(Self { cost, performance })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Weight of normalised cost in the optimizer objective.
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,

    /// Weight of the performance penalty; `1 - cost_weight` when unset.
    pub performance_weight: Option<f64>,

    /// `|z|` above which a value is flagged as an outlier.
    #[serde(default = "default_zscore_threshold")]
    pub anomaly_zscore_threshold: f64,

    /// Peer groups smaller than this are skipped by outlier detection.
    #[serde(default = "default_min_peer_sample")]
    pub min_peer_sample: usize,

    /// Distinct weeks a lane needs before it gets a forecast.
    #[serde(default = "default_min_forecast_weeks")]
    pub min_forecast_weeks: usize,

    /// Weeks projected past the last observed week.
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon: u32,

    pub metric_weights: MetricWeights,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cost_weight: default_cost_weight(),
            performance_weight: None,
            anomaly_zscore_threshold: default_zscore_threshold(),
            min_peer_sample: default_min_peer_sample(),
            min_forecast_weeks: default_min_forecast_weeks(),
            forecast_horizon: default_forecast_horizon(),
            metric_weights: MetricWeights::default(),
        }
    }
}

impl AnalysisConfig {
    /// Effective objective weights, with the performance weight derived
    /// from the cost weight when it was not given.
    pub fn objective_weights(&self) -> Result<ObjectiveWeights, ConfigError> {
        let performance = self
            .performance_weight
            .unwrap_or(1.0 - self.cost_weight);
        ObjectiveWeights::new(self.cost_weight, performance)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.objective_weights()?;
        self.metric_weights.validate()?;

        if !self.anomaly_zscore_threshold.is_finite() || self.anomaly_zscore_threshold <= 0.0 {
            return Err(invalid(
                "anomaly_zscore_threshold",
                format!("must be a positive number, got {}", self.anomaly_zscore_threshold),
            ));
        }
        if self.min_peer_sample < 2 {
            return Err(invalid(
                "min_peer_sample",
                format!("a z-score needs at least 2 samples, got {}", self.min_peer_sample),
            ));
        }
        if self.min_forecast_weeks < 3 {
            return Err(invalid(
                "min_forecast_weeks",
                format!(
                    "a trend with residual variance needs at least 3 weeks, got {}",
                    self.min_forecast_weeks
                ),
            ));
        }
        if self.forecast_horizon == 0 {
            return Err(invalid("forecast_horizon", "must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, format!("must be within [0, 1], got {value}")));
    }
    Ok(())
}

fn check_sum(what: &'static str, sum: f64) -> Result<(), ConfigError> {
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::WeightSum { what, sum });
    }
    Ok(())
}
