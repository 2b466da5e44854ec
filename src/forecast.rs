//! Per-lane linear trends of weekly volume and cost.

use crate::config::AnalysisConfig;
use crate::models::{CanonicalRecord, Lane, Week};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    /// Weekly container totals across carriers.
    Volume,
    /// Weekly total-rate spend across carriers.
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Residual standard error relative to the mean observation.
    pub fn from_relative_error(relative: f64) -> Self {
        if relative < 0.10 {
            Confidence::High
        } else if relative < 0.25 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Ordinary least squares line through `(week, value)` points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub residual_std_error: f64,
    pub mean: f64,
}

impl TrendFit {
    pub fn predict(&self, week: Week) -> f64 {
        self.intercept + self.slope * f64::from(week)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub week: Week,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Forecast {
    Projected {
        fit: TrendFit,
        projections: Vec<Projection>,
        confidence: Confidence,
    },
    InsufficientData {
        observed_weeks: usize,
        required: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneForecast {
    pub lane: Lane,
    pub metric: TrendMetric,
    pub observed_weeks: usize,
    pub forecast: Forecast,
}

/// Fit a line through at least three points with distinct x values.
pub fn fit_trend(points: &[(f64, f64)]) -> Option<TrendFit> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxx, sxy, syy) = points.iter().fold((0.0, 0.0, 0.0), |(sxx, sxy, syy), (x, y)| {
        let dx = x - mean_x;
        let dy = y - mean_y;
        (sxx + dx * dx, sxy + dx * dy, syy + dy * dy)
    });
    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let ssr: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    // A flat series is fitted exactly by a flat line.
    let r_squared = if syy > 0.0 { 1.0 - ssr / syy } else { 1.0 };

    Some(TrendFit {
        slope,
        intercept,
        r_squared,
        residual_std_error: (ssr / (n - 2.0)).sqrt(),
        mean: mean_y,
    })
}

fn forecast_series(series: &BTreeMap<Week, f64>, config: &AnalysisConfig) -> Forecast {
    let observed_weeks = series.len();
    let points: Vec<(f64, f64)> = series.iter().map(|(w, v)| (f64::from(*w), *v)).collect();

    let fit = match fit_trend(&points) {
        Some(fit) if observed_weeks >= config.min_forecast_weeks => fit,
        _ => {
            return Forecast::InsufficientData {
                observed_weeks,
                required: config.min_forecast_weeks,
            }
        }
    };

    let last_week = series.keys().next_back().copied().unwrap_or_default();
    // Week numbers past u32::MAX cannot be projected.
    let projections = (1..=config.forecast_horizon)
        .map_while(|ahead| last_week.checked_add(ahead))
        .map(|week| Projection {
            week,
            value: fit.predict(week).max(0.0),
        })
        .collect();

    let relative = if fit.mean > 0.0 {
        fit.residual_std_error / fit.mean
    } else {
        f64::INFINITY
    };

    Forecast::Projected {
        fit,
        projections,
        confidence: Confidence::from_relative_error(relative),
    }
}

/// Volume and cost trend for every lane in the records.
pub fn forecast_lanes(records: &[CanonicalRecord], config: &AnalysisConfig) -> Vec<LaneForecast> {
    let mut weekly: BTreeMap<&Lane, (BTreeMap<Week, f64>, BTreeMap<Week, f64>)> = BTreeMap::new();
    for record in records {
        let (volume, cost) = weekly.entry(&record.lane).or_default();
        *volume.entry(record.week).or_default() += f64::from(record.container_count);
        *cost.entry(record.week).or_default() += record.total_rate;
    }

    let mut forecasts = Vec::with_capacity(weekly.len() * 2);
    for (lane, (volume, cost)) in weekly {
        for (metric, series) in [(TrendMetric::Volume, &volume), (TrendMetric::Cost, &cost)] {
            let forecast = forecast_series(series, config);
            if let Forecast::InsufficientData { observed_weeks, .. } = &forecast {
                debug!("{} has {} weeks, too few for a {:?} trend", lane, observed_weeks, metric);
            }
            forecasts.push(LaneForecast {
                lane: lane.clone(),
                metric,
                observed_weeks: series.len(),
                forecast,
            });
        }
    }

    let projected = forecasts
        .iter()
        .filter(|f| matches!(f.forecast, Forecast::Projected { .. }))
        .count();
    info!("Projected {} of {} lane trends", projected, forecasts.len());
    forecasts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;

    fn lane_volumes(volumes: &[(Week, u32)]) -> Vec<CanonicalRecord> {
        volumes
            .iter()
            .map(|&(week, containers)| record("P", "F", "AAAA", week, 100.0, containers, None))
            .collect()
    }

    fn projected(forecast: &Forecast) -> (&TrendFit, &[Projection], Confidence) {
        match forecast {
            Forecast::Projected {
                fit,
                projections,
                confidence,
            } => (fit, projections, *confidence),
            other => panic!("expected a projection, got {other:?}"),
        }
    }

    #[test]
    fn perfect_line_projects_next_week() {
        let records = lane_volumes(&[(1, 10), (2, 20), (3, 30), (4, 40)]);
        let forecasts = forecast_lanes(&records, &AnalysisConfig::default());
        assert_eq!(forecasts.len(), 2);

        let volume = &forecasts[0];
        assert_eq!(volume.metric, TrendMetric::Volume);
        let (fit, projections, confidence) = projected(&volume.forecast);
        assert!((fit.slope - 10.0).abs() < 1e-9);
        assert!(fit.intercept.abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0].week, 5);
        assert!((projections[0].value - 50.0).abs() < 1e-9);
        assert_eq!(confidence, Confidence::High);

        let cost = &forecasts[1];
        assert_eq!(cost.metric, TrendMetric::Cost);
        let (_, projections, _) = projected(&cost.forecast);
        assert!((projections[0].value - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn volumes_sum_across_carriers() {
        let mut records = lane_volumes(&[(1, 20), (2, 20), (3, 10)]);
        records.push(record("P", "F", "BBBB", 3, 50.0, 10, None));
        let forecasts = forecast_lanes(&records, &AnalysisConfig::default());
        let (fit, _, _) = projected(&forecasts[0].forecast);
        assert!((fit.mean - 20.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_weeks_is_reported() {
        let records = lane_volumes(&[(1, 10), (2, 12)]);
        let forecasts = forecast_lanes(&records, &AnalysisConfig::default());
        assert_eq!(
            forecasts[0].forecast,
            Forecast::InsufficientData {
                observed_weeks: 2,
                required: 3
            }
        );

        let strict = AnalysisConfig {
            min_forecast_weeks: 5,
            ..AnalysisConfig::default()
        };
        let records = lane_volumes(&[(1, 10), (2, 12), (3, 11), (4, 13)]);
        let forecasts = forecast_lanes(&records, &strict);
        assert!(matches!(
            forecasts[0].forecast,
            Forecast::InsufficientData { observed_weeks: 4, required: 5 }
        ));
    }

    #[test]
    fn declining_lane_never_projects_below_zero() {
        let config = AnalysisConfig {
            forecast_horizon: 3,
            ..AnalysisConfig::default()
        };
        let records = lane_volumes(&[(1, 30), (2, 20), (3, 10)]);
        let forecasts = forecast_lanes(&records, &config);
        let (_, projections, _) = projected(&forecasts[0].forecast);

        let weeks: Vec<_> = projections.iter().map(|p| p.week).collect();
        assert_eq!(weeks, vec![4, 5, 6]);
        assert!(projections.iter().all(|p| p.value >= 0.0));
        assert_eq!(projections[2].value, 0.0);
    }

    #[test]
    fn projection_stops_at_the_largest_week() {
        let config = AnalysisConfig {
            forecast_horizon: 3,
            ..AnalysisConfig::default()
        };
        let records = lane_volumes(&[(u32::MAX - 3, 10), (u32::MAX - 2, 11), (u32::MAX - 1, 12)]);
        let forecasts = forecast_lanes(&records, &config);
        let (_, projections, _) = projected(&forecasts[0].forecast);

        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0].week, u32::MAX);
    }

    #[test]
    fn noisy_series_lowers_confidence() {
        let records = lane_volumes(&[(1, 10), (2, 14), (3, 10), (4, 14)]);
        let forecasts = forecast_lanes(&records, &AnalysisConfig::default());
        let (fit, _, confidence) = projected(&forecasts[0].forecast);

        assert!((fit.slope - 0.8).abs() < 1e-9);
        assert!((fit.residual_std_error - 6.4_f64.sqrt()).abs() < 1e-9);
        assert_eq!(confidence, Confidence::Medium);
    }
}
