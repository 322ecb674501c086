//! Price forecasting strategies over a built feature series.
//!
//! Two interchangeable strategies share one output contract: the naive
//! seasonal-persistence baseline (always available) and the weekly
//! seasonal ARIMA model. `forecast_with_fallback` is the production
//! entry point: it tries the seasonal model and transparently substitutes
//! the naive baseline when fitting fails, logging the substitution.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::features::FeatureRow;
use crate::sarima::{self, SarimaError};

/// 80% two-sided interval half-width in standard errors.
const Z_80: f64 = 1.2815515655446004;

const NAIVE_WINDOW: usize = 7;
const NAIVE_BAND: f64 = 0.1;

/// One forecast day. `lower <= predicted <= upper` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("horizon must be at least 1 day")]
    InvalidHorizon,
    #[error("cannot forecast from an empty feature series")]
    EmptyFeatures,
    #[error("model fit failed: {0}")]
    ModelFit(String),
}

/// A forecasting strategy with a uniform output contract: exactly
/// `horizon` rows for the days immediately after the last feature date.
pub trait ForecastStrategy {
    fn name(&self) -> &'static str;

    fn forecast(
        &self,
        features: &[FeatureRow],
        horizon: u32,
    ) -> Result<Vec<ForecastRow>, ForecastError>;
}

/// Seasonal-persistence baseline: the trailing 7-day moving average at the
/// last date, held constant, with a +/-10% band. Never fails for
/// non-empty input; short series average over what exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveStrategy;

impl ForecastStrategy for NaiveStrategy {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn forecast(
        &self,
        features: &[FeatureRow],
        horizon: u32,
    ) -> Result<Vec<ForecastRow>, ForecastError> {
        let last_date = validate(features, horizon)?;

        let window = features.len().min(NAIVE_WINDOW);
        let tail = &features[features.len() - window..];
        let level = tail.iter().map(|row| row.price).sum::<f64>() / window as f64;

        Ok(horizon_dates(last_date, horizon)
            .map(|date| ForecastRow {
                date,
                predicted: level,
                lower: level * (1.0 - NAIVE_BAND),
                upper: level * (1.0 + NAIVE_BAND),
            })
            .collect())
    }
}

/// SARIMA(1,1,1)(1,1,1)[7] on the daily price series with 80% intervals
/// from the fitted standard errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeasonalArimaStrategy;

impl ForecastStrategy for SeasonalArimaStrategy {
    fn name(&self) -> &'static str {
        "seasonal_arima"
    }

    fn forecast(
        &self,
        features: &[FeatureRow],
        horizon: u32,
    ) -> Result<Vec<ForecastRow>, ForecastError> {
        let last_date = validate(features, horizon)?;

        let series: Vec<f64> = features.iter().map(|row| row.price).collect();
        let fit = sarima::fit_weekly(&series).map_err(model_fit_error)?;
        let steps = fit.forecast(horizon as usize);

        Ok(horizon_dates(last_date, horizon)
            .zip(steps)
            .map(|(date, step)| ForecastRow {
                date,
                predicted: step.point,
                lower: step.point - Z_80 * step.std_err,
                upper: step.point + Z_80 * step.std_err,
            })
            .collect())
    }
}

/// Try the seasonal model, fall back to the naive baseline on fit failure.
/// Returns the rows and the name of the strategy actually used. Both
/// strategies are deterministic, so retries reproduce the same output.
pub fn forecast_with_fallback(
    features: &[FeatureRow],
    horizon: u32,
) -> Result<(Vec<ForecastRow>, &'static str), ForecastError> {
    let seasonal = SeasonalArimaStrategy;
    match seasonal.forecast(features, horizon) {
        Ok(rows) => {
            info!(
                component = "forecast",
                event = "forecast.strategy.selected",
                strategy = seasonal.name(),
                horizon = horizon
            );
            Ok((rows, seasonal.name()))
        }
        Err(ForecastError::ModelFit(reason)) => {
            warn!(
                component = "forecast",
                event = "forecast.fallback.naive",
                reason = %reason,
                horizon = horizon
            );
            let naive = NaiveStrategy;
            let rows = naive.forecast(features, horizon)?;
            Ok((rows, naive.name()))
        }
        Err(other) => Err(other),
    }
}

fn validate(features: &[FeatureRow], horizon: u32) -> Result<NaiveDate, ForecastError> {
    if horizon == 0 {
        return Err(ForecastError::InvalidHorizon);
    }
    features
        .last()
        .map(|row| row.date)
        .ok_or(ForecastError::EmptyFeatures)
}

fn horizon_dates(last_date: NaiveDate, horizon: u32) -> impl Iterator<Item = NaiveDate> {
    (1..=horizon as u64).map(move |offset| {
        last_date
            .checked_add_days(Days::new(offset))
            .expect("forecast dates stay in calendar range")
    })
}

fn model_fit_error(err: SarimaError) -> ForecastError {
    ForecastError::ModelFit(err.to_string())
}
