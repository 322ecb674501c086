//! Mandi price forecasting core crate.
//!
//! The pipeline runs in three batch stages, each persisting a CSV artifact
//! the next stage (or the API server) reads back:
//! - feature building from raw mandi price and weather tables
//! - price forecasting over the feature series
//! - glut-risk evaluation comparing the forecast to recent history
//!
//! An optional crop recommendation model serves alongside the pipeline
//! endpoints when its tables are configured.

mod artifacts;
mod features;
mod forecast;
mod ingest;
mod observability;
mod recommend;
mod risk;
mod sarima;
mod server;

pub use artifacts::{
    read_features, read_forecast, write_features, write_forecast, ArtifactCache, ArtifactError,
    SeriesKey,
};
pub use features::{build_features, FeatureBuildReport, FeatureError, FeatureRow};
pub use forecast::{
    forecast_with_fallback, ForecastError, ForecastRow, ForecastStrategy, NaiveStrategy,
    SeasonalArimaStrategy,
};
pub use ingest::{
    load_price_table, load_weather_table, IngestError, PriceObservation, WeatherObservation,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_job_done, log_job_start,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use recommend::{
    CentroidClassifier, CropClassifier, EnvConditions, LocationSuggestion, MarketAnalysis,
    Recommendation, RecommendError, Recommender, ScoredCrop, DEFAULT_LOOKBACK_DAYS,
};
pub use risk::{evaluate_glut_risk, GlutSignal, RiskSignal};
pub use sarima::{fit_weekly, ForecastStep, SarimaError, SarimaFit};
pub use server::{
    api_router, AppState, DEFAULT_CROP, DEFAULT_HORIZON_DAYS, DEFAULT_MARKET_ID,
};
