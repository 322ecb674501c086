//! HTTP surface over the persisted pipeline artifacts.
//!
//! Handlers never recompute features or forecasts; they read what the batch
//! binaries wrote, through a fingerprint-invalidated cache, and only round
//! numbers at this boundary. Internal failures are logged in full but
//! reported to clients as a generic 500.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::artifacts::{ArtifactCache, ArtifactError, SeriesKey};
use crate::recommend::{LocationSuggestion, RecommendError, Recommender, DEFAULT_LOOKBACK_DAYS};
use crate::risk::evaluate_glut_risk;

pub const DEFAULT_CROP: &str = "tomato";
pub const DEFAULT_MARKET_ID: &str = "MAH_Pune";
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

pub struct AppState {
    pub data_dir: PathBuf,
    pub cache: ArtifactCache,
    pub recommender: Option<Arc<Recommender>>,
}

impl AppState {
    pub fn new(data_dir: PathBuf, recommender: Option<Arc<Recommender>>) -> Self {
        Self {
            data_dir,
            cache: ArtifactCache::new(),
            recommender,
        }
    }
}

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/crops", get(get_crops))
        .route("/recommend", get(get_recommendation))
        .route("/api/forecast/price", get(get_price_forecast))
        .route("/api/risk/glut", get(get_glut_risk))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// Browser dashboards are served from other origins; the API is read-only,
/// so a blanket allow is acceptable.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

enum ApiError {
    NotFound(String),
    NotFoundWithSuggestions {
        message: String,
        suggestions: Vec<LocationSuggestion>,
    },
    Unavailable(&'static str),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            Self::NotFoundWithSuggestions {
                message,
                suggestions,
            } => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": message, "suggestions": suggestions })),
            )
                .into_response(),
            Self::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal server error" })),
            )
                .into_response(),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::MissingArtifact { path } => Self::NotFound(format!(
                "artifact not found: {}; run the batch pipeline first",
                path.display()
            )),
            other => {
                error!(
                    component = "api_server",
                    event = "artifact.read_failed",
                    error = %other,
                );
                Self::Internal
            }
        }
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        match err {
            RecommendError::UnknownLocation {
                state,
                district,
                suggestions,
            } => Self::NotFoundWithSuggestions {
                message: format!("no rainfall data available for {state}, {district}"),
                suggestions,
            },
            other => {
                error!(
                    component = "api_server",
                    event = "recommend.failed",
                    error = %other,
                );
                Self::Internal
            }
        }
    }
}

fn default_crop() -> String {
    DEFAULT_CROP.to_string()
}

fn default_market_id() -> String {
    DEFAULT_MARKET_ID.to_string()
}

fn default_horizon() -> u32 {
    DEFAULT_HORIZON_DAYS
}

fn default_lookback() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    #[serde(default = "default_crop")]
    crop: String,
    #[serde(default = "default_market_id")]
    market_id: String,
    #[serde(default = "default_horizon")]
    horizon: u32,
}

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    state: String,
    district: String,
    #[serde(default = "default_lookback")]
    lookback_days: u32,
}

#[derive(Debug, Serialize)]
struct PriceForecastResponse {
    crop: String,
    market_id: String,
    dates: Vec<String>,
    predicted: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

async fn get_price_forecast(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<PriceForecastResponse>, ApiError> {
    let key = SeriesKey::new(&query.crop, &query.market_id);
    let rows = state
        .cache
        .forecast(&key.forecast_path(&state.data_dir, query.horizon))?;

    Ok(Json(PriceForecastResponse {
        crop: query.crop,
        market_id: query.market_id,
        dates: rows
            .iter()
            .map(|row| row.date.format("%Y-%m-%d").to_string())
            .collect(),
        predicted: rows.iter().map(|row| round2(row.predicted)).collect(),
        lower: rows.iter().map(|row| round2(row.lower)).collect(),
        upper: rows.iter().map(|row| round2(row.upper)).collect(),
    }))
}

async fn get_glut_risk(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<crate::risk::RiskSignal>, ApiError> {
    let key = SeriesKey::new(&query.crop, &query.market_id);
    let features = state.cache.features(&key.feature_path(&state.data_dir))?;
    let forecast = state
        .cache
        .forecast(&key.forecast_path(&state.data_dir, query.horizon))?;

    let mut signal = evaluate_glut_risk(&features, &forecast, &query.crop, &query.market_id);
    signal.hist_mean_30 = round2(signal.hist_mean_30);
    signal.pred_mean_14 = round2(signal.pred_mean_14);
    Ok(Json(signal))
}

async fn get_recommendation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<crate::recommend::Recommendation>, ApiError> {
    let recommender = state
        .recommender
        .as_ref()
        .ok_or(ApiError::Unavailable("recommendation model not loaded"))?;
    let recommendation = recommender.recommend(
        &query.state,
        &query.district,
        query.lookback_days,
        Utc::now().date_naive(),
    )?;
    Ok(Json(recommendation))
}

async fn get_crops(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let recommender = state
        .recommender
        .as_ref()
        .ok_or(ApiError::Unavailable("recommendation model not loaded"))?;
    let crops = recommender.known_crops();
    Ok(Json(serde_json::json!({
        "crops": crops,
        "total_crops": crops.len(),
    })))
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "recommender_loaded": state.recommender.is_some(),
        "data_dir": state.data_dir.display().to_string(),
        "data_dir_exists": state.data_dir.is_dir(),
    }))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
