use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::{Days, NaiveDate};
use mandicast::{
    api_router, write_features, write_forecast, AppState, CentroidClassifier, FeatureRow,
    ForecastRow, Recommender, SeriesKey,
};
use tower::util::ServiceExt;

fn feature_rows(prices: &[f64]) -> Vec<FeatureRow> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(idx, &price)| FeatureRow {
            date: start.checked_add_days(Days::new(idx as u64)).unwrap(),
            price,
            price_lag_1: None,
            price_lag_7: None,
            price_lag_14: None,
            price_lag_30: None,
            price_ma_7: None,
            price_ma_30: None,
            precipitation: None,
            temp_max: None,
            temp_min: None,
            humidity: None,
        })
        .collect()
}

fn forecast_rows(predictions: &[f64]) -> Vec<ForecastRow> {
    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    predictions
        .iter()
        .enumerate()
        .map(|(idx, &predicted)| ForecastRow {
            date: start.checked_add_days(Days::new(idx as u64)).unwrap(),
            predicted,
            lower: predicted - 5.0,
            upper: predicted + 5.0,
        })
        .collect()
}

fn write_canonical_artifacts(data_dir: &Path, horizon: u32) {
    let key = SeriesKey::new("tomato", "MAH_Pune");
    write_features(&key.feature_path(data_dir), &feature_rows(&[100.0; 40])).unwrap();
    write_forecast(
        &key.forecast_path(data_dir, horizon),
        &forecast_rows(&vec![100.333; horizon as usize]),
    )
    .unwrap();
}

async fn get_json(
    app: axum::Router,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn forecast_endpoint_serves_the_default_series_rounded_to_cents() {
    let dir = tempfile::tempdir().unwrap();
    write_canonical_artifacts(dir.path(), 30);

    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/api/forecast/price").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["crop"], "tomato");
    assert_eq!(json["market_id"], "MAH_Pune");
    let dates = json["dates"].as_array().unwrap();
    let predicted = json["predicted"].as_array().unwrap();
    assert_eq!(dates.len(), 30);
    assert_eq!(predicted.len(), 30);
    assert_eq!(dates[0], "2024-02-01");
    let date_format = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    assert!(dates
        .iter()
        .all(|date| date_format.is_match(date.as_str().unwrap())));
    assert_eq!(predicted[0], 100.33);
    assert_eq!(json["lower"][0], 95.33);
    assert_eq!(json["upper"][0], 105.33);
}

#[tokio::test]
async fn forecast_endpoint_honors_query_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let key = SeriesKey::new("onion", "KAR_Bangalore");
    write_forecast(
        &key.forecast_path(dir.path(), 7),
        &forecast_rows(&[42.0; 7]),
    )
    .unwrap();

    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(
        app,
        "/api/forecast/price?crop=onion&market_id=KAR_Bangalore&horizon=7",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["crop"], "onion");
    assert_eq!(json["predicted"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn missing_forecast_artifact_is_a_descriptive_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/api/forecast/price").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("forecast_tomato_MAH_Pune_30d.csv"));
    assert!(message.contains("batch pipeline"));
}

#[tokio::test]
async fn risk_endpoint_reports_low_for_a_flat_series() {
    let dir = tempfile::tempdir().unwrap();
    write_canonical_artifacts(dir.path(), 30);

    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/api/risk/glut").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["signal"], "LOW");
    assert_eq!(json["market"], "MAH_Pune");
    assert_eq!(json["crop"], "tomato");
    assert_eq!(json["hist_mean_30"], 100.0);
    assert_eq!(json["pred_mean_14"], 100.33);
    assert_eq!(
        json["advisory"],
        "Risk Level: LOW. Low risk. Normal market conditions expected."
    );
}

#[tokio::test]
async fn risk_endpoint_reports_high_when_the_forecast_collapses() {
    let dir = tempfile::tempdir().unwrap();
    let key = SeriesKey::new("tomato", "MAH_Pune");
    write_features(
        &key.feature_path(dir.path()),
        &feature_rows(&[100.0; 40]),
    )
    .unwrap();
    write_forecast(
        &key.forecast_path(dir.path(), 30),
        &forecast_rows(&[70.0; 30]),
    )
    .unwrap();

    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/api/risk/glut").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["signal"], "HIGH");
    assert!(json["advisory"]
        .as_str()
        .unwrap()
        .starts_with("Risk Level: HIGH."));
}

#[tokio::test]
async fn health_endpoint_always_answers() {
    let dir = tempfile::tempdir().unwrap();
    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["recommender_loaded"], false);
    assert_eq!(json["data_dir_exists"], true);
}

#[tokio::test]
async fn crops_endpoint_is_unavailable_without_a_recommender() {
    let dir = tempfile::tempdir().unwrap();
    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let (status, json) = get_json(app, "/crops").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "recommendation model not loaded");
}

fn test_recommender(dir: &Path) -> Arc<Recommender> {
    let crop_table = dir.join("crops.csv");
    std::fs::write(
        &crop_table,
        "N,P,K,temperature,humidity,ph,rainfall,label\n\
         90,42,43,21.0,82.0,6.5,1400,rice\n\
         20,67,20,24.0,60.0,7.0,450,chickpea\n\
         40,30,60,27.0,70.0,6.0,900,banana\n",
    )
    .unwrap();
    let rainfall_table = dir.join("rainfall.csv");
    std::fs::write(
        &rainfall_table,
        "STATE_UT_NAME,DISTRICT,ANNUAL\nMAHARASHTRA,PUNE,722.0\nKERALA,WAYANAD,2322.0\n",
    )
    .unwrap();

    let classifier = CentroidClassifier::train_from_csv(&crop_table).unwrap();
    Arc::new(Recommender::new(Box::new(classifier), &rainfall_table).unwrap())
}

#[tokio::test]
async fn recommend_endpoint_serves_a_full_recommendation() {
    let dir = tempfile::tempdir().unwrap();
    let recommender = test_recommender(dir.path());
    let app = api_router(Arc::new(AppState::new(
        dir.path().to_path_buf(),
        Some(recommender),
    )));

    let (status, json) = get_json(app, "/recommend?state=Kerala&district=Wayanad").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["recommendation"]["crop"], "rice");
    let conditions = &json["recommendation"]["environmental_conditions"];
    assert_eq!(conditions["state"], "KERALA");
    assert_eq!(conditions["district"], "WAYANAD");
    assert_eq!(conditions["annual_rainfall_mm"], 2322.0);
    assert_eq!(json["alternative_crops"].as_array().unwrap().len(), 2);
    assert!(json["market_analysis"].is_null());
}

#[tokio::test]
async fn recommend_endpoint_returns_404_with_suggestions_for_unknown_district() {
    let dir = tempfile::tempdir().unwrap();
    let recommender = test_recommender(dir.path());
    let app = api_router(Arc::new(AppState::new(
        dir.path().to_path_buf(),
        Some(recommender),
    )));

    let (status, json) = get_json(app, "/recommend?state=Maharashtra&district=Nagpur").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("MAHARASHTRA, NAGPUR"));
    assert!(json["suggestions"].is_array());
}

#[tokio::test]
async fn crops_endpoint_lists_known_labels() {
    let dir = tempfile::tempdir().unwrap();
    let recommender = test_recommender(dir.path());
    let app = api_router(Arc::new(AppState::new(
        dir.path().to_path_buf(),
        Some(recommender),
    )));

    let (status, json) = get_json(app, "/crops").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_crops"], 3);
    let crops = json["crops"].as_array().unwrap();
    assert!(crops.contains(&serde_json::Value::from("rice")));
}

#[tokio::test]
async fn responses_carry_permissive_cors_headers() {
    let dir = tempfile::tempdir().unwrap();
    let app = api_router(Arc::new(AppState::new(dir.path().to_path_buf(), None)));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-methods")
            .unwrap(),
        "GET, OPTIONS"
    );
}
