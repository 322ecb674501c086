use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use mandicast::{
    api_router, init_logging, load_price_table, log_app_bind, log_app_start,
    logging_config_from_env, AppState, CentroidClassifier, Recommender,
};
use tracing::{info, warn};

const COMPONENT: &str = "api_server";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let addr: SocketAddr = std::env::var("MANDICAST_API_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    let data_dir = std::env::var("MANDICAST_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/processed"));

    let recommender = recommender_from_env()?;
    let state = Arc::new(AppState::new(data_dir, recommender));
    let app = api_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The recommendation endpoints are optional: they come up only when both
/// the crop training table and the rainfall table are configured. The
/// forecast and risk endpoints work either way.
fn recommender_from_env() -> Result<Option<Arc<Recommender>>, Box<dyn std::error::Error>> {
    let crop_table = std::env::var("MANDICAST_CROP_TABLE").ok();
    let rainfall_table = std::env::var("MANDICAST_RAINFALL_TABLE").ok();

    let (crop_table, rainfall_table) = match (crop_table, rainfall_table) {
        (Some(crop), Some(rainfall)) => (PathBuf::from(crop), PathBuf::from(rainfall)),
        _ => {
            info!(
                component = COMPONENT,
                event = "recommender.disabled",
                reason = "MANDICAST_CROP_TABLE or MANDICAST_RAINFALL_TABLE unset",
            );
            return Ok(None);
        }
    };

    let classifier = CentroidClassifier::train_from_csv(&crop_table)?;
    let mut recommender = Recommender::new(Box::new(classifier), &rainfall_table)?;

    if let Ok(price_table) = std::env::var("MANDICAST_PRICE_TABLE") {
        match load_price_table(&PathBuf::from(&price_table)) {
            Ok(prices) => {
                info!(
                    component = COMPONENT,
                    event = "recommender.prices_loaded",
                    rows = prices.len(),
                );
                recommender = recommender.with_prices(prices);
            }
            Err(err) => warn!(
                component = COMPONENT,
                event = "recommender.prices_unavailable",
                path = %price_table,
                error = %err,
            ),
        }
    }

    Ok(Some(Arc::new(recommender)))
}
