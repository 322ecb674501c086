use std::path::PathBuf;

use mandicast::{
    forecast_with_fallback, init_logging, log_app_start, log_job_done, log_job_start,
    logging_config_from_env, read_features, write_forecast, ForecastStrategy, NaiveStrategy,
    SeriesKey,
};
use tracing::info;

const COMPONENT: &str = "make_forecast";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let data_dir = env_path("MANDICAST_DATA_DIR", "data/processed");
    let crop = env_string("MANDICAST_CROP", mandicast::DEFAULT_CROP);
    let market_id = env_string("MANDICAST_MARKET_ID", mandicast::DEFAULT_MARKET_ID);
    let horizon: u32 = std::env::var("MANDICAST_HORIZON")
        .unwrap_or_else(|_| mandicast::DEFAULT_HORIZON_DAYS.to_string())
        .parse()?;
    let strategy = env_string("MANDICAST_STRATEGY", "seasonal");

    log_job_start(COMPONENT, &crop, &market_id);

    let key = SeriesKey::new(&crop, &market_id);
    let features = read_features(&key.feature_path(&data_dir))?;

    let (rows, model) = match strategy.as_str() {
        "naive" => {
            let strategy = NaiveStrategy;
            (strategy.forecast(&features, horizon)?, strategy.name())
        }
        _ => forecast_with_fallback(&features, horizon)?,
    };
    info!(
        component = COMPONENT,
        event = "forecast.generated",
        model,
        horizon,
        feature_rows = features.len(),
    );

    let output = key.forecast_path(&data_dir, horizon);
    write_forecast(&output, &rows)?;
    log_job_done(COMPONENT, rows.len(), &output);

    Ok(())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
