use std::path::PathBuf;

use mandicast::{
    build_features, init_logging, load_price_table, load_weather_table, log_app_start,
    log_job_done, log_job_start, logging_config_from_env, write_features, SeriesKey,
};
use tracing::{info, warn};

const COMPONENT: &str = "build_features";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let raw_dir = env_path("MANDICAST_RAW_DIR", "data/raw");
    let data_dir = env_path("MANDICAST_DATA_DIR", "data/processed");
    let crop = env_string("MANDICAST_CROP", mandicast::DEFAULT_CROP);
    let market_id = env_string("MANDICAST_MARKET_ID", mandicast::DEFAULT_MARKET_ID);

    log_job_start(COMPONENT, &crop, &market_id);

    let prices = load_price_table(&raw_dir.join("prices.csv"))?;

    let weather_path = raw_dir.join("weather.csv");
    let weather = if weather_path.exists() {
        Some(load_weather_table(&weather_path)?)
    } else {
        warn!(
            component = COMPONENT,
            event = "weather.missing",
            path = %weather_path.display(),
        );
        None
    };

    let (rows, report) = build_features(&prices, weather.as_deref(), &crop, &market_id)?;
    info!(
        component = COMPONENT,
        event = "features.built",
        input_rows = report.input_rows,
        filtered_rows = report.filtered_rows,
        duplicate_dates_removed = report.duplicate_dates_removed,
        gap_days_filled = report.gap_days_filled,
        output_rows = report.output_rows,
        weather_joined = report.weather_joined,
    );

    std::fs::create_dir_all(&data_dir)?;
    let output = SeriesKey::new(&crop, &market_id).feature_path(&data_dir);
    write_features(&output, &rows)?;
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
