use std::path::PathBuf;

use mandicast::{
    evaluate_glut_risk, init_logging, log_app_start, log_job_start, logging_config_from_env,
    read_features, read_forecast, SeriesKey,
};
use tracing::info;

const COMPONENT: &str = "glut_report";

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

    log_job_start(COMPONENT, &crop, &market_id);

    let key = SeriesKey::new(&crop, &market_id);
    let features = read_features(&key.feature_path(&data_dir))?;
    let forecast = read_forecast(&key.forecast_path(&data_dir, horizon))?;

    let signal = evaluate_glut_risk(&features, &forecast, &crop, &market_id);
    info!(
        component = COMPONENT,
        event = "risk.evaluated",
        signal = signal.signal.as_str(),
        hist_mean_30 = signal.hist_mean_30,
        pred_mean_14 = signal.pred_mean_14,
    );

    println!("{}", serde_json::to_string_pretty(&signal)?);
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
