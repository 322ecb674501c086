//! Glut-risk signal over a feature series and its forecast.
//!
//! One pure function shared by the batch report and the HTTP endpoint, so
//! the threshold logic cannot drift between the two paths.

use serde::{Deserialize, Serialize};

use crate::features::FeatureRow;
use crate::forecast::ForecastRow;

const HIST_WINDOW: usize = 30;
const PRED_WINDOW: usize = 14;
const HIGH_THRESHOLD: f64 = 0.8;
const MEDIUM_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlutSignal {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl GlutSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    fn advisory_body(self) -> &'static str {
        match self {
            Self::High => {
                "High risk of glut. Consider selling in alternative markets or using cold storage."
            }
            Self::Medium => "Moderate risk. Monitor prices closely.",
            Self::Low => "Low risk. Normal market conditions expected.",
        }
    }
}

/// The per-request risk result. Ephemeral; recomputed from the persisted
/// artifacts on every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub market: String,
    pub crop: String,
    pub hist_mean_30: f64,
    pub pred_mean_14: f64,
    pub signal: GlutSignal,
    pub advisory: String,
}

/// Compare the near-term forecast against the recent historical baseline.
///
/// Thresholds are evaluated in order, first match wins:
/// below 80% of the baseline is HIGH, below 95% is MEDIUM, else LOW.
/// Fewer than 30 (or 14) rows just means a smaller-sample mean.
pub fn evaluate_glut_risk(
    features: &[FeatureRow],
    forecast: &[ForecastRow],
    crop: &str,
    market_id: &str,
) -> RiskSignal {
    let hist_mean_30 = mean(
        features[features.len().saturating_sub(HIST_WINDOW)..]
            .iter()
            .map(|row| row.price),
    );
    let pred_mean_14 = mean(
        forecast[..forecast.len().min(PRED_WINDOW)]
            .iter()
            .map(|row| row.predicted),
    );

    let signal = if pred_mean_14 < HIGH_THRESHOLD * hist_mean_30 {
        GlutSignal::High
    } else if pred_mean_14 < MEDIUM_THRESHOLD * hist_mean_30 {
        GlutSignal::Medium
    } else {
        GlutSignal::Low
    };

    RiskSignal {
        market: market_id.to_string(),
        crop: crop.to_string(),
        hist_mean_30,
        pred_mean_14,
        signal,
        advisory: format!("Risk Level: {}. {}", signal.as_str(), signal.advisory_body()),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

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
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        predictions
            .iter()
            .enumerate()
            .map(|(idx, &predicted)| ForecastRow {
                date: start.checked_add_days(Days::new(idx as u64)).unwrap(),
                predicted,
                lower: predicted * 0.9,
                upper: predicted * 1.1,
            })
            .collect()
    }

    fn signal_for(hist: f64, pred: f64) -> GlutSignal {
        let features = feature_rows(&vec![hist; 30]);
        let forecast = forecast_rows(&vec![pred; 14]);
        evaluate_glut_risk(&features, &forecast, "tomato", "MAH_Pune").signal
    }

    #[test]
    fn threshold_boundaries_are_exclusive_on_the_high_side() {
        assert_eq!(signal_for(100.0, 79.99), GlutSignal::High);
        assert_eq!(signal_for(100.0, 80.00), GlutSignal::Medium);
        assert_eq!(signal_for(100.0, 94.99), GlutSignal::Medium);
        assert_eq!(signal_for(100.0, 95.00), GlutSignal::Low);
    }

    #[test]
    fn hist_mean_uses_only_the_last_thirty_rows() {
        let mut prices = vec![1000.0; 20];
        prices.extend(vec![100.0; 30]);
        let result = evaluate_glut_risk(
            &feature_rows(&prices),
            &forecast_rows(&[100.0; 14]),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(result.hist_mean_30, 100.0);
        assert_eq!(result.signal, GlutSignal::Low);
    }

    #[test]
    fn pred_mean_uses_only_the_first_fourteen_rows() {
        let mut predictions = vec![100.0; 14];
        predictions.extend(vec![1.0; 16]);
        let result = evaluate_glut_risk(
            &feature_rows(&[100.0; 30]),
            &forecast_rows(&predictions),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(result.pred_mean_14, 100.0);
    }

    #[test]
    fn short_history_degrades_to_available_sample_means() {
        let result = evaluate_glut_risk(
            &feature_rows(&[90.0, 110.0]),
            &forecast_rows(&[100.0; 3]),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(result.hist_mean_30, 100.0);
        assert_eq!(result.pred_mean_14, 100.0);
        assert_eq!(result.signal, GlutSignal::Low);
    }

    #[test]
    fn advisory_text_carries_the_signal_prefix() {
        let high = evaluate_glut_risk(
            &feature_rows(&[100.0; 30]),
            &forecast_rows(&[70.0; 14]),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(high.signal, GlutSignal::High);
        assert_eq!(
            high.advisory,
            "Risk Level: HIGH. High risk of glut. Consider selling in alternative markets or using cold storage."
        );

        let medium = evaluate_glut_risk(
            &feature_rows(&[100.0; 30]),
            &forecast_rows(&[90.0; 14]),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(
            medium.advisory,
            "Risk Level: MEDIUM. Moderate risk. Monitor prices closely."
        );

        let low = evaluate_glut_risk(
            &feature_rows(&[100.0; 30]),
            &forecast_rows(&[100.0; 14]),
            "tomato",
            "MAH_Pune",
        );
        assert_eq!(
            low.advisory,
            "Risk Level: LOW. Low risk. Normal market conditions expected."
        );
    }

    #[test]
    fn identical_inputs_produce_identical_output() {
        let features = feature_rows(&[100.0; 30]);
        let forecast = forecast_rows(&[85.0; 14]);
        let a = evaluate_glut_risk(&features, &forecast, "tomato", "MAH_Pune");
        let b = evaluate_glut_risk(&features, &forecast, "tomato", "MAH_Pune");
        assert_eq!(a, b);
    }

    #[test]
    fn glut_signal_serializes_to_upper_case_labels() {
        assert_eq!(
            serde_json::to_string(&GlutSignal::High).unwrap(),
            "\"HIGH\""
        );
        assert_eq!(serde_json::to_string(&GlutSignal::Low).unwrap(), "\"LOW\"");
    }
}
