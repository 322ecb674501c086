//! Crop recommendation from district rainfall and soil statistics, with a
//! short market analysis over recent mandi prices.
//!
//! The classifier sits behind a trait so the scoring model can be swapped
//! without touching the lookup and response plumbing. The default is a
//! nearest-centroid model over range-normalized features, trained from the
//! same labelled soil table the scoring consumes.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::ingest::PriceObservation;

const FEATURE_COUNT: usize = 7;
const EMA_SPAN: f64 = 5.0;
const ALTERNATIVE_CROP_LIMIT: usize = 2;
const ALTERNATIVE_LOCATION_LIMIT: usize = 3;
const RAINFALL_SIMILARITY_MM: f64 = 200.0;
const MIN_LOOKBACK_DAYS: u32 = 7;
const MAX_LOOKBACK_DAYS: u32 = 365;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("recommendation io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("recommendation csv failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("crop training table is empty")]
    EmptyTrainingSet,
    #[error("no rainfall data available for {state}, {district}")]
    UnknownLocation {
        state: String,
        district: String,
        suggestions: Vec<LocationSuggestion>,
    },
}

/// Environmental feature vector in training-table order:
/// N, P, K, temperature, humidity, pH, rainfall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvConditions(pub [f64; FEATURE_COUNT]);

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCrop {
    pub label: String,
    pub probability: f64,
}

/// Scoring seam. Implementations return every known crop with a
/// probability, sorted best first.
pub trait CropClassifier: Send + Sync {
    fn labels(&self) -> Vec<String>;
    fn score(&self, conditions: &EnvConditions) -> Vec<ScoredCrop>;
    fn feature_means(&self) -> EnvConditions;
}

#[derive(Debug, Deserialize)]
struct CropSample {
    #[serde(rename = "N")]
    n: f64,
    #[serde(rename = "P")]
    p: f64,
    #[serde(rename = "K")]
    k: f64,
    temperature: f64,
    humidity: f64,
    ph: f64,
    rainfall: f64,
    label: String,
}

impl CropSample {
    fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.n,
            self.p,
            self.k,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }
}

/// Nearest-centroid crop model. Each label is summarized by its feature
/// mean; a query is scored by distance in range-normalized feature space,
/// softened through exp(-distance) and normalized to probabilities.
pub struct CentroidClassifier {
    labels: Vec<String>,
    centroids: Vec<[f64; FEATURE_COUNT]>,
    ranges: [f64; FEATURE_COUNT],
    means: [f64; FEATURE_COUNT],
}

impl CentroidClassifier {
    pub fn train_from_csv(path: &Path) -> Result<Self, RecommendError> {
        let mut reader = csv::Reader::from_reader(std::fs::File::open(path)?);
        let samples: Vec<CropSample> = reader
            .deserialize()
            .collect::<Result<_, csv::Error>>()?;
        Self::train(&samples)
    }

    fn train(samples: &[CropSample]) -> Result<Self, RecommendError> {
        if samples.is_empty() {
            return Err(RecommendError::EmptyTrainingSet);
        }

        let mut means = [0.0; FEATURE_COUNT];
        let mut mins = [f64::INFINITY; FEATURE_COUNT];
        let mut maxs = [f64::NEG_INFINITY; FEATURE_COUNT];
        let mut by_label: HashMap<&str, (usize, [f64; FEATURE_COUNT])> = HashMap::new();

        for sample in samples {
            let features = sample.features();
            let entry = by_label
                .entry(sample.label.as_str())
                .or_insert((0, [0.0; FEATURE_COUNT]));
            entry.0 += 1;
            for dim in 0..FEATURE_COUNT {
                entry.1[dim] += features[dim];
                means[dim] += features[dim];
                mins[dim] = mins[dim].min(features[dim]);
                maxs[dim] = maxs[dim].max(features[dim]);
            }
        }

        let total = samples.len() as f64;
        for dim in 0..FEATURE_COUNT {
            means[dim] /= total;
        }

        let mut ranges = [1.0; FEATURE_COUNT];
        for dim in 0..FEATURE_COUNT {
            let span = maxs[dim] - mins[dim];
            if span > 0.0 {
                ranges[dim] = span;
            }
        }

        // Stable label order keeps scoring deterministic across retrains.
        let mut labels: Vec<String> = by_label.keys().map(|label| label.to_string()).collect();
        labels.sort();

        let centroids = labels
            .iter()
            .map(|label| {
                let (count, sums) = &by_label[label.as_str()];
                let mut centroid = [0.0; FEATURE_COUNT];
                for dim in 0..FEATURE_COUNT {
                    centroid[dim] = sums[dim] / *count as f64;
                }
                centroid
            })
            .collect();

        info!(
            component = "recommender",
            event = "classifier.trained",
            samples = samples.len(),
            crops = labels.len(),
        );

        Ok(Self {
            labels,
            centroids,
            ranges,
            means,
        })
    }
}

impl CropClassifier for CentroidClassifier {
    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn score(&self, conditions: &EnvConditions) -> Vec<ScoredCrop> {
        let weights: Vec<f64> = self
            .centroids
            .iter()
            .map(|centroid| {
                let mut sq = 0.0;
                for dim in 0..FEATURE_COUNT {
                    let delta = (conditions.0[dim] - centroid[dim]) / self.ranges[dim];
                    sq += delta * delta;
                }
                (-sq.sqrt()).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let mut scored: Vec<ScoredCrop> = self
            .labels
            .iter()
            .zip(weights)
            .map(|(label, weight)| ScoredCrop {
                label: label.clone(),
                probability: weight / total,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        scored
    }

    fn feature_means(&self) -> EnvConditions {
        EnvConditions(self.means)
    }
}

#[derive(Debug, Deserialize)]
struct RainfallRow {
    #[serde(rename = "STATE_UT_NAME")]
    state: String,
    #[serde(rename = "DISTRICT")]
    district: String,
    #[serde(rename = "ANNUAL")]
    annual_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSuggestion {
    pub state: String,
    pub district: String,
    pub rainfall_mm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub success: bool,
    pub recommendation: CropAdvice,
    pub market_analysis: Option<MarketAnalysis>,
    pub alternative_crops: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CropAdvice {
    pub crop: String,
    pub confidence: f64,
    pub environmental_conditions: EnvSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvSummary {
    pub state: String,
    pub district: String,
    pub annual_rainfall_mm: f64,
    pub n_pk_ratio: f64,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub soil_ph: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketAnalysis {
    pub market: String,
    pub selling_date: String,
    pub predicted_price: f64,
    pub historical_price: f64,
    pub confidence: f64,
}

/// Lookup plus classification over the loaded tables. Kept alive for the
/// lifetime of the server; all state is read-only after construction.
pub struct Recommender {
    classifier: Box<dyn CropClassifier>,
    rainfall: Vec<RainfallRow>,
    prices: Vec<PriceObservation>,
}

impl Recommender {
    pub fn new(classifier: Box<dyn CropClassifier>, rainfall_table: &Path) -> Result<Self, RecommendError> {
        let mut reader = csv::Reader::from_reader(std::fs::File::open(rainfall_table)?);
        let rainfall: Vec<RainfallRow> = reader
            .deserialize()
            .collect::<Result<_, csv::Error>>()?;
        Ok(Self {
            classifier,
            rainfall,
            prices: Vec::new(),
        })
    }

    /// Attach the mandi price history used by the market analysis section.
    /// Without it the recommendation still works, just without prices.
    pub fn with_prices(mut self, prices: Vec<PriceObservation>) -> Self {
        self.prices = prices;
        self
    }

    pub fn known_crops(&self) -> Vec<String> {
        self.classifier.labels()
    }

    pub fn recommend(
        &self,
        state: &str,
        district: &str,
        lookback_days: u32,
        today: NaiveDate,
    ) -> Result<Recommendation, RecommendError> {
        let state = state.trim().to_uppercase();
        let district = district.trim().to_uppercase();
        let lookback_days = lookback_days.clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS);

        let matching: Vec<&RainfallRow> = self
            .rainfall
            .iter()
            .filter(|row| row.state.trim().to_uppercase() == state
                && row.district.trim().to_uppercase() == district)
            .collect();
        if matching.is_empty() {
            return Err(RecommendError::UnknownLocation {
                suggestions: self.alternative_locations(&state),
                state,
                district,
            });
        }
        let avg_rainfall =
            matching.iter().map(|row| row.annual_mm).sum::<f64>() / matching.len() as f64;

        let conditions = synthesize_conditions(self.classifier.feature_means(), avg_rainfall);
        let scored = self.classifier.score(&conditions);
        let best = &scored[0];

        let alternative_crops = scored[1..]
            .iter()
            .take(ALTERNATIVE_CROP_LIMIT)
            .map(|crop| crop.label.clone())
            .collect();

        let market_analysis = analyze_market(&self.prices, &best.label, lookback_days, today);

        info!(
            component = "recommender",
            event = "recommend.served",
            state = %state,
            district = %district,
            crop = %best.label,
        );

        Ok(Recommendation {
            success: true,
            recommendation: CropAdvice {
                crop: best.label.clone(),
                confidence: round_to(best.probability, 3),
                environmental_conditions: EnvSummary {
                    state,
                    district,
                    annual_rainfall_mm: round_to(avg_rainfall, 1),
                    n_pk_ratio: round_to(
                        (conditions.0[0] + conditions.0[1] + conditions.0[2]) / 3.0,
                        1,
                    ),
                    temperature_c: round_to(conditions.0[3], 1),
                    humidity_percent: round_to(conditions.0[4], 1),
                    soil_ph: round_to(conditions.0[5], 1),
                },
            },
            market_analysis,
            alternative_crops,
        })
    }

    /// Up to three districts outside the requested state whose annual
    /// rainfall is within 200mm of the requested state's average.
    fn alternative_locations(&self, state: &str) -> Vec<LocationSuggestion> {
        let in_state: Vec<f64> = self
            .rainfall
            .iter()
            .filter(|row| row.state.trim().to_uppercase() == state)
            .map(|row| row.annual_mm)
            .collect();
        if in_state.is_empty() {
            return Vec::new();
        }
        let target = in_state.iter().sum::<f64>() / in_state.len() as f64;

        self.rainfall
            .iter()
            .filter(|row| {
                row.state.trim().to_uppercase() != state
                    && (row.annual_mm - target).abs() < RAINFALL_SIMILARITY_MM
            })
            .take(ALTERNATIVE_LOCATION_LIMIT)
            .map(|row| LocationSuggestion {
                state: row.state.clone(),
                district: row.district.clone(),
                rainfall_mm: round_to(row.annual_mm, 1),
            })
            .collect()
    }
}

/// Adjust the training-set averages toward the district's rainfall regime.
/// High-rainfall districts skew cooler and more humid, dry districts the
/// other way.
fn synthesize_conditions(means: EnvConditions, rainfall: f64) -> EnvConditions {
    let base = means.0;
    if rainfall > 1000.0 {
        EnvConditions([
            base[0] * 1.1,
            base[1] * 0.9,
            base[2] * 1.05,
            base[3] - 2.0,
            base[4] * 1.15,
            base[5],
            rainfall,
        ])
    } else {
        EnvConditions([
            base[0] * 0.95,
            base[1] * 1.1,
            base[2] * 0.95,
            base[3] + 1.0,
            base[4] * 0.85,
            base[5] + 0.2,
            rainfall,
        ])
    }
}

/// Pick the best recent selling opportunity for the crop: the record whose
/// exponential moving average of price is highest inside the lookback
/// window. Falls back to the full commodity set when the crop has no rows.
fn analyze_market(
    prices: &[PriceObservation],
    crop: &str,
    lookback_days: u32,
    today: NaiveDate,
) -> Option<MarketAnalysis> {
    if prices.is_empty() {
        return None;
    }

    let needle = crop.to_lowercase();
    let mut filtered: Vec<&PriceObservation> = prices
        .iter()
        .filter(|obs| obs.commodity.to_lowercase().contains(&needle))
        .collect();
    if filtered.is_empty() {
        filtered = prices.iter().collect();
    }
    filtered.sort_by_key(|obs| obs.date);

    let cutoff = today.checked_sub_days(Days::new(lookback_days as u64))?;
    let recent: Vec<&PriceObservation> =
        filtered.into_iter().filter(|obs| obs.date >= cutoff).collect();
    if recent.is_empty() {
        return None;
    }

    let present: Vec<f64> = recent.iter().filter_map(|obs| obs.price).collect();
    if present.is_empty() {
        return None;
    }
    let fill = present.iter().sum::<f64>() / present.len() as f64;
    let filled: Vec<f64> = recent.iter().map(|obs| obs.price.unwrap_or(fill)).collect();

    let ema = ewm_mean(&filled, EMA_SPAN);
    let mut best_idx = 0;
    for (idx, value) in ema.iter().enumerate() {
        if *value > ema[best_idx] {
            best_idx = idx;
        }
    }
    let best = recent[best_idx];

    Some(MarketAnalysis {
        market: best
            .market_name
            .clone()
            .unwrap_or_else(|| best.market_id.clone()),
        selling_date: best.date.format("%Y-%m-%d").to_string(),
        predicted_price: ema[best_idx],
        historical_price: filled[best_idx],
        confidence: price_confidence(&filled),
    })
}

/// Exponential weighted mean with bias correction: at each step the output
/// is a weighted average over the full history with decay `1 - 2/(span+1)`.
fn ewm_mean(values: &[f64], span: f64) -> Vec<f64> {
    let alpha = 2.0 / (span + 1.0);
    let decay = 1.0 - alpha;
    let mut out = Vec::with_capacity(values.len());
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for &value in values {
        numerator = value + decay * numerator;
        denominator = 1.0 + decay * denominator;
        out.push(numerator / denominator);
    }
    out
}

/// Stability score from the coefficient of variation, clamped to [0.1, 0.9].
/// Too few samples for a meaningful spread pins it at 0.5.
fn price_confidence(prices: &[f64]) -> f64 {
    if prices.len() < 3 {
        return 0.5;
    }
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    if mean == 0.0 || !mean.is_finite() {
        return 0.0;
    }
    let variance = prices
        .iter()
        .map(|price| (price - mean).powi(2))
        .sum::<f64>()
        / (prices.len() - 1) as f64;
    let cv = variance.sqrt() / mean;
    (1.0 - cv).clamp(0.1, 0.9)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
