//! Daily feature series construction for one (crop, market) pair.
//!
//! The raw series is filtered, deduplicated, reindexed to calendar-day
//! frequency with forward fill, then annotated with lag and trailing
//! moving-average features and an optional weather join.
//!
//! Weather is joined by date only. The source system carries no market
//! dimension for weather, so all markets sharing a date see the same
//! weather row; kept as-is, a known modeling simplification.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::ingest::{PriceObservation, WeatherObservation};

pub const LAG_OFFSETS: [usize; 4] = [1, 7, 14, 30];
pub const MA_WINDOWS: [usize; 2] = [7, 30];

/// One fully derived day of the feature series.
///
/// Lag and moving-average fields are `None` during warm-up; weather fields
/// are `None` when no weather table was supplied or no value has been seen
/// yet for the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub price: f64,
    pub price_lag_1: Option<f64>,
    pub price_lag_7: Option<f64>,
    pub price_lag_14: Option<f64>,
    pub price_lag_30: Option<f64>,
    pub price_ma_7: Option<f64>,
    pub price_ma_30: Option<f64>,
    pub precipitation: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub humidity: Option<f64>,
}

impl FeatureRow {
    pub fn has_weather(&self) -> bool {
        self.precipitation.is_some()
            || self.temp_max.is_some()
            || self.temp_min.is_some()
            || self.humidity.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildReport {
    pub input_rows: usize,
    pub filtered_rows: usize,
    pub duplicate_dates_removed: usize,
    pub gap_days_filled: usize,
    pub output_rows: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weather_joined: bool,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("no price rows matched commodity '{crop}' in market '{market_id}'")]
    EmptySeries { crop: String, market_id: String },
}

/// Build the contiguous daily feature series for `crop` (case-insensitive
/// substring match on commodity) in `market_id` (exact match).
pub fn build_features(
    prices: &[PriceObservation],
    weather: Option<&[WeatherObservation]>,
    crop: &str,
    market_id: &str,
) -> Result<(Vec<FeatureRow>, FeatureBuildReport), FeatureError> {
    let crop_needle = crop.to_lowercase();

    let mut filtered: Vec<(NaiveDate, f64)> = prices
        .iter()
        .filter(|row| row.commodity.to_lowercase().contains(&crop_needle))
        .filter(|row| row.market_id == market_id)
        .filter_map(|row| row.price.map(|price| (row.date, price)))
        .collect();
    filtered.sort_by_key(|(date, _)| *date);
    let filtered_rows = filtered.len();

    let mut deduped: Vec<(NaiveDate, f64)> = Vec::with_capacity(filtered.len());
    for (date, price) in filtered {
        if deduped.last().map(|(last, _)| *last == date).unwrap_or(false) {
            continue;
        }
        deduped.push((date, price));
    }
    let duplicate_dates_removed = filtered_rows - deduped.len();

    let (Some((start_date, _)), Some((end_date, _))) = (deduped.first(), deduped.last()) else {
        return Err(FeatureError::EmptySeries {
            crop: crop.to_string(),
            market_id: market_id.to_string(),
        });
    };
    let (start_date, end_date) = (*start_date, *end_date);

    // Reindex to one row per calendar day, forward-filling from the most
    // recent known price. Never interpolated, never look-ahead.
    let mut prices_daily: Vec<(NaiveDate, f64)> = Vec::new();
    let mut gap_days_filled = 0usize;
    let mut source = deduped.iter().peekable();
    let mut last_price = deduped[0].1;
    let mut day = start_date;
    while day <= end_date {
        if let Some((date, price)) = source.peek() {
            if *date == day {
                last_price = *price;
                source.next();
            } else {
                gap_days_filled += 1;
            }
        }
        prices_daily.push((day, last_price));
        day = day
            .checked_add_days(Days::new(1))
            .expect("calendar day increment stays in range");
    }

    let weather_by_date: Option<HashMap<NaiveDate, &WeatherObservation>> =
        weather.map(|rows| rows.iter().map(|row| (row.date, row)).collect());

    let series: Vec<f64> = prices_daily.iter().map(|(_, price)| *price).collect();
    let mut rows: Vec<FeatureRow> = prices_daily
        .iter()
        .enumerate()
        .map(|(idx, (date, price))| {
            let lag = |offset: usize| idx.checked_sub(offset).map(|at| series[at]);
            let ma = |window: usize| {
                (idx + 1 >= window)
                    .then(|| series[idx + 1 - window..=idx].iter().sum::<f64>() / window as f64)
            };
            let weather_row = weather_by_date
                .as_ref()
                .and_then(|by_date| by_date.get(date))
                .copied();

            FeatureRow {
                date: *date,
                price: *price,
                price_lag_1: lag(1),
                price_lag_7: lag(7),
                price_lag_14: lag(14),
                price_lag_30: lag(30),
                price_ma_7: ma(7),
                price_ma_30: ma(30),
                precipitation: weather_row.and_then(|w| w.precipitation),
                temp_max: weather_row.and_then(|w| w.temp_max),
                temp_min: weather_row.and_then(|w| w.temp_min),
                humidity: weather_row.and_then(|w| w.humidity),
            }
        })
        .collect();

    forward_fill_weather(&mut rows);

    let report = FeatureBuildReport {
        input_rows: prices.len(),
        filtered_rows,
        duplicate_dates_removed,
        gap_days_filled,
        output_rows: rows.len(),
        start_date,
        end_date,
        weather_joined: weather.is_some(),
    };

    info!(
        component = "features",
        event = "features.build.finish",
        crop = crop,
        market_id = market_id,
        input_rows = report.input_rows,
        filtered_rows = report.filtered_rows,
        gap_days_filled = report.gap_days_filled,
        output_rows = report.output_rows,
        weather_joined = report.weather_joined
    );

    Ok((rows, report))
}

/// Final forward-fill pass across weather columns. Price-derived columns
/// only ever have leading `None`s, which forward fill leaves untouched.
fn forward_fill_weather(rows: &mut [FeatureRow]) {
    let mut last = [None::<f64>; 4];
    for row in rows {
        let cells: [&mut Option<f64>; 4] = [
            &mut row.precipitation,
            &mut row.temp_max,
            &mut row.temp_min,
            &mut row.humidity,
        ];
        for (cell, carry) in cells.into_iter().zip(last.iter_mut()) {
            match cell {
                Some(value) => *carry = Some(*value),
                None => *cell = *carry,
            }
        }
    }
}
