//! Raw mandi price and weather table loading.

use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One raw modal-price observation as reported by a mandi feed.
///
/// `price` stays optional here; rows without a usable price are dropped
/// during series filtering, not at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub market_id: String,
    pub market_name: Option<String>,
    pub commodity: String,
    pub price: Option<f64>,
}

/// Daily weather record. Joined to prices by date only; the source system
/// has no market dimension for weather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    pub precipitation: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column '{column}' in {path}")]
    MissingColumn { column: &'static str, path: String },
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
}

struct HeaderIndex {
    indices: Vec<Option<usize>>,
}

impl HeaderIndex {
    fn resolve(
        headers: &StringRecord,
        required: &[&'static str],
        optional: &[&'static str],
        path: &Path,
    ) -> Result<Self, IngestError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };

        let mut indices = Vec::with_capacity(required.len() + optional.len());
        for column in required {
            let idx = find(column).ok_or_else(|| IngestError::MissingColumn {
                column,
                path: path.display().to_string(),
            })?;
            indices.push(Some(idx));
        }
        for column in optional {
            indices.push(find(column));
        }
        Ok(Self { indices })
    }

    fn get<'r>(&self, record: &'r StringRecord, slot: usize) -> Option<&'r str> {
        self.indices[slot]
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Load the raw mandi price table.
///
/// Required columns: `date`, `market_id`, `commodity`, `modal_price`.
/// `market_name` is carried along when present.
pub fn load_price_table(path: &Path) -> Result<Vec<PriceObservation>, IngestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let index = HeaderIndex::resolve(
        reader.headers()?,
        &["date", "market_id", "commodity", "modal_price"],
        &["market_name"],
        path,
    )?;

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        let record = record?;
        let line = offset as u64 + 2;
        let date = parse_date(index.get(&record, 0), "date", line)?;
        let market_id = index.get(&record, 1).unwrap_or_default().to_string();
        let commodity = index.get(&record, 2).unwrap_or_default().to_string();
        let price = parse_optional_f64(index.get(&record, 3), "modal_price", line)?;
        let market_name = index.get(&record, 4).map(str::to_string);

        rows.push(PriceObservation {
            date,
            market_id,
            market_name,
            commodity,
            price,
        });
    }

    info!(
        component = "ingest",
        event = "ingest.prices.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Load the daily weather table. All measurement columns are optional.
pub fn load_weather_table(path: &Path) -> Result<Vec<WeatherObservation>, IngestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let index = HeaderIndex::resolve(
        reader.headers()?,
        &["date"],
        &["precipitation", "temp_max", "temp_min", "humidity"],
        path,
    )?;

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        let record = record?;
        let line = offset as u64 + 2;
        rows.push(WeatherObservation {
            date: parse_date(index.get(&record, 0), "date", line)?,
            precipitation: parse_optional_f64(index.get(&record, 1), "precipitation", line)?,
            temp_max: parse_optional_f64(index.get(&record, 2), "temp_max", line)?,
            temp_min: parse_optional_f64(index.get(&record, 3), "temp_min", line)?,
            humidity: parse_optional_f64(index.get(&record, 4), "humidity", line)?,
        });
    }

    info!(
        component = "ingest",
        event = "ingest.weather.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

fn parse_date(
    raw: Option<&str>,
    field: &'static str,
    line: u64,
) -> Result<NaiveDate, IngestError> {
    let raw = raw.ok_or_else(|| IngestError::ParseField {
        field,
        value: String::new(),
        line,
    })?;
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| IngestError::ParseField {
        field,
        value: raw.to_string(),
        line,
    })
}

fn parse_optional_f64(
    raw: Option<&str>,
    field: &'static str,
    line: u64,
) -> Result<Option<f64>, IngestError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| IngestError::ParseField {
                field,
                value: raw.to_string(),
                line,
            }),
    }
}
