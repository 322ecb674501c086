//! CSV artifacts shared between the batch binaries and the API server.
//!
//! Feature and forecast tables are plain CSV files under a data directory,
//! named deterministically from the series key so readers can locate them
//! without a manifest. Writes go through a temp file and rename so a
//! concurrent reader never observes a half-written table.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::features::FeatureRow;
use crate::forecast::ForecastRow;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifies one (crop, market) series across the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub crop: String,
    pub market_id: String,
}

impl SeriesKey {
    pub fn new(crop: impl Into<String>, market_id: impl Into<String>) -> Self {
        Self {
            crop: crop.into(),
            market_id: market_id.into(),
        }
    }

    pub fn feature_file_name(&self) -> String {
        format!("{}_{}_features.csv", self.crop, self.market_id)
    }

    pub fn forecast_file_name(&self, horizon: u32) -> String {
        format!("forecast_{}_{}_{}d.csv", self.crop, self.market_id, horizon)
    }

    pub fn feature_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.feature_file_name())
    }

    pub fn forecast_path(&self, data_dir: &Path, horizon: u32) -> PathBuf {
        data_dir.join(self.forecast_file_name(horizon))
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {path}")]
    MissingArtifact { path: PathBuf },
    #[error("artifact io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact csv failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("artifact {path} missing required column '{column}'")]
    MissingColumn { column: String, path: PathBuf },
    #[error("artifact field '{field}' unparseable from '{value}' at line {line}")]
    ParseField {
        field: String,
        value: String,
        line: u64,
    },
}

const FEATURE_BASE_COLUMNS: [&str; 8] = [
    "date",
    "price",
    "price_lag_1",
    "price_lag_7",
    "price_lag_14",
    "price_lag_30",
    "price_ma_7",
    "price_ma_30",
];
const FEATURE_WEATHER_COLUMNS: [&str; 4] = ["precipitation", "temp_max", "temp_min", "humidity"];
const FORECAST_COLUMNS: [&str; 4] = ["date", "predicted", "lower", "upper"];

/// Persist a feature table. Weather columns are emitted only when at least
/// one row carries weather, so price-only builds stay price-only on disk.
pub fn write_features(path: &Path, rows: &[FeatureRow]) -> Result<(), ArtifactError> {
    let with_weather = rows.iter().any(FeatureRow::has_weather);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = FEATURE_BASE_COLUMNS.to_vec();
    if with_weather {
        header.extend(FEATURE_WEATHER_COLUMNS);
    }
    writer.write_record(&header)?;

    for row in rows {
        let mut record: Vec<String> = vec![
            row.date.format(DATE_FORMAT).to_string(),
            format_float(row.price),
            format_opt(row.price_lag_1),
            format_opt(row.price_lag_7),
            format_opt(row.price_lag_14),
            format_opt(row.price_lag_30),
            format_opt(row.price_ma_7),
            format_opt(row.price_ma_30),
        ];
        if with_weather {
            record.push(format_opt(row.precipitation));
            record.push(format_opt(row.temp_max));
            record.push(format_opt(row.temp_min));
            record.push(format_opt(row.humidity));
        }
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ArtifactError::Io(err.into_error()))?;
    write_atomic(path, &bytes)
}

/// Load a feature table. Weather columns are optional; their absence yields
/// `None` in every row rather than an error.
pub fn read_features(path: &Path) -> Result<Vec<FeatureRow>, ArtifactError> {
    let mut reader = open_reader(path)?;
    let header = reader.headers()?.clone();
    let index = ColumnIndex::new(&header);
    for column in FEATURE_BASE_COLUMNS {
        index.require(column, path)?;
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        rows.push(FeatureRow {
            date: parse_date(index.get(&record, "date"), line)?,
            price: parse_required(index.get(&record, "price"), "price", line)?,
            price_lag_1: parse_optional(index.get(&record, "price_lag_1"), "price_lag_1", line)?,
            price_lag_7: parse_optional(index.get(&record, "price_lag_7"), "price_lag_7", line)?,
            price_lag_14: parse_optional(index.get(&record, "price_lag_14"), "price_lag_14", line)?,
            price_lag_30: parse_optional(index.get(&record, "price_lag_30"), "price_lag_30", line)?,
            price_ma_7: parse_optional(index.get(&record, "price_ma_7"), "price_ma_7", line)?,
            price_ma_30: parse_optional(index.get(&record, "price_ma_30"), "price_ma_30", line)?,
            precipitation: parse_optional(
                index.get(&record, "precipitation"),
                "precipitation",
                line,
            )?,
            temp_max: parse_optional(index.get(&record, "temp_max"), "temp_max", line)?,
            temp_min: parse_optional(index.get(&record, "temp_min"), "temp_min", line)?,
            humidity: parse_optional(index.get(&record, "humidity"), "humidity", line)?,
        });
    }
    Ok(rows)
}

pub fn write_forecast(path: &Path, rows: &[ForecastRow]) -> Result<(), ArtifactError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(FORECAST_COLUMNS)?;
    for row in rows {
        writer.write_record([
            row.date.format(DATE_FORMAT).to_string(),
            format_float(row.predicted),
            format_float(row.lower),
            format_float(row.upper),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ArtifactError::Io(err.into_error()))?;
    write_atomic(path, &bytes)
}

pub fn read_forecast(path: &Path) -> Result<Vec<ForecastRow>, ArtifactError> {
    let mut reader = open_reader(path)?;
    let header = reader.headers()?.clone();
    let index = ColumnIndex::new(&header);
    for column in FORECAST_COLUMNS {
        index.require(column, path)?;
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        rows.push(ForecastRow {
            date: parse_date(index.get(&record, "date"), line)?,
            predicted: parse_required(index.get(&record, "predicted"), "predicted", line)?,
            lower: parse_required(index.get(&record, "lower"), "lower", line)?,
            upper: parse_required(index.get(&record, "upper"), "upper", line)?,
        });
    }
    Ok(rows)
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::MissingArtifact {
            path: path.to_path_buf(),
        });
    }
    Ok(csv::Reader::from_reader(fs::File::open(path)?))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            ArtifactError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            ))
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

struct ColumnIndex {
    slots: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(header: &csv::StringRecord) -> Self {
        let slots = header
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
            .collect();
        Self { slots }
    }

    fn require(&self, column: &str, path: &Path) -> Result<(), ArtifactError> {
        if self.slots.contains_key(column) {
            Ok(())
        } else {
            Err(ArtifactError::MissingColumn {
                column: column.to_string(),
                path: path.to_path_buf(),
            })
        }
    }

    fn get<'a>(&self, record: &'a csv::StringRecord, column: &str) -> Option<&'a str> {
        self.slots
            .get(column)
            .and_then(|&idx| record.get(idx))
            .map(str::trim)
    }
}

fn parse_date(raw: Option<&str>, line: u64) -> Result<NaiveDate, ArtifactError> {
    let value = raw.unwrap_or("");
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| ArtifactError::ParseField {
        field: "date".to_string(),
        value: value.to_string(),
        line,
    })
}

fn parse_required(raw: Option<&str>, field: &str, line: u64) -> Result<f64, ArtifactError> {
    let value = raw.unwrap_or("");
    value.parse().map_err(|_| ArtifactError::ParseField {
        field: field.to_string(),
        value: value.to_string(),
        line,
    })
}

fn parse_optional(raw: Option<&str>, field: &str, line: u64) -> Result<Option<f64>, ArtifactError> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ArtifactError::ParseField {
                field: field.to_string(),
                value: value.to_string(),
                line,
            }),
    }
}

fn format_float(value: f64) -> String {
    format!("{value}")
}

fn format_opt(value: Option<f64>) -> String {
    value.map(format_float).unwrap_or_default()
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(path: &Path) -> Result<Self, ArtifactError> {
        let meta = fs::metadata(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::MissingArtifact {
                    path: path.to_path_buf(),
                }
            } else {
                ArtifactError::Io(err)
            }
        })?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

struct CacheSlot<T> {
    fingerprint: Fingerprint,
    rows: Arc<Vec<T>>,
}

/// Read-through cache keyed by artifact path. Entries are invalidated when
/// the file's length or mtime changes, so a rerun of the batch jobs is
/// picked up without restarting the server.
#[derive(Default)]
pub struct ArtifactCache {
    features: RwLock<HashMap<PathBuf, CacheSlot<FeatureRow>>>,
    forecasts: RwLock<HashMap<PathBuf, CacheSlot<ForecastRow>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn features(&self, path: &Path) -> Result<Arc<Vec<FeatureRow>>, ArtifactError> {
        Self::lookup(&self.features, path, read_features)
    }

    pub fn forecast(&self, path: &Path) -> Result<Arc<Vec<ForecastRow>>, ArtifactError> {
        Self::lookup(&self.forecasts, path, read_forecast)
    }

    fn lookup<T>(
        map: &RwLock<HashMap<PathBuf, CacheSlot<T>>>,
        path: &Path,
        load: fn(&Path) -> Result<Vec<T>, ArtifactError>,
    ) -> Result<Arc<Vec<T>>, ArtifactError> {
        let fingerprint = Fingerprint::of(path)?;

        if let Some(slot) = map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
        {
            if slot.fingerprint == fingerprint {
                return Ok(Arc::clone(&slot.rows));
            }
        }

        debug!(
            component = "artifact_cache",
            event = "cache.reload",
            path = %path.display(),
        );
        let rows = Arc::new(load(path)?);
        map.write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                path.to_path_buf(),
                CacheSlot {
                    fingerprint,
                    rows: Arc::clone(&rows),
                },
            );
        Ok(rows)
    }
}
