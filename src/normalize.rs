//! Raw record normalization.
//!
//! Devices and API versions disagree on where a position report keeps its
//! fields: flattened at the top level, under `detailed.body.parsed`, or as the
//! raw protocol body with `degrees`/`decimal` sub-fields. Each canonical field
//! is read through an ordered fallback chain of [`FieldSource`]s, so a new
//! layout is a configuration change rather than another copy of the parser.
//!
//! ## Example
//! ```rust
//! use fleet_track::normalize::{normalize_record, DEFAULT_NORMALIZER};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "messageIdHex": "0200",
//!     "timestamp": "2024-05-01 08:00:00",
//!     "detailed": { "body": { "latitude": { "decimal": 51527800 }, "longitude": { "decimal": 69400 } } }
//! });
//! let point = normalize_record(&raw, &DEFAULT_NORMALIZER).unwrap();
//! assert!((point.lat - 51.5278).abs() < 1e-9);
//! ```

use chrono::{DateTime, NaiveDateTime};
use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrackError};
use crate::{MovementStatus, TrackPoint};

/// Message id of a location report in the device protocol.
pub const POSITION_REPORT_CODE: &str = "0200";

/// Timestamp layouts accepted from devices, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Shared default configuration for the convenience entry points.
pub static DEFAULT_NORMALIZER: Lazy<NormalizerConfig> = Lazy::new(NormalizerConfig::default);

// ============================================================================
// Configuration
// ============================================================================

/// One candidate location for a numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    /// Dotted path into the record, e.g. `detailed.body.parsed.speed`
    pub path: String,
    /// The extracted value is divided by this (1.0 for already-scaled values)
    pub divisor: f64,
}

impl FieldSource {
    /// A value already in the canonical unit.
    pub fn direct(path: &str) -> Self {
        Self {
            path: path.to_string(),
            divisor: 1.0,
        }
    }

    /// A scaled integer, e.g. micro-degrees with `divisor = 1_000_000`.
    pub fn scaled(path: &str, divisor: f64) -> Self {
        Self {
            path: path.to_string(),
            divisor,
        }
    }

    /// Read this source from a record. `None` when the path is absent, null,
    /// or not numeric, so the chain moves on to the next candidate.
    pub fn extract(&self, record: &Value) -> Option<f64> {
        let value = lookup(record, &self.path)?;
        let number = coerce_number(value)?;
        let scaled = number / self.divisor;
        scaled.is_finite().then_some(scaled)
    }
}

/// Inclusive time range used to drop records outside a requested window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        *at >= self.start && *at <= self.end
    }
}

/// Configuration for record normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Discriminator value of a position report.
    /// Default: "0200"
    pub position_report_code: String,

    /// Fields that may carry the message-type discriminator, first non-empty wins.
    pub message_type_fields: Vec<String>,

    /// Also accept a numeric discriminator equal to the code read as hex
    /// (512 for "0200"). String discriminators always match exactly.
    /// Default: false
    pub accept_numeric_message_id: bool,

    /// Fields that may carry the timestamp, first non-empty wins.
    pub timestamp_fields: Vec<String>,

    /// Fields that may name the reporting device.
    pub device_id_fields: Vec<String>,

    /// Fallback chains for each numeric field. Decimal-degree candidates must
    /// come before scaled-integer ones.
    pub latitude: Vec<FieldSource>,
    pub longitude: Vec<FieldSource>,
    pub speed: Vec<FieldSource>,
    pub mileage: Vec<FieldSource>,

    /// Optional inclusive window; records outside it are skipped.
    pub window: Option<TimeWindow>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            position_report_code: POSITION_REPORT_CODE.to_string(),
            message_type_fields: vec!["messageIdHex".to_string(), "messageId".to_string()],
            accept_numeric_message_id: false,
            timestamp_fields: vec!["gps_time".to_string(), "timestamp".to_string()],
            device_id_fields: vec!["deviceId".to_string(), "device_id".to_string()],
            latitude: coordinate_chain("latitude"),
            longitude: coordinate_chain("longitude"),
            speed: vec![
                FieldSource::direct("speed"),
                FieldSource::direct("detailed.body.parsed.speed"),
                FieldSource::direct("detailed.body.speed.decimal"),
            ],
            mileage: vec![
                FieldSource::direct("mileage"),
                FieldSource::direct("detailed.body.parsed.mileage"),
                // Raw protocol odometer is in 1/10 km
                FieldSource::scaled("detailed.body.mileage.decimal", 10.0),
            ],
            window: None,
        }
    }
}

impl NormalizerConfig {
    /// Default chains restricted to an inclusive time window.
    pub fn with_window(window: TimeWindow) -> Self {
        Self {
            window: Some(window),
            ..Self::default()
        }
    }
}

fn coordinate_chain(field: &str) -> Vec<FieldSource> {
    vec![
        FieldSource::direct(field),
        FieldSource::direct(&format!("detailed.body.parsed.{}", field)),
        FieldSource::direct(&format!("detailed.body.{}.degrees", field)),
        FieldSource::scaled(&format!("detailed.body.{}.decimal", field), 1_000_000.0),
    ]
}

// ============================================================================
// Normalization
// ============================================================================

/// Why a record did not become a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Discriminator present but not a position report
    NotPositionReport(String),
    MissingTimestamp,
    InvalidTimestamp(String),
    OutsideWindow,
}

/// Normalize one raw record into a point.
///
/// The result is pre-ordering: `sequence_id` and `trip_id` are 0 and the
/// coordinates are the raw fix.
pub fn normalize_record(
    record: &Value,
    config: &NormalizerConfig,
) -> std::result::Result<TrackPoint, SkipReason> {
    if let Some(message_type) = first_present(record, &config.message_type_fields) {
        if !is_position_report(message_type, config) {
            let shown = message_type
                .as_str()
                .map_or_else(|| message_type.to_string(), str::to_string);
            return Err(SkipReason::NotPositionReport(shown));
        }
    }

    let timestamp = first_string(record, &config.timestamp_fields)
        .ok_or(SkipReason::MissingTimestamp)?;
    let recorded_at = parse_timestamp(timestamp)
        .ok_or_else(|| SkipReason::InvalidTimestamp(timestamp.to_string()))?;

    if let Some(window) = &config.window {
        if !window.contains(&recorded_at) {
            return Err(SkipReason::OutsideWindow);
        }
    }

    let date = recorded_at.format("%Y-%m-%d").to_string();
    let time = recorded_at.format("%H:%M:%S%.f").to_string();
    let speed_kmh = extract_chain(record, &config.speed).max(0.0);
    let raw_mileage_km = extract_chain(record, &config.mileage);

    Ok(TrackPoint {
        sequence_id: 0,
        timestamp: timestamp.to_string(),
        recorded_at,
        date,
        time,
        lat: extract_chain(record, &config.latitude),
        lng: extract_chain(record, &config.longitude),
        speed_kmh,
        movement_status: MovementStatus::from_speed(speed_kmh),
        mileage_km: round_one_decimal(raw_mileage_km),
        raw_mileage_km,
        trip_id: 0,
        device_id: first_present(record, &config.device_id_fields).and_then(id_string),
    })
}

/// Normalize a batch, dropping unrepresentable records. Arrival order is kept.
pub fn normalize_records(records: &[Value], config: &NormalizerConfig) -> Vec<TrackPoint> {
    let mut points = Vec::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in records {
        match normalize_record(record, config) {
            Ok(point) => points.push(point),
            Err(reason) => {
                skipped += 1;
                debug!("[Normalize] Skipping record: {:?}", reason);
            }
        }
    }

    if skipped > 0 {
        debug!(
            "[Normalize] Kept {} of {} records ({} skipped)",
            points.len(),
            records.len(),
            skipped
        );
    }
    points
}

/// Parse a device timestamp. Accepts `YYYY-MM-DD HH:MM:SS` (space or `T`,
/// optional fraction) and RFC 3339. An RFC 3339 offset is dropped: the
/// result is the wall-clock time the device reported.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Read the first candidate of a chain that yields a number, else 0.
pub fn extract_chain(record: &Value, chain: &[FieldSource]) -> f64 {
    chain
        .iter()
        .find_map(|source| source.extract(record))
        .unwrap_or(0.0)
}

/// Walk a dotted path.
pub(crate) fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |value, key| value.get(key))
        .filter(|value| !value.is_null())
}

/// First field that is present, non-null and not an empty string.
pub(crate) fn first_present<'a>(record: &'a Value, fields: &[String]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| lookup(record, field))
        .find(|value| value.as_str().map_or(true, |s| !s.is_empty()))
}

/// First field holding a non-blank string, trimmed. Fields of other types
/// are skipped.
pub(crate) fn first_string<'a>(record: &'a Value, fields: &[String]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| lookup(record, field))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// JSON numbers and numeric strings; anything else is not a number.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Device identities arrive as strings or numbers.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_position_report(message_type: &Value, config: &NormalizerConfig) -> bool {
    let code = config.position_report_code.as_str();
    match message_type {
        Value::String(s) => s == code,
        Value::Number(n) if config.accept_numeric_message_id => {
            match (n.as_u64(), u64::from_str_radix(code, 16)) {
                (Some(id), Ok(expected)) => id == expected,
                _ => false,
            }
        }
        _ => false,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// Response Envelopes
// ============================================================================

/// Flatten a fetch response into a record list.
///
/// Handles a bare array, `{ "data": [...] }`, and device-grouped payloads
/// `{ "data": [{ "deviceId": ..., "logs": [...] }] }`. Logs taken from a group
/// inherit the group's `deviceId` when they lack one. Unknown shapes yield an
/// empty list.
pub fn flatten_response(json: &Value) -> Vec<Value> {
    let items = match json {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let grouped = items
        .first()
        .map_or(false, |first| first.get("logs").map_or(false, Value::is_array));
    if !grouped {
        return items.clone();
    }

    items
        .iter()
        .flat_map(|group| {
            let device_id = group
                .get("deviceId")
                .or_else(|| group.get("id"))
                .cloned();
            let logs = group
                .get("logs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            logs.into_iter().map(move |mut log| {
                if let (Some(id), Some(obj)) = (&device_id, log.as_object_mut()) {
                    obj.entry("deviceId").or_insert_with(|| id.clone());
                }
                log
            })
        })
        .collect()
}

/// Parse a JSON response body and flatten it into records.
pub fn parse_response(body: &str) -> Result<Vec<Value>> {
    let json: Value = serde_json::from_str(body)?;
    match json {
        Value::Array(_) | Value::Object(_) => Ok(flatten_response(&json)),
        other => Err(TrackError::UnexpectedShape {
            message: format!("expected array or object, got {}", other),
        }),
    }
}
