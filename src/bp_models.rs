// Station models and data fetching for the Barcelona Bicing bike-share system
// Official website: https://www.bicing.barcelona/
//
// GBFS v1 endpoints (relative to the configured base URL):
// - Station information: {base}/station_information
// - Station status:      {base}/station_status

use crate::bp_config::AppConfig;
use crate::bp_planner::PlannerError;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Europe::Madrid;
use log::{debug, info, warn};
use reqwest::blocking;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

// ============================================================================
// Data Structures
// ============================================================================

/// A merged GBFS station record. Fields the planner does not use are kept in
/// `extra` and written back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(deserialize_with = "deserialize_station_id")]
    pub station_id: String,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub num_bikes_available: u32,
    #[serde(default)]
    pub num_docks_available: u32,
    #[serde(default)]
    pub num_bikes_disabled: u32,
    #[serde(default)]
    pub num_docks_disabled: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_reported: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_station_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Integer(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Integer(id) => id.to_string(),
    })
}

impl Station {
    /// Bikes plus free docks. This can be lower than the physical capacity
    /// when docks are disabled, and it is what target fill levels use.
    pub fn effective_capacity(&self) -> u32 {
        self.num_bikes_available.saturating_add(self.num_docks_available)
    }

    /// Stations without a reported status count as online.
    pub fn is_online(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("IN_SERVICE"))
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.station_id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> std::result::Result<(), PlannerError> {
        let reason = if !self.lat.is_finite() || !self.lon.is_finite() {
            Some("coordinates are not finite numbers")
        } else if self.lat == 0.0 || self.lon == 0.0 {
            Some("coordinates are zero")
        } else if self.lat.abs() > 90.0 || self.lon.abs() > 180.0 {
            Some("coordinates are out of range")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(PlannerError::InvalidStationData {
                station_id: self.station_id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Empty,
    Full,
    Available,
    Offline,
}

impl StationStatus {
    pub fn of(station: &Station) -> Self {
        if !station.is_online() {
            StationStatus::Offline
        } else if station.num_bikes_available == 0 {
            StationStatus::Empty
        } else if station.num_docks_available == 0 {
            StationStatus::Full
        } else {
            StationStatus::Available
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            StationStatus::Empty => "#ff0000",
            StationStatus::Full => "#FFA500",
            StationStatus::Available => "#00FF00",
            StationStatus::Offline => "#000000",
        }
    }

    /// Map marker colour: the route colour when the station is on a route,
    /// otherwise the status colour.
    pub fn marker_color(station: &Station, route_color: Option<&str>) -> String {
        match route_color {
            Some(color) if !color.is_empty() => color.to_string(),
            _ => Self::of(station).color().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StationSummary {
    pub total: usize,
    pub empty: usize,
    pub full: usize,
    pub available: usize,
    pub offline: usize,
    pub bikes_available: u64,
    pub docks_available: u64,
    pub bikes_disabled: u64,
    pub docks_disabled: u64,
}

impl StationSummary {
    pub fn of(stations: &[Station]) -> Self {
        let mut summary = StationSummary {
            total: stations.len(),
            ..Default::default()
        };
        for station in stations {
            match StationStatus::of(station) {
                StationStatus::Empty => summary.empty += 1,
                StationStatus::Full => summary.full += 1,
                StationStatus::Available => summary.available += 1,
                StationStatus::Offline => summary.offline += 1,
            }
            summary.bikes_available += station.num_bikes_available as u64;
            summary.docks_available += station.num_docks_available as u64;
            summary.bikes_disabled += station.num_bikes_disabled as u64;
            summary.docks_disabled += station.num_docks_disabled as u64;
        }
        summary
    }
}

/// Where stations come from for one command run.
#[derive(Debug, Clone, Default)]
pub struct StationSource {
    pub input: Option<PathBuf>,
    pub refresh: bool,
}

// ============================================================================
// Snapshot Cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub stations: Vec<Station>,
    pub fetched_at: DateTime<Utc>,
}

impl StationSnapshot {
    pub fn new(stations: Vec<Station>) -> Self {
        StationSnapshot {
            stations,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_seconds().max(0)
    }

    pub fn is_expired(&self, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        self.age_secs(now) as u64 > max_age_secs
    }

    pub fn cache_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("bicing_planner");
        path.push("stations_snapshot.json");
        path
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BPError::FileError(format!("Failed to create cache directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BPError::FileError(format!("Failed to serialize snapshot: {}", e)))?;

        fs::write(path, json)
            .map_err(|e| BPError::FileError(format!("Failed to write snapshot: {}", e)))?;

        debug!("Station snapshot saved to {:?}", path);
        Ok(())
    }

    /// Reads a cached snapshot. Any problem is logged and treated as a miss.
    pub fn load_from(path: &Path) -> Option<Self> {
        if !path.exists() {
            info!("No station snapshot cached at {:?}", path);
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<StationSnapshot>(&contents) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Failed to parse cached snapshot ({}), will refresh", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read cached snapshot ({}), will refresh", e);
                None
            }
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum BPError {
    NetworkError(String),
    ParseError(String),
    FileError(String),
    Planner(PlannerError),
}

impl std::fmt::Display for BPError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BPError::NetworkError(e) => write!(f, "Network error: {}", e),
            BPError::ParseError(e) => write!(f, "Parse error: {}", e),
            BPError::FileError(e) => write!(f, "File error: {}", e),
            BPError::Planner(e) => write!(f, "Planner error: {}", e),
        }
    }
}

impl std::error::Error for BPError {}

impl From<PlannerError> for BPError {
    fn from(e: PlannerError) -> Self {
        BPError::Planner(e)
    }
}

pub type Result<T> = std::result::Result<T, BPError>;

// ============================================================================
// Main Implementation
// ============================================================================

pub struct BPModels;

impl BPModels {
    const FETCH_ATTEMPTS: u32 = 3;
    const RETRY_BACKOFF_MS: u64 = 500;

    /// Stations from an input file, a fresh cache entry, or the live feed,
    /// in that order of preference.
    pub fn load_snapshot(config: &AppConfig, source: &StationSource) -> Result<StationSnapshot> {
        if let Some(path) = &source.input {
            info!("Reading stations from {:?}", path);
            return Self::read_snapshot_file(path);
        }

        let cache_path = StationSnapshot::cache_path();
        if !source.refresh {
            if let Some(snapshot) = StationSnapshot::load_from(&cache_path) {
                let age = snapshot.age_secs(Utc::now());
                if snapshot.is_expired(config.cache_max_age_secs, Utc::now()) {
                    info!("Cached snapshot is {}s old, refreshing", age);
                } else {
                    info!("Using cached snapshot ({} stations, {}s old)", snapshot.stations.len(), age);
                    return Ok(snapshot);
                }
            }
        }

        let snapshot = StationSnapshot::new(Self::fetch_stations(config)?);
        if let Err(e) = snapshot.save_to(&cache_path) {
            warn!("Could not cache station snapshot: {}", e);
        }
        Ok(snapshot)
    }

    pub fn fetch_stations(config: &AppConfig) -> Result<Vec<Station>> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BPError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let info_url = format!("{}/station_information", config.gbfs_base_url);
        let status_url = format!("{}/station_status", config.gbfs_base_url);

        let information = Self::fetch_feed(&client, &info_url)?;
        info!("Loaded {} station information records", information.len());
        let status = Self::fetch_feed(&client, &status_url)?;
        info!("Loaded {} station status records", status.len());

        let stations = Self::parse_stations(Self::merge_station_feeds(information, status))?;
        info!("Merged {} stations", stations.len());
        Ok(stations)
    }

    fn fetch_feed(client: &blocking::Client, url: &str) -> Result<Vec<Value>> {
        let mut last_error = None;

        for attempt in 1..=Self::FETCH_ATTEMPTS {
            match Self::fetch_json(client, url) {
                Ok(json) => return Self::feed_stations(&json),
                Err(e) => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, Self::FETCH_ATTEMPTS, url, e);
                    last_error = Some(e);
                    if attempt < Self::FETCH_ATTEMPTS {
                        thread::sleep(Duration::from_millis(Self::RETRY_BACKOFF_MS * attempt as u64));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BPError::NetworkError(format!("No request made to {}", url))))
    }

    fn fetch_json(client: &blocking::Client, url: &str) -> Result<Value> {
        let response = client
            .get(url)
            .send()
            .map_err(|e| BPError::NetworkError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(BPError::NetworkError(format!("API returned error: {}", response.status())));
        }

        let body = response
            .text()
            .map_err(|e| BPError::NetworkError(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| BPError::ParseError(format!("Invalid JSON response: {}", e)))
    }

    /// Extracts `data.stations` from a GBFS feed document.
    pub fn feed_stations(json: &Value) -> Result<Vec<Value>> {
        json["data"]["stations"]
            .as_array()
            .cloned()
            .ok_or_else(|| BPError::ParseError("Missing data.stations array in GBFS feed".to_string()))
    }

    /// Overlays each status record on the information record with the same
    /// `station_id`. Information records without a status are kept as they are.
    pub fn merge_station_feeds(information: Vec<Value>, status: Vec<Value>) -> Vec<Value> {
        let mut status_by_id: HashMap<String, Map<String, Value>> = HashMap::new();
        for entry in status {
            if let Value::Object(fields) = entry {
                if let Some(id) = fields.get("station_id").and_then(Self::id_key) {
                    status_by_id.insert(id, fields);
                }
            }
        }

        information
            .into_iter()
            .filter_map(|entry| {
                let Value::Object(mut merged) = entry else {
                    return None;
                };
                let status = merged
                    .get("station_id")
                    .and_then(Self::id_key)
                    .and_then(|id| status_by_id.get(&id));
                if let Some(status) = status {
                    for (key, value) in status {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Some(Value::Object(merged))
            })
            .collect()
    }

    fn id_key(value: &Value) -> Option<String> {
        match value {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Deserializes station records, skipping the ones that do not parse.
    pub fn parse_stations(values: Vec<Value>) -> Result<Vec<Station>> {
        let total = values.len();
        let stations: Vec<Station> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Station>(value) {
                Ok(station) => Some(station),
                Err(e) => {
                    warn!("Skipping malformed station record: {}", e);
                    None
                }
            })
            .collect();

        if total > 0 && stations.is_empty() {
            return Err(BPError::ParseError("No valid stations found".to_string()));
        }
        Ok(stations)
    }

    /// Accepts a cached snapshot, a bare array of merged stations, or a raw
    /// GBFS document.
    pub fn read_snapshot_file(path: &Path) -> Result<StationSnapshot> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BPError::FileError(format!("Failed to read {:?}: {}", path, e)))?;
        let json: Value = serde_json::from_str(&contents)
            .map_err(|e| BPError::ParseError(format!("Invalid JSON in {:?}: {}", path, e)))?;

        if json.get("stations").is_some() && json.get("fetched_at").is_some() {
            return serde_json::from_value::<StationSnapshot>(json)
                .map_err(|e| BPError::ParseError(format!("Invalid snapshot in {:?}: {}", path, e)));
        }

        let values = match json {
            Value::Array(values) => values,
            other => Self::feed_stations(&other)?,
        };

        let fetched_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(StationSnapshot {
            stations: Self::parse_stations(values)?,
            fetched_at,
        })
    }

    /// Splits stations into routable ones and the rejected ones, each
    /// rejection carrying its reason.
    pub fn validate_stations(stations: Vec<Station>) -> (Vec<Station>, Vec<PlannerError>) {
        let mut valid = Vec::with_capacity(stations.len());
        let mut rejected = Vec::new();

        for station in stations {
            match station.validate() {
                Ok(()) => valid.push(station),
                Err(e) => {
                    warn!("{}", e);
                    rejected.push(e);
                }
            }
        }

        (valid, rejected)
    }

    pub fn format_timestamp(timestamp: i64) -> String {
        match Utc.timestamp_opt(timestamp, 0).single() {
            Some(dt) => dt.with_timezone(&Madrid).format("%d/%m/%Y %H:%M:%S").to_string(),
            None => format!("Invalid timestamp: {}", timestamp),
        }
    }
}
