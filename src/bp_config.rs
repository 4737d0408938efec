// Runtime configuration for the Bicing planner
//
// Environment variables (an optional `.env` file is loaded first):
// - BICING_GBFS_URL: GBFS v1 base URL (station_information / station_status)
// - BICING_CACHE_MAX_AGE: snapshot cache lifetime in seconds
// - BICING_REQUEST_TIMEOUT: HTTP timeout in seconds
// - BICING_ROUTE_PALETTE: comma-separated route colours, e.g. "#ff0000,#00ff00"

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

pub const DEFAULT_GBFS_URL: &str =
    "https://barcelona-sp.publicbikesystem.net/customer/ube/gbfs/v1/en";
const DEFAULT_CACHE_MAX_AGE: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT: u64 = 15;

pub const DEFAULT_ROUTE_PALETTE: [&str; 10] = [
    "#FF0000", "#0000FF", "#008000", "#FF00FF", "#FFA500",
    "#800080", "#00FFFF", "#800000", "#4B0082", "#20B2AA",
];

lazy_static! {
    static ref HEX_COLOR: Regex = Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex colour pattern");
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub gbfs_base_url: String,
    pub cache_max_age_secs: u64,
    pub request_timeout_secs: u64,
    pub route_palette: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            gbfs_base_url: DEFAULT_GBFS_URL.to_string(),
            cache_max_age_secs: DEFAULT_CACHE_MAX_AGE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
            route_palette: DEFAULT_ROUTE_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {:?}", path),
            Err(e) => debug!("No .env file loaded ({})", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Missing or malformed
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(url) = lookup("BICING_GBFS_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.is_empty() {
                warn!("BICING_GBFS_URL is empty, using {}", DEFAULT_GBFS_URL);
            } else {
                config.gbfs_base_url = url.to_string();
            }
        }

        if let Some(raw) = lookup("BICING_CACHE_MAX_AGE") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.cache_max_age_secs = secs,
                Err(e) => warn!("Ignoring BICING_CACHE_MAX_AGE={:?}: {}", raw, e),
            }
        }

        if let Some(raw) = lookup("BICING_REQUEST_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout_secs = secs,
                Ok(_) => warn!("Ignoring BICING_REQUEST_TIMEOUT=0"),
                Err(e) => warn!("Ignoring BICING_REQUEST_TIMEOUT={:?}: {}", raw, e),
            }
        }

        if let Some(raw) = lookup("BICING_ROUTE_PALETTE") {
            match Self::parse_palette(&raw) {
                Some(palette) => config.route_palette = palette,
                None => warn!("Ignoring BICING_ROUTE_PALETTE={:?}: expected #RRGGBB entries", raw),
            }
        }

        config
    }

    /// Parses a comma-separated list of `#RRGGBB` colours. Returns `None` if
    /// the list is empty or any entry is malformed.
    pub fn parse_palette(raw: &str) -> Option<Vec<String>> {
        let colors: Vec<String> = raw
            .split(',')
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();

        if colors.is_empty() || !colors.iter().all(|c| HEX_COLOR.is_match(c)) {
            return None;
        }
        Some(colors)
    }
}
