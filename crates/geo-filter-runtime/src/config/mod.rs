//! Configuration loading and resolution.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SNAPSHOT_SECS: u64 = 30;
const DEFAULT_API_BASE: &str = "https://x.com";
const DEFAULT_QUERY_ID: &str = "XRqGa7EeokUU5kppkh13EA";

/// Credentials and endpoint for the authenticated account lookup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub query_id: String,
    pub bearer_token: Option<String>,
    pub csrf_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            query_id: DEFAULT_QUERY_ID.to_string(),
            bearer_token: None,
            csrf_token: None,
        }
    }
}

/// Runtime tunables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Budget for one lookup round trip.
    pub lookup_timeout: Duration,
    /// How often the resolution cache is written to the store.
    pub snapshot_interval: Duration,
    pub api: ApiConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_SECS),
            api: ApiConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `GEO_FILTER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lookup_timeout: Duration::from_millis(
                read_env_u64("GEO_FILTER_LOOKUP_TIMEOUT_MS", DEFAULT_LOOKUP_TIMEOUT_MS).max(1),
            ),
            snapshot_interval: Duration::from_secs(
                read_env_u64("GEO_FILTER_SNAPSHOT_SECS", DEFAULT_SNAPSHOT_SECS).max(1),
            ),
            api: ApiConfig {
                base_url: read_env_string("GEO_FILTER_API_BASE").unwrap_or(defaults.api.base_url),
                query_id: read_env_string("GEO_FILTER_QUERY_ID").unwrap_or(defaults.api.query_id),
                bearer_token: read_env_string("GEO_FILTER_BEARER"),
                csrf_token: read_env_string("GEO_FILTER_CSRF"),
            },
        }
    }
}

/// Resolve the store file path.
pub fn resolve_store_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit {
        return path.to_string();
    }

    if let Some(env_path) = read_env_string("GEO_FILTER_STORE") {
        return env_path;
    }

    let cwd_store = PathBuf::from(".geo-filter/store.geos");
    if cwd_store.exists() {
        return cwd_store.display().to_string();
    }

    resolve_default_store_path()
}

fn resolve_default_store_path() -> String {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    format!("{home}/.geo-filter/store.geos")
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    read_env_string(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
