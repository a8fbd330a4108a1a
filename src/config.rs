// Configuration loading and parsing (rosterwatch.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Top-level application configuration. Every field has a default, so a
/// missing config file yields a usable config without raising.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Pacing and sizing knobs for the background fetch engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Seconds to sleep between consecutive remote calls.
    #[serde(default = "default_single_request_interval")]
    pub single_request_interval: f64,
    /// Seconds to sleep between pages of a paginated fetch.
    #[serde(default = "default_group_request_interval")]
    pub group_request_interval: f64,
    /// Maximum pages fetched per paginated games listing.
    #[serde(default = "default_game_list_count")]
    pub game_list_count: usize,
    /// Hour-bucket width of the weekly activity heatmap. Must divide 24.
    #[serde(default = "default_heatmap_hour_span")]
    pub heatmap_hour_span: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the statistics service, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Path of the tracked-player JSON file. Empty means "use the platform
    /// data directory".
    #[serde(default)]
    pub players_path: String,
}

fn default_single_request_interval() -> f64 {
    1.0
}
fn default_group_request_interval() -> f64 {
    5.0
}
fn default_game_list_count() -> usize {
    10
}
fn default_heatmap_hour_span() -> u32 {
    3
}
fn default_base_url() -> String {
    "https://stats.example.net".to_string()
}
fn default_request_timeout_secs() -> f64 {
    2.0
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            single_request_interval: default_single_request_interval(),
            group_request_interval: default_group_request_interval(),
            game_list_count: default_game_list_count(),
            heatmap_hour_span: default_heatmap_hour_span(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    pub fn single_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tracker.single_request_interval)
    }

    pub fn group_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tracker.group_request_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.api.request_timeout_secs)
    }

    /// Resolve the tracked-player file path: the configured path when set,
    /// otherwise `players.json` under the platform data directory, falling
    /// back to the working directory when no home is known.
    pub fn players_path(&self) -> PathBuf {
        if !self.storage.players_path.is_empty() {
            return PathBuf::from(&self.storage.players_path);
        }
        match ProjectDirs::from("", "", "rosterwatch") {
            Some(dirs) => dirs.data_dir().join("players.json"),
            None => PathBuf::from("players.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from the given file. A missing file yields the
/// defaults; a present-but-invalid file is a hard error so a typo cannot
/// silently reset every knob.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => {
            let config = Config::default();
            validate(&config)?;
            return Ok(config);
        }
    };

    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: loads `rosterwatch.toml` from the platform config
/// directory, falling back to the working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = match ProjectDirs::from("", "", "rosterwatch") {
        Some(dirs) => dirs.config_dir().join("rosterwatch.toml"),
        None => PathBuf::from("rosterwatch.toml"),
    };
    load_config_from(&path)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let tracker = &config.tracker;

    for (name, val) in [
        (
            "tracker.single_request_interval",
            tracker.single_request_interval,
        ),
        (
            "tracker.group_request_interval",
            tracker.group_request_interval,
        ),
        ("api.request_timeout_secs", config.api.request_timeout_secs),
    ] {
        if !val.is_finite() || val < 0.0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be a non-negative number of seconds, got {val}"),
            });
        }
    }

    if tracker.game_list_count == 0 {
        return Err(ConfigError::ValidationError {
            field: "tracker.game_list_count".into(),
            message: "must be at least 1".into(),
        });
    }

    let span = tracker.heatmap_hour_span;
    if !(1..=24).contains(&span) || 24 % span != 0 {
        return Err(ConfigError::ValidationError {
            field: "tracker.heatmap_hour_span".into(),
            message: format!("must be in 1..=24 and divide 24 evenly, got {span}"),
        });
    }

    if config.api.base_url.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
