use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use super::version::APP_DIR;

const APP_QUALIFIER: &str = "org";
const APP_ORG: &str = "AgriSync";
const APP_NAME: &str = "AgriSync";
const CONFIG_FILENAME: &str = "config.json";

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/";
pub const DEFAULT_MARKET_BASE_URL: &str = "https://api.data.gov.in/resource/";
pub const DEFAULT_CROP_BASE_URL: &str = "https://api.agrisync.app/v1/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Backend locations and local storage settings for the data layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub weather_base_url: String,
    pub market_base_url: String,
    pub crop_base_url: String,
    /// Sent as `appid` / `api-key` query parameters where the backend wants one.
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Overrides the platform data directory for the response cache.
    pub cache_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            weather_base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
            market_base_url: DEFAULT_MARKET_BASE_URL.to_string(),
            crop_base_url: DEFAULT_CROP_BASE_URL.to_string(),
            api_key: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_dir: None,
        }
    }
}

impl CoreConfig {
    /// Cache directory: the configured override, else `<data_local>/agri-sync/cache`.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("cache")
        })
    }
}

fn config_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

/// Load the config from the platform config dir, falling back to defaults.
pub fn load_config() -> CoreConfig {
    config_file()
        .and_then(|path| load_config_from(&path))
        .unwrap_or_default()
}

pub fn load_config_from(path: &Path) -> Option<CoreConfig> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no config file, using defaults");
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unparseable config");
            None
        }
    }
}

pub fn save_config(config: &CoreConfig) -> Result<(), ConfigError> {
    let path = config_file().ok_or(ConfigError::StorageUnavailable)?;
    save_config_to(&path, config)
}

pub fn save_config_to(path: &Path, config: &CoreConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
