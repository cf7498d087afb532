use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::fetcher::{
    FetchConfig, DEFAULT_MAX_CACHE_ITEMS, DEFAULT_MAX_CACHE_TTL, DEFAULT_MAX_FETCH_BYTES,
    DEFAULT_REQUEST_TIMEOUT, MAX_FETCHERS,
};
use crate::poller::PollConfig;

pub const APP_DIR: &str = "twtcache";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub base_url: String,
    pub fetch: FetchSettings,
    pub poll: PollSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_fetchers: usize,
    pub request_timeout_seconds: u64,
    pub max_fetch_bytes: u64,
    pub max_cache_ttl_seconds: u64,
    pub max_cache_items: usize,
    /// 0 lets a cycle run until every source is done.
    pub cycle_deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub update_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            base_url: "http://0.0.0.0:8000".to_owned(),
            fetch: FetchSettings::default(),
            poll: PollSettings::default(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_fetchers: MAX_FETCHERS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            max_cache_ttl_seconds: DEFAULT_MAX_CACHE_TTL.as_secs(),
            max_cache_items: DEFAULT_MAX_CACHE_ITEMS,
            cycle_deadline_seconds: 0,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            update_interval_minutes: 5,
        }
    }
}

impl Config {
    /// `<config dir>/twtcache/config.json`, creating the directory.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join(APP_DIR);
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir.join("config.json"))
    }

    /// Loads the configuration, falling back to (and writing out) defaults.
    pub fn load() -> Self {
        match Self::config_file_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(err) => {
                warn!(error = %err, "no configuration directory, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "unable to load configuration, using defaults");
                let config = Self::default();
                if let Err(err) = config.save_to(path) {
                    warn!(error = %err, path = %path.display(), "unable to save default configuration");
                }
                config
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let fetch = &self.fetch;
        FetchConfig {
            max_fetchers: fetch.max_fetchers,
            request_timeout: Duration::from_secs(fetch.request_timeout_seconds),
            max_fetch_bytes: fetch.max_fetch_bytes,
            max_cache_ttl: Duration::from_secs(fetch.max_cache_ttl_seconds),
            max_cache_items: fetch.max_cache_items,
            cycle_deadline: (fetch.cycle_deadline_seconds > 0)
                .then(|| Duration::from_secs(fetch.cycle_deadline_seconds)),
            base_url: self.base_url.clone(),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll.update_interval_minutes.max(1) * 60),
            data_dir: self.data_dir.clone(),
            base_url: self.base_url.clone(),
        }
    }
}
