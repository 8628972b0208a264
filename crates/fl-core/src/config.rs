use crate::collector::CollectorConfig;
use crate::error::ConfigError;
use crate::watcher::WatcherConfig;
use fl_events::BroadcasterConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const DB_PATH_ENV: &str = "FIELDLOG_DB_PATH";
const POLL_INTERVAL_ENV: &str = "FIELDLOG_POLL_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: String,
    pub collector: CollectorSettings,
    pub watcher: WatcherSettings,
    pub broadcaster: BroadcasterSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "fieldlog.db".to_string(),
            collector: CollectorSettings::default(),
            watcher: WatcherSettings::default(),
            broadcaster: BroadcasterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub poll_interval_secs: u64,
    pub request_delay_ms: u64,
    pub page_size: u32,
    pub discovery_page_size: u32,
    pub lookback_days: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_pages_per_resource: u32,
    pub bookmark_overlap_ms: u64,
    pub event_types: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 6 * 60 * 60,
            request_delay_ms: 2500,
            page_size: 50,
            discovery_page_size: 20,
            lookback_days: 7,
            max_retries: 3,
            retry_base_delay_ms: 10_000,
            max_pages_per_resource: 100,
            bookmark_overlap_ms: 1000,
            event_types: "1,2,3,4,5,6,7,8,9,10".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub reconnect_delay_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterSettings {
    pub channel_depth: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self {
            channel_depth: 256,
            reconnect_delay_ms: 5000,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };
        Self::from_toml_str(&content)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|value| !value.is_empty()) {
            self.db_path = path;
        }
        if let Some(value) = lookup(POLL_INTERVAL_ENV) {
            self.collector.poll_interval_secs =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: POLL_INTERVAL_ENV.to_string(),
                    value,
                })?;
        }
        Ok(())
    }

    pub fn collector(&self) -> CollectorConfig {
        let collector = &self.collector;
        CollectorConfig {
            poll_interval: Duration::from_secs(collector.poll_interval_secs),
            request_delay: Duration::from_millis(collector.request_delay_ms),
            page_size: collector.page_size,
            discovery_page_size: collector.discovery_page_size,
            lookback: Duration::from_secs(collector.lookback_days * 24 * 60 * 60),
            max_retries: collector.max_retries,
            retry_base_delay: Duration::from_millis(collector.retry_base_delay_ms),
            max_pages_per_resource: collector.max_pages_per_resource,
            bookmark_overlap: Duration::from_millis(collector.bookmark_overlap_ms),
            event_types: collector.event_types.clone(),
        }
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            reconnect_delay: Duration::from_millis(self.watcher.reconnect_delay_ms),
        }
    }

    pub fn broadcaster(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            channel_depth: self.broadcaster.channel_depth,
            reconnect_delay: Duration::from_millis(self.broadcaster.reconnect_delay_ms),
        }
    }
}
