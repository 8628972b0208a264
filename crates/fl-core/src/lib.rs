pub mod collector;
pub mod config;
pub mod error;
pub mod event_key;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod watcher;

pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::collector::{BatchCollector, CollectorConfig};
pub use crate::config::Settings;
pub use crate::error::{CollectError, ConfigError, SourceError, StoreError, WatchError};
pub use crate::source::SourceClient;
pub use crate::store::RecordStore;
pub use crate::watcher::{StreamWatcher, WatcherConfig};
