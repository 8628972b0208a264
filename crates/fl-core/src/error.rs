use fl_events::FeedError;
use thiserror::Error;

pub const RATE_LIMIT_CODE: i64 = 40_000_309;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("unauthorized (status {status})")]
    Unauthorized { status: u16 },
}

impl SourceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api { code, .. } if *code == RATE_LIMIT_CODE)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {message}")]
    Sqlite { message: String },
    #[error("encode failed: {message}")]
    Encode { message: String },
    #[error("decode failed: {message}")]
    Decode { message: String },
    #[error("collection run {run_id} not found")]
    RunNotFound { run_id: i64 },
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("resource discovery failed: {0}")]
    Discovery(SourceError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("rate limited, gave up after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("collection cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Feed(#[from] FeedError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config: {message}")]
    Parse { message: String },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}
