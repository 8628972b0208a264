use chrono::Utc;
use fl_core::error::StoreError;

pub fn sqlite_error(err: rusqlite::Error) -> StoreError {
    StoreError::Sqlite {
        message: err.to_string(),
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
