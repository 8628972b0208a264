use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("unauthorized (status {status})")]
    Unauthorized { status: u16 },
    #[error("decode failed: {message}")]
    Decode { message: String },
}

impl FeedError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
