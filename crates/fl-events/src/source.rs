use crate::error::FeedError;
use crate::types::RawMessage;
use async_trait::async_trait;

#[async_trait]
pub trait LiveSubscription: Send {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, FeedError>;
    async fn ack(&mut self, message_id: &str) -> Result<(), FeedError>;
}

#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn subscribe_events(&self) -> Result<Box<dyn LiveSubscription>, FeedError>;
}
