use crate::error::SourceError;
use crate::types::{LogPage, LogQuery, ResourcePage};
use async_trait::async_trait;
use fl_events::LiveSource;

#[async_trait]
pub trait SourceClient: LiveSource {
    async fn list_resources(
        &self,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ResourcePage, SourceError>;

    async fn list_events(&self, query: &LogQuery) -> Result<LogPage, SourceError>;
}
