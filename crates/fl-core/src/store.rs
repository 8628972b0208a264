use crate::error::StoreError;
use crate::types::{
    Bookmark, CollectionRun, EventRecord, RecordFilter, RunStatus, StoreStats, StoredRecord,
};

/// Records are unique on `(resource_id, event_key, event_time)`; inserting a
/// duplicate is a no-op.
pub trait RecordStore: Send + Sync {
    fn insert(&self, records: &[EventRecord]) -> Result<usize, StoreError>;

    fn get_bookmark(&self, resource_id: &str) -> Result<Option<i64>, StoreError>;
    fn set_bookmark(&self, resource_id: &str, event_time: i64) -> Result<(), StoreError>;
    /// Upsert that never moves an existing bookmark backwards. Returns the
    /// bookmark value after the update.
    fn advance_bookmark(&self, resource_id: &str, event_time: i64) -> Result<i64, StoreError>;
    fn list_bookmarks(&self) -> Result<Vec<Bookmark>, StoreError>;

    fn start_run(&self) -> Result<i64, StoreError>;
    fn finish_run(
        &self,
        run_id: i64,
        resources: usize,
        events: usize,
        status: RunStatus,
    ) -> Result<(), StoreError>;
    fn list_runs(&self, limit: u32) -> Result<Vec<CollectionRun>, StoreError>;

    fn query(&self, filter: &RecordFilter) -> Result<(Vec<StoredRecord>, u64), StoreError>;
    fn stats(&self) -> Result<StoreStats, StoreError>;
}
