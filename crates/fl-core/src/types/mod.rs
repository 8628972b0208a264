pub mod record;
pub mod run;
pub mod source;

pub use record::{
    Bookmark, EventRecord, EventSummary, Origin, RecordFilter, StoreStats, StoredRecord,
};
pub use run::{CollectionRun, RunStatus, RunSummary};
pub use source::{LogPage, LogQuery, Resource, ResourcePage};
