use crate::error::{SourceError, StoreError};
use crate::source::SourceClient;
use crate::store::RecordStore;
use crate::types::{
    Bookmark, CollectionRun, EventRecord, LogPage, LogQuery, RecordFilter, ResourcePage,
    RunStatus, StoreStats, StoredRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use fl_events::testing::ScriptedLiveSource;
use fl_events::{FeedError, LiveSource, LiveSubscription};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Default)]
struct MemoryState {
    keys: HashSet<(String, i64, i64)>,
    records: Vec<StoredRecord>,
    bookmarks: BTreeMap<String, Bookmark>,
    runs: Vec<CollectionRun>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Sqlite {
                message: "disk I/O error".to_string(),
            });
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, records: &[EventRecord]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let now = Utc::now().timestamp_millis();
        let mut state = self.lock();
        let mut inserted = 0;
        for record in records {
            let key = (
                record.resource_id.clone(),
                record.event_key,
                record.event_time,
            );
            if state.keys.insert(key) {
                state.records.push(StoredRecord {
                    record: record.clone(),
                    ingested_at: now,
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_bookmark(&self, resource_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .lock()
            .bookmarks
            .get(resource_id)
            .map(|bookmark| bookmark.last_event_time))
    }

    fn set_bookmark(&self, resource_id: &str, event_time: i64) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().bookmarks.insert(
            resource_id.to_string(),
            Bookmark {
                resource_id: resource_id.to_string(),
                last_event_time: event_time,
                updated_at: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    fn advance_bookmark(&self, resource_id: &str, event_time: i64) -> Result<i64, StoreError> {
        let current = self.get_bookmark(resource_id)?;
        let next = current.map_or(event_time, |current| current.max(event_time));
        self.set_bookmark(resource_id, next)?;
        Ok(next)
    }

    fn list_bookmarks(&self) -> Result<Vec<Bookmark>, StoreError> {
        Ok(self.lock().bookmarks.values().cloned().collect())
    }

    fn start_run(&self) -> Result<i64, StoreError> {
        let mut state = self.lock();
        let id = i64::try_from(state.runs.len()).unwrap_or(i64::MAX) + 1;
        state.runs.push(CollectionRun {
            id,
            started_at: Utc::now().timestamp_millis(),
            finished_at: None,
            resources_count: 0,
            events_collected: 0,
            status: RunStatus::Running,
        });
        Ok(id)
    }

    fn finish_run(
        &self,
        run_id: i64,
        resources: usize,
        events: usize,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let run = state
            .runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or(StoreError::RunNotFound { run_id })?;
        run.finished_at = Some(Utc::now().timestamp_millis());
        run.resources_count = i64::try_from(resources).unwrap_or(i64::MAX);
        run.events_collected = i64::try_from(events).unwrap_or(i64::MAX);
        run.status = status;
        Ok(())
    }

    fn list_runs(&self, limit: u32) -> Result<Vec<CollectionRun>, StoreError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn query(&self, filter: &RecordFilter) -> Result<(Vec<StoredRecord>, u64), StoreError> {
        let state = self.lock();
        let mut matching: Vec<StoredRecord> = state
            .records
            .iter()
            .filter(|stored| {
                let record = &stored.record;
                filter
                    .resource_id
                    .as_deref()
                    .is_none_or(|id| record.resource_id == id)
                    && filter.start_time.is_none_or(|start| record.event_time >= start)
                    && filter.end_time.is_none_or(|end| record.event_time <= end)
                    && filter.code.as_deref().is_none_or(|code| record.code == code)
            })
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.record.event_time.cmp(&left.record.event_time));
        let total = count(matching.len());
        let rows = matching
            .into_iter()
            .skip(usize::try_from(filter.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .collect();
        Ok((rows, total))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.lock();
        let resources: HashSet<&str> = state
            .records
            .iter()
            .map(|stored| stored.record.resource_id.as_str())
            .collect();
        Ok(StoreStats {
            total_records: count(state.records.len()),
            total_resources: count(resources.len()),
            total_runs: count(state.runs.len()),
        })
    }
}

fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

pub struct ScriptedSource {
    resource_pages: Mutex<VecDeque<Result<ResourcePage, SourceError>>>,
    log_pages: Mutex<HashMap<String, VecDeque<Result<LogPage, SourceError>>>>,
    queries: Mutex<Vec<(LogQuery, Instant)>>,
    live: ScriptedLiveSource,
}

impl ScriptedSource {
    pub fn new(live: ScriptedLiveSource) -> Self {
        Self {
            resource_pages: Mutex::new(VecDeque::new()),
            log_pages: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            live,
        }
    }

    pub fn with_resources(self, page: Result<ResourcePage, SourceError>) -> Self {
        lock(&self.resource_pages).push_back(page);
        self
    }

    pub fn with_log_page(self, resource_id: &str, page: Result<LogPage, SourceError>) -> Self {
        lock(&self.log_pages)
            .entry(resource_id.to_string())
            .or_default()
            .push_back(page);
        self
    }

    pub fn queries(&self) -> Vec<(LogQuery, Instant)> {
        lock(&self.queries).clone()
    }

    pub fn queries_for(&self, resource_id: &str) -> Vec<LogQuery> {
        self.queries()
            .into_iter()
            .filter(|(query, _)| query.resource_id == resource_id)
            .map(|(query, _)| query)
            .collect()
    }

    pub fn live(&self) -> &ScriptedLiveSource {
        &self.live
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LiveSource for ScriptedSource {
    async fn subscribe_events(&self) -> Result<Box<dyn LiveSubscription>, FeedError> {
        self.live.subscribe_events().await
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn list_resources(
        &self,
        _page_size: u32,
        _cursor: Option<&str>,
    ) -> Result<ResourcePage, SourceError> {
        lock(&self.resource_pages)
            .pop_front()
            .unwrap_or_else(|| Ok(ResourcePage::default()))
    }

    async fn list_events(&self, query: &LogQuery) -> Result<LogPage, SourceError> {
        lock(&self.queries).push((query.clone(), Instant::now()));
        lock(&self.log_pages)
            .get_mut(&query.resource_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(LogPage::default()))
    }
}
