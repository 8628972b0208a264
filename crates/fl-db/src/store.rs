use crate::bookmark_repo::BookmarkRepo;
use crate::record_repo::RecordRepo;
use crate::run_repo::RunRepo;
use crate::schema;
use crate::util::{now_ms, sqlite_error};
use fl_core::error::StoreError;
use fl_core::store::RecordStore;
use fl_core::types::{
    Bookmark, CollectionRun, EventRecord, RecordFilter, RunStatus, StoreStats, StoredRecord,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct DbStore {
    conn: Mutex<Connection>,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = schema::open_and_migrate(path).map_err(sqlite_error)?;
        tracing::debug!(path = %path.display(), "opened record store");
        Ok(Self::new(conn))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        schema::with_test_db().map(Self::new).map_err(sqlite_error)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(sqlite_error)?;
        let result = f(&conn).and_then(|value| {
            conn.execute_batch("COMMIT").map_err(sqlite_error)?;
            Ok(value)
        });
        if result.is_err() && !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %err, "rollback failed");
            }
        }
        result
    }
}

impl RecordStore for DbStore {
    fn insert(&self, records: &[EventRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let inserted = self.with_tx(|conn| RecordRepo::new(conn).insert_all(records, now_ms()))?;
        tracing::trace!(offered = records.len(), inserted, "stored records");
        Ok(inserted)
    }

    fn get_bookmark(&self, resource_id: &str) -> Result<Option<i64>, StoreError> {
        BookmarkRepo::new(&self.lock()).get(resource_id)
    }

    fn set_bookmark(&self, resource_id: &str, event_time: i64) -> Result<(), StoreError> {
        BookmarkRepo::new(&self.lock()).set(resource_id, event_time, now_ms())
    }

    fn advance_bookmark(&self, resource_id: &str, event_time: i64) -> Result<i64, StoreError> {
        self.with_tx(|conn| BookmarkRepo::new(conn).advance(resource_id, event_time, now_ms()))
    }

    fn list_bookmarks(&self) -> Result<Vec<Bookmark>, StoreError> {
        BookmarkRepo::new(&self.lock()).list()
    }

    fn start_run(&self) -> Result<i64, StoreError> {
        RunRepo::new(&self.lock()).start(now_ms())
    }

    fn finish_run(
        &self,
        run_id: i64,
        resources: usize,
        events: usize,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        RunRepo::new(&self.lock()).finish(run_id, resources, events, status, now_ms())
    }

    fn list_runs(&self, limit: u32) -> Result<Vec<CollectionRun>, StoreError> {
        RunRepo::new(&self.lock()).list(limit)
    }

    fn query(&self, filter: &RecordFilter) -> Result<(Vec<StoredRecord>, u64), StoreError> {
        RecordRepo::new(&self.lock()).query(filter)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        RecordRepo::new(&self.lock()).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_core::collector::{BatchCollector, CollectorConfig};
    use fl_core::error::SourceError;
    use fl_core::testing::ScriptedSource;
    use fl_core::types::{LogPage, Origin, Resource, ResourcePage};
    use fl_core::watcher::{StreamWatcher, WatcherConfig};
    use fl_events::{LiveEvent, RawMessage};
    use fl_events::testing::{Connection as LiveConnection, ScriptedLiveSource, Step, payload};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn record(key: i64, time: i64) -> EventRecord {
        EventRecord {
            resource_id: "dev1".to_string(),
            event_key: key,
            event_time: time,
            origin: Origin::Api,
            code: "switch_1".to_string(),
            value: "true".to_string(),
            status: "1".to_string(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = DbStore::in_memory().unwrap();
        assert_eq!(store.insert(&[]).unwrap(), 0);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn stats_count_records_resources_and_runs() {
        let store = DbStore::in_memory().unwrap();
        store.insert(&[record(1, 10), record(2, 20)]).unwrap();
        let run = store.start_run().unwrap();
        store.finish_run(run, 1, 2, RunStatus::Completed).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.total_resources, 1);
        assert_eq!(stats.total_runs, 1);
    }

    #[test]
    fn batch_and_stream_copies_of_one_event_are_stored_once() {
        let store = DbStore::in_memory().unwrap();
        let event = LiveEvent::decode(&RawMessage::new(
            "m-1",
            payload("dev1", 7_000, "dp_report", r#"{"switch_1":false}"#),
        ))
        .unwrap();
        let live = EventRecord::from_live(&event);
        let batch = EventRecord {
            origin: Origin::Api,
            raw: "{}".to_string(),
            ..live.clone()
        };

        assert_eq!(store.insert(&[batch]).unwrap(), 1);
        assert_eq!(store.insert(&[live]).unwrap(), 0);
        let (rows, total) = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].record.origin, Origin::Api);
    }

    #[test]
    fn reopen_keeps_records_bookmarks_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldlog.db");
        {
            let store = DbStore::open(&path).unwrap();
            store.insert(&[record(1, 10), record(2, 20)]).unwrap();
            store.advance_bookmark("dev1", 20).unwrap();
            let run = store.start_run().unwrap();
            store.finish_run(run, 1, 2, RunStatus::Completed).unwrap();
        }

        let store = DbStore::open(&path).unwrap();
        assert_eq!(store.get_bookmark("dev1").unwrap(), Some(20));
        assert_eq!(store.insert(&[record(2, 20)]).unwrap(), 0);
        let (rows, total) = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].record.event_time, 20);
        assert_eq!(store.list_runs(5).unwrap()[0].status, RunStatus::Completed);
    }

    #[test]
    fn concurrent_writers_store_each_identity_once() {
        let store = Arc::new(DbStore::in_memory().unwrap());
        let inserted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    scope.spawn(move || {
                        let batch: Vec<EventRecord> =
                            (0..50).map(|key| record(key, key * 10)).collect();
                        batch
                            .chunks(5)
                            .map(|chunk| store.insert(chunk).unwrap())
                            .sum::<usize>()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).sum()
        });
        assert_eq!(inserted, 50);
        assert_eq!(store.stats().unwrap().total_records, 50);
    }

    #[test]
    fn failed_commit_leaves_the_connection_usable() {
        let store = DbStore::in_memory().unwrap();
        store
            .lock()
            .execute_batch(
                "CREATE TABLE parents (id INTEGER PRIMARY KEY);
                 CREATE TABLE children (parent_id INTEGER REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED);
                 PRAGMA foreign_keys = ON;",
            )
            .unwrap();
        let err = store
            .with_tx(|conn| {
                conn.execute("INSERT INTO children (parent_id) VALUES (7)", [])
                    .map_err(sqlite_error)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite { .. }));
        assert!(store.lock().is_autocommit());

        assert_eq!(store.insert(&[record(1, 10)]).unwrap(), 1);
        let children: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM children", [], |row| row.get(0))
            .unwrap();
        assert_eq!(children, 0);
    }

    #[test]
    fn failed_work_keeps_its_own_error() {
        let store = DbStore::in_memory().unwrap();
        let err = store
            .with_tx(|conn| {
                RecordRepo::new(conn).insert_all(&[record(1, 10)], 1)?;
                Err::<(), _>(StoreError::RunNotFound { run_id: 3 })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound { run_id: 3 }));
        assert_eq!(store.stats().unwrap().total_records, 0);
    }

    #[test]
    fn readers_run_alongside_writers() {
        let store = Arc::new(DbStore::in_memory().unwrap());
        std::thread::scope(|scope| {
            for writer in 0..2_i64 {
                let store = store.clone();
                scope.spawn(move || {
                    for key in 0..100 {
                        store.insert(&[record(writer * 1000 + key, key)]).unwrap();
                    }
                });
            }
            for _ in 0..2 {
                let store = store.clone();
                scope.spawn(move || {
                    let mut last = 0;
                    for _ in 0..100 {
                        let (rows, total) = store.query(&RecordFilter::default()).unwrap();
                        assert!(rows.len() <= 100);
                        assert!(total >= last);
                        last = total;
                        let stats = store.stats().unwrap();
                        assert!(stats.total_records >= total);
                    }
                });
            }
        });
        assert_eq!(store.stats().unwrap().total_records, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_and_collector_share_dedup_and_bookmarks() {
        let store = Arc::new(DbStore::in_memory().unwrap());

        let data = r#"{"switch_1":true}"#;
        let live = Arc::new(ScriptedLiveSource::new(vec![
            LiveConnection::Open(vec![Step::Message(RawMessage::new(
                "m-1",
                payload("dev1", 5_000, "dp_report", data),
            ))]),
            LiveConnection::Open(vec![Step::Message(RawMessage::new(
                "m-2",
                payload("dev1", 5_000, "dp_report", data),
            ))]),
        ]));
        let watcher = StreamWatcher::new(
            live.clone(),
            store.clone(),
            WatcherConfig {
                reconnect_delay: Duration::from_millis(100),
            },
        );
        let stored = watcher
            .run(Some(Duration::from_secs(2)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(live.acks(), vec!["m-1", "m-2"]);
        assert_eq!(store.get_bookmark("dev1").unwrap(), Some(5_000));

        let entries = vec![
            json!({ "event_id": 1, "event_time": 3_000, "event_from": "1", "status": "1" }),
            json!({ "event_id": 2, "event_time": 4_000, "event_from": "1", "status": "1" }),
        ];
        let page = || -> Result<LogPage, SourceError> {
            Ok(LogPage {
                entries: entries.clone(),
                has_next: false,
                next_cursor: None,
            })
        };
        let resources = || -> Result<ResourcePage, SourceError> {
            Ok(ResourcePage {
                resources: vec![Resource::new("dev1", Some("Light"))],
                next_cursor: None,
            })
        };
        let source = ScriptedSource::new(ScriptedLiveSource::new(Vec::new()))
            .with_resources(resources())
            .with_resources(resources())
            .with_log_page("dev1", page())
            .with_log_page("dev1", page());
        let collector = BatchCollector::new(
            Arc::new(source),
            store.clone(),
            CollectorConfig {
                request_delay: Duration::ZERO,
                ..CollectorConfig::default()
            },
        );

        let first = collector.collect_all().await.unwrap();
        assert_eq!(first.events_collected, 2);
        assert_eq!(store.get_bookmark("dev1").unwrap(), Some(5_000));

        let second = collector.collect_all().await.unwrap();
        assert_eq!(second.events_collected, 0);
        assert_eq!(second.status(), RunStatus::Completed);

        let (rows, total) = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows[0].record.origin, Origin::Stream);
        assert!(rows[1..].iter().all(|row| row.record.origin == Origin::Api));

        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.run_id);
        assert_eq!(runs[1].events_collected, 2);
        assert!(runs.iter().all(|run| run.finished_at.is_some()));
    }
}
