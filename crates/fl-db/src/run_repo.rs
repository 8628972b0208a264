use crate::util::{sqlite_error, to_i64};
use fl_core::error::StoreError;
use fl_core::types::{CollectionRun, RunStatus};
use rusqlite::{Connection, params};

pub struct RunRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RunRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn start(&self, now: i64) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO collection_runs (started_at, status) VALUES (?1, ?2)",
                params![now, RunStatus::Running.as_str()],
            )
            .map_err(sqlite_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish(
        &self,
        run_id: i64,
        resources: usize,
        events: usize,
        status: RunStatus,
        now: i64,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE collection_runs SET finished_at = ?1, resources_count = ?2, \
                 events_collected = ?3, status = ?4 WHERE id = ?5",
                params![now, to_i64(resources), to_i64(events), status.as_str(), run_id],
            )
            .map_err(sqlite_error)?;
        if changed == 0 {
            return Err(StoreError::RunNotFound { run_id });
        }
        Ok(())
    }

    pub fn list(&self, limit: u32) -> Result<Vec<CollectionRun>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, started_at, finished_at, resources_count, events_collected, status \
                 FROM collection_runs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(sqlite_error)?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, started_at, finished_at, resources_count, events_collected, status) =
                row.map_err(sqlite_error)?;
            let status = status
                .parse::<RunStatus>()
                .map_err(|message| StoreError::Decode { message })?;
            runs.push(CollectionRun {
                id,
                started_at,
                finished_at,
                resources_count,
                events_collected,
                status,
            });
        }
        Ok(runs)
    }
}
