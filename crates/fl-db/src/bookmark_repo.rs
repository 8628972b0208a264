use crate::util::sqlite_error;
use fl_core::error::StoreError;
use fl_core::types::Bookmark;
use rusqlite::{Connection, OptionalExtension, params};

pub struct BookmarkRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> BookmarkRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, resource_id: &str) -> Result<Option<i64>, StoreError> {
        self.conn
            .query_row(
                "SELECT last_event_time FROM bookmarks WHERE resource_id = ?1",
                params![resource_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_error)
    }

    pub fn set(&self, resource_id: &str, event_time: i64, now: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO bookmarks (resource_id, last_event_time, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(resource_id) DO UPDATE SET \
                 last_event_time = excluded.last_event_time, updated_at = excluded.updated_at",
                params![resource_id, event_time, now],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    pub fn advance(&self, resource_id: &str, event_time: i64, now: i64) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO bookmarks (resource_id, last_event_time, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(resource_id) DO UPDATE SET \
                 last_event_time = excluded.last_event_time, \
                 updated_at = excluded.updated_at \
                 WHERE excluded.last_event_time > bookmarks.last_event_time",
                params![resource_id, event_time, now],
            )
            .map_err(sqlite_error)?;
        self.get(resource_id)?.ok_or_else(|| StoreError::Sqlite {
            message: format!("bookmark for {resource_id} vanished after upsert"),
        })
    }

    pub fn list(&self) -> Result<Vec<Bookmark>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT resource_id, last_event_time, updated_at FROM bookmarks ORDER BY resource_id",
            )
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Bookmark {
                    resource_id: row.get(0)?,
                    last_event_time: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })
            .map_err(sqlite_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_error)
    }
}
