use crate::util::{sqlite_error, to_u64};
use fl_core::error::StoreError;
use fl_core::types::{EventRecord, Origin, RecordFilter, StoreStats, StoredRecord};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};

pub struct RecordRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RecordRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert_all(
        &self,
        records: &[EventRecord],
        ingested_at: i64,
    ) -> Result<usize, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO event_records \
                 (resource_id, event_key, event_time, origin, code, value, status, raw_json, ingested_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(sqlite_error)?;
        let mut inserted = 0;
        for record in records {
            inserted += stmt
                .execute(params![
                    record.resource_id,
                    record.event_key,
                    record.event_time,
                    record.origin.as_str(),
                    record.code,
                    record.value,
                    record.status,
                    record.raw,
                    ingested_at,
                ])
                .map_err(sqlite_error)?;
        }
        Ok(inserted)
    }

    pub fn query(&self, filter: &RecordFilter) -> Result<(Vec<StoredRecord>, u64), StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(resource_id) = &filter.resource_id {
            values.push(SqlValue::Text(resource_id.clone()));
            clauses.push(format!("resource_id = ?{}", values.len()));
        }
        if let Some(start) = filter.start_time {
            values.push(SqlValue::Integer(start));
            clauses.push(format!("event_time >= ?{}", values.len()));
        }
        if let Some(end) = filter.end_time {
            values.push(SqlValue::Integer(end));
            clauses.push(format!("event_time <= ?{}", values.len()));
        }
        if let Some(code) = &filter.code {
            values.push(SqlValue::Text(code.clone()));
            clauses.push(format!("code = ?{}", values.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM event_records{where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(sqlite_error)?;

        let mut page_values = values;
        page_values.push(SqlValue::Integer(i64::from(filter.limit)));
        let limit_idx = page_values.len();
        page_values.push(SqlValue::Integer(i64::from(filter.offset)));
        let offset_idx = page_values.len();
        let sql = format!(
            "SELECT resource_id, event_key, event_time, origin, code, value, status, raw_json, ingested_at \
             FROM event_records{where_sql} \
             ORDER BY event_time DESC, id DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(sqlite_error)?;
        let rows = stmt
            .query_map(params_from_iter(page_values.iter()), |row| {
                Ok(RecordRow {
                    resource_id: row.get(0)?,
                    event_key: row.get(1)?,
                    event_time: row.get(2)?,
                    origin: row.get(3)?,
                    code: row.get(4)?,
                    value: row.get(5)?,
                    status: row.get(6)?,
                    raw: row.get(7)?,
                    ingested_at: row.get(8)?,
                })
            })
            .map_err(sqlite_error)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(sqlite_error)?.into_stored()?);
        }
        Ok((records, to_u64(total)))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let (total_records, total_resources): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT resource_id) FROM event_records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(sqlite_error)?;
        let total_runs: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM collection_runs", [], |row| row.get(0))
            .map_err(sqlite_error)?;
        Ok(StoreStats {
            total_records: to_u64(total_records),
            total_resources: to_u64(total_resources),
            total_runs: to_u64(total_runs),
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM event_records", [], |row| row.get(0))
            .map_err(sqlite_error)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

struct RecordRow {
    resource_id: String,
    event_key: i64,
    event_time: i64,
    origin: String,
    code: String,
    value: String,
    status: String,
    raw: String,
    ingested_at: i64,
}

impl RecordRow {
    fn into_stored(self) -> Result<StoredRecord, StoreError> {
        let origin = self
            .origin
            .parse::<Origin>()
            .map_err(|message| StoreError::Decode { message })?;
        Ok(StoredRecord {
            record: EventRecord {
                resource_id: self.resource_id,
                event_key: self.event_key,
                event_time: self.event_time,
                origin,
                code: self.code,
                value: self.value,
                status: self.status,
                raw: self.raw,
            },
            ingested_at: self.ingested_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;

    fn record(resource_id: &str, key: i64, time: i64, code: &str) -> EventRecord {
        EventRecord {
            resource_id: resource_id.to_string(),
            event_key: key,
            event_time: time,
            origin: Origin::Api,
            code: code.to_string(),
            value: "1".to_string(),
            status: "1".to_string(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn duplicate_rows_are_ignored() {
        let conn = with_test_db().unwrap();
        let repo = RecordRepo::new(&conn);
        let batch = vec![record("dev1", 1, 100, "a"), record("dev1", 2, 200, "a")];
        assert_eq!(repo.insert_all(&batch, 5).unwrap(), 2);
        assert_eq!(repo.insert_all(&batch, 6).unwrap(), 0);

        let mixed = vec![record("dev1", 2, 200, "a"), record("dev1", 3, 300, "a")];
        assert_eq!(repo.insert_all(&mixed, 7).unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn same_key_at_different_times_is_distinct() {
        let conn = with_test_db().unwrap();
        let repo = RecordRepo::new(&conn);
        let batch = vec![record("dev1", 1, 100, "a"), record("dev1", 1, 101, "a")];
        assert_eq!(repo.insert_all(&batch, 5).unwrap(), 2);
    }

    #[test]
    fn query_filters_and_reports_total() {
        let conn = with_test_db().unwrap();
        let repo = RecordRepo::new(&conn);
        let batch = vec![
            record("dev1", 1, 100, "a"),
            record("dev1", 2, 200, "b"),
            record("dev1", 3, 300, "a"),
            record("dev2", 4, 400, "a"),
        ];
        repo.insert_all(&batch, 9).unwrap();

        let filter = RecordFilter {
            resource_id: Some("dev1".to_string()),
            code: Some("a".to_string()),
            limit: 1,
            ..RecordFilter::default()
        };
        let (rows, total) = repo.query(&filter).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.event_time, 300);
        assert_eq!(rows[0].ingested_at, 9);

        let window = RecordFilter {
            start_time: Some(200),
            end_time: Some(300),
            ..RecordFilter::default()
        };
        let (rows, total) = repo.query(&window).unwrap();
        assert_eq!(total, 2);
        let times: Vec<i64> = rows.iter().map(|row| row.record.event_time).collect();
        assert_eq!(times, vec![300, 200]);
    }
}
