use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{Incident, IncidentFilter, IncidentStatus, UpsertReport};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, Row, ToSql};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = "BEGIN;
    CREATE TABLE IF NOT EXISTS incidents (
        incident_id   TEXT PRIMARY KEY,
        status        TEXT NOT NULL,
        county_no     INTEGER,
        county        TEXT,
        road_number   TEXT,
        start_time    TEXT,
        end_time      TEXT,
        modified_time TEXT,
        latitude      REAL,
        longitude     REAL,
        description   TEXT NOT NULL,
        message_type  TEXT,
        location      TEXT,
        last_seen_at  TEXT NOT NULL,
        fetched_at    TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS ix_incidents_status ON incidents(status);
    CREATE INDEX IF NOT EXISTS ix_incidents_county ON incidents(county);
    CREATE INDEX IF NOT EXISTS ix_incidents_start  ON incidents(start_time);
    COMMIT;";

const UPSERT_SQL: &str = "INSERT INTO incidents (
        incident_id, status, county_no, county, road_number,
        start_time, end_time, modified_time, latitude, longitude,
        description, message_type, location, last_seen_at, fetched_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
    ON CONFLICT(incident_id) DO UPDATE SET
        status        = excluded.status,
        county_no     = excluded.county_no,
        county        = excluded.county,
        road_number   = excluded.road_number,
        start_time    = excluded.start_time,
        end_time      = excluded.end_time,
        modified_time = excluded.modified_time,
        latitude      = excluded.latitude,
        longitude     = excluded.longitude,
        description   = excluded.description,
        message_type  = excluded.message_type,
        location      = excluded.location,
        last_seen_at  = excluded.last_seen_at";

const SELECT_COLUMNS: &str = "incident_id, status, county_no, county, road_number, \
     start_time, end_time, modified_time, latitude, longitude, \
     description, message_type, location, last_seen_at, fetched_at";

/// SQLite-backed store for canonical incidents.
///
/// A single connection behind a mutex keeps writers serialized within the
/// process; the busy timeout plus [`StorageError::Busy`] handle a second
/// process holding the database.
pub struct IncidentStore {
    conn: Arc<Mutex<Connection>>,
}

impl IncidentStore {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        if let Some(dir) = config.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(&config.db_path).map_err(map_db_err)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates the incident table and indexes if absent. Safe to call on
    /// every startup.
    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA).map_err(map_db_err)?;
        Ok(())
    }

    /// Applies one cycle's batch in a single transaction.
    ///
    /// Existing rows keep their `fetched_at`; every written row gets
    /// `last_seen_at = observed_at`. Any failure rolls the whole batch back,
    /// so readers never observe a partially applied cycle.
    pub fn upsert_many(
        &self,
        incidents: &[Incident],
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(map_db_err)?;
        let mut report = UpsertReport::default();
        {
            let mut exists_stmt = tx.prepare("SELECT 1 FROM incidents WHERE incident_id = ?1")?;
            let mut upsert_stmt = tx.prepare(UPSERT_SQL)?;
            for incident in incidents {
                if incident.incident_id.trim().is_empty() {
                    return Err(StorageError::InvalidRecord(
                        "incident_id must not be empty".to_string(),
                    ));
                }
                let exists = exists_stmt.exists(params![incident.incident_id])?;
                upsert_stmt
                    .execute(params![
                        incident.incident_id,
                        incident.status.as_str(),
                        incident.county_no,
                        incident.county,
                        incident.road_number,
                        incident.start_time,
                        incident.end_time,
                        incident.modified_time,
                        incident.latitude,
                        incident.longitude,
                        incident.description,
                        incident.message_type,
                        incident.location,
                        observed_at,
                        observed_at,
                    ])
                    .map_err(map_db_err)?;
                if exists {
                    report.updated += 1;
                } else {
                    report.inserted += 1;
                }
            }
        }
        tx.commit().map_err(map_db_err)?;
        log::debug!(
            "upserted batch: {} inserted, {} updated",
            report.inserted,
            report.updated
        );
        Ok(report)
    }

    /// Reads incidents matching `filter`, ordered by `start_time` descending
    /// with `incident_id` ascending as tie-break. Rows without a start time
    /// sort last.
    pub fn read(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM incidents");
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            values.push(Box::new(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(county) = &filter.county {
            values.push(Box::new(county.clone()));
            clauses.push(format!("county = ?{}", values.len()));
        }
        if let Some(road) = &filter.road_number {
            values.push(Box::new(road.clone()));
            clauses.push(format!("road_number = ?{}", values.len()));
        }
        if let Some(after) = filter.start_after {
            values.push(Box::new(after));
            clauses.push(format!("start_time >= ?{}", values.len()));
        }
        if let Some(before) = filter.start_before {
            values.push(Box::new(before));
            clauses.push(format!("start_time < ?{}", values.len()));
        }
        if let Some(search) = &filter.search {
            values.push(Box::new(format!("%{search}%")));
            clauses.push(format!("description LIKE ?{}", values.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY start_time DESC, incident_id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut rows = stmt.query(&param_refs[..])?;
        let mut incidents = Vec::new();
        while let Some(row) = rows.next()? {
            incidents.push(row_to_incident(row)?);
        }
        Ok(incidents)
    }

    /// Looks up a single incident by its identifier.
    pub fn get(&self, incident_id: &str) -> Result<Option<Incident>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM incidents WHERE incident_id = ?1"
        ))?;
        let mut rows = stmt.query(params![incident_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_incident(row)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_incident(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let status_text: String = row.get(1)?;
    let status: IncidentStatus = status_text.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    })?;
    Ok(Incident {
        incident_id: row.get(0)?,
        status,
        county_no: row.get(2)?,
        county: row.get(3)?,
        road_number: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        modified_time: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        description: row.get(10)?,
        message_type: row.get(11)?,
        location: row.get(12)?,
        last_seen_at: row.get(13)?,
        fetched_at: row.get(14)?,
    })
}

fn map_db_err(err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
        if matches!(
            ffi_err.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ) {
            return StorageError::Busy(err.to_string());
        }
    }
    StorageError::Sqlite(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn setup() -> (IncidentStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let store = IncidentStore::open(&config).unwrap();
        store.ensure_schema().unwrap();
        (store, dir)
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn sample(id: &str) -> Incident {
        Incident {
            incident_id: id.to_string(),
            status: IncidentStatus::Ongoing,
            county_no: Some(14),
            county: Some("Västra Götalands län".to_string()),
            road_number: Some("E6".to_string()),
            start_time: Some(ts(8)),
            end_time: Some(ts(18)),
            modified_time: Some(ts(9)),
            latitude: Some(57.7),
            longitude: Some(11.97),
            description: "Roadworks between junctions".to_string(),
            message_type: Some("Vägarbete".to_string()),
            location: Some("E6 northbound".to_string()),
            last_seen_at: ts(10),
            fetched_at: ts(10),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let (store, _dir) = setup();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let (store, _dir) = setup();
        let first = store.upsert_many(&[sample("a"), sample("b")], ts(10)).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.updated, 0);

        let mut changed = sample("a");
        changed.description = "Lane closed".to_string();
        changed.status = IncidentStatus::Ended;
        let second = store.upsert_many(&[changed], ts(11)).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);

        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored.description, "Lane closed");
        assert_eq!(stored.status, IncidentStatus::Ended);
        // First-ingestion time survives the update; last_seen_at advances.
        assert_eq!(stored.fetched_at, ts(10));
        assert_eq!(stored.last_seen_at, ts(11));
    }

    #[test]
    fn rerun_with_identical_batch_only_advances_last_seen() {
        let (store, _dir) = setup();
        let batch = vec![sample("a"), sample("b"), sample("c")];
        store.upsert_many(&batch, ts(10)).unwrap();
        let before: Vec<Incident> = store.read(&IncidentFilter::default()).unwrap();

        let report = store.upsert_many(&batch, ts(12)).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 3);

        let after = store.read(&IncidentFilter::default()).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.incident_id, a.incident_id);
            assert_eq!(b.description, a.description);
            assert_eq!(b.fetched_at, a.fetched_at);
            assert_eq!(a.last_seen_at, ts(12));
        }
    }

    #[test]
    fn incident_ids_stay_unique() {
        let (store, _dir) = setup();
        store.upsert_many(&[sample("a")], ts(10)).unwrap();
        store.upsert_many(&[sample("a")], ts(11)).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn failed_batch_rolls_back_entirely() {
        let (store, _dir) = setup();
        let mut existing = sample("a");
        existing.description = "Original".to_string();
        store.upsert_many(&[existing], ts(9)).unwrap();

        let mut batch: Vec<Incident> = (0..10)
            .map(|i| sample(&format!("batch-{i}")))
            .collect();
        batch[0] = {
            let mut overwrite = sample("a");
            overwrite.description = "Should never land".to_string();
            overwrite
        };
        batch[4].incident_id = String::new();

        let err = store.upsert_many(&batch, ts(10)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));

        // Pre-batch state is fully preserved.
        assert_eq!(store.count().unwrap(), 1);
        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored.description, "Original");
        assert_eq!(stored.last_seen_at, ts(9));
    }

    #[test]
    fn read_orders_by_start_desc_then_id() {
        let (store, _dir) = setup();
        let mut early = sample("late-alpha");
        early.start_time = Some(ts(6));
        let mut also_early = sample("late-beta");
        also_early.start_time = Some(ts(6));
        let mut recent = sample("recent");
        recent.start_time = Some(ts(12));
        let mut unscheduled = sample("unscheduled");
        unscheduled.start_time = None;
        store
            .upsert_many(&[also_early, unscheduled, recent, early], ts(13))
            .unwrap();

        let ids: Vec<String> = store
            .read(&IncidentFilter::default())
            .unwrap()
            .into_iter()
            .map(|i| i.incident_id)
            .collect();
        assert_eq!(ids, vec!["recent", "late-alpha", "late-beta", "unscheduled"]);
    }

    #[test]
    fn read_applies_filters() {
        let (store, _dir) = setup();
        let mut stockholm = sample("sthlm");
        stockholm.county = Some("Stockholms län".to_string());
        stockholm.status = IncidentStatus::Upcoming;
        stockholm.road_number = Some("E4".to_string());
        stockholm.description = "Bridge inspection".to_string();
        store
            .upsert_many(&[sample("gbg"), stockholm], ts(10))
            .unwrap();

        let by_status = store
            .read(&IncidentFilter {
                status: Some(IncidentStatus::Upcoming),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].incident_id, "sthlm");

        let by_county = store
            .read(&IncidentFilter {
                county: Some("Stockholms län".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_county.len(), 1);

        let by_road = store
            .read(&IncidentFilter {
                road_number: Some("E6".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_road.len(), 1);
        assert_eq!(by_road[0].incident_id, "gbg");

        let by_text = store
            .read(&IncidentFilter {
                search: Some("inspection".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].incident_id, "sthlm");

        let windowed = store
            .read(&IncidentFilter {
                start_after: Some(ts(7)),
                start_before: Some(ts(9)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(windowed.len(), 2);

        let limited = store
            .read(&IncidentFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn unreported_incident_keeps_its_last_seen() {
        let (store, _dir) = setup();
        store.upsert_many(&[sample("a"), sample("b")], ts(10)).unwrap();
        store.upsert_many(&[sample("a")], ts(12)).unwrap();

        let a = store.get("a").unwrap().unwrap();
        let b = store.get("b").unwrap().unwrap();
        assert_eq!(a.last_seen_at, ts(12));
        assert_eq!(b.last_seen_at, ts(10));
        assert_eq!(store.count().unwrap(), 2);
    }
}
