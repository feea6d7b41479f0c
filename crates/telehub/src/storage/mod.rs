//! Storage layer for telehub.
//!
//! Telemetry events are persisted through the [`EventStore`] trait, backed
//! either by `MongoDB` ([`MongoStore`]) or by the embedded `SQLite` database
//! defined here ([`Storage`], wrapped by [`SqliteStore`]).

pub mod migrations;
pub mod mongo;
pub mod schema;
mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{format_timestamp, parse_timestamp, status, TelemetryEvent, INSTALL_STEP};

pub use mongo::MongoStore;
pub use store::{open_store, EventStore, SqliteStore};

/// Columns selected for every event query, in `row_to_event` order.
const EVENT_COLUMNS: &str = "id, anonymous_id, session_id, step, status, timestamp, \
     script_version, os_version, os_name, cpu_architecture, memory_gb, metrics";

/// SQL predicate matching a completed install with `metrics.success == true`.
const SUCCESSFUL_INSTALL: &str = "step = 'install' AND status = 'completed' \
     AND json_type(metrics, '$.success') = 'true'";

/// Storage engine for telemetry events.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Event insertion and per-session timelines
/// - Grouped counts for statistics
/// - Windowed queries for anomaly detection
/// - Pruning of old events
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

/// First and last install-step timestamps of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSpan {
    /// The session.
    pub session_id: String,
    /// Earliest install-step event.
    pub first: DateTime<Utc>,
    /// Latest install-step event.
    pub last: DateTime<Utc>,
    /// Whether any install-step event in the session was a successful install.
    pub succeeded: bool,
}

impl InstallSpan {
    /// Install duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        duration_secs(self.first, self.last)
    }
}

/// Time covered by all events of one session, plus its reported OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Earliest event.
    pub first: DateTime<Utc>,
    /// Latest event.
    pub last: DateTime<Utc>,
    /// `"{os_name} {os_version}"` of the first event that reported an OS.
    pub os: Option<String>,
}

/// Seconds between two instants, with sub-second precision.
#[allow(clippy::cast_precision_loss)]
fn duration_secs(first: DateTime<Utc>, last: DateTime<Utc>) -> f64 {
    (last - first).num_milliseconds() as f64 / 1000.0
}

/// The instant `age` before `now`.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] when the result would fall outside the
/// supported date range.
pub fn cutoff_before(now: DateTime<Utc>, age: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(age)
        .ok_or_else(|| Error::ConfigValidation {
            message: format!("a look-back of {} days is out of range", age.num_days()),
        })
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets the CLI read while the server writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an event and return its assigned ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, event: &TelemetryEvent) -> Result<i64> {
        let metrics = serde_json::to_string(&event.metrics)?;

        self.conn.execute(
            r"
            INSERT INTO telemetry_events (
                anonymous_id, session_id, step, status, timestamp, script_version,
                os_version, os_name, cpu_architecture, memory_gb, metrics
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                event.anonymous_id,
                event.session_id,
                event.step,
                event.status,
                format_timestamp(&event.timestamp),
                event.script_version,
                event.os_version,
                event.os_name,
                event.cpu_architecture,
                event.memory_gb,
                metrics,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Inserted event {} for session {} ({} - {})",
            id, event.session_id, event.step, event.status
        );
        Ok(id)
    }

    /// Get an event by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<TelemetryEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM telemetry_events WHERE id = ?1");
        let event = self
            .conn
            .query_row(&sql, [id], Self::row_to_event)
            .optional()?;
        Ok(event)
    }

    /// Get all events of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn events_for_session(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM telemetry_events \
             WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map([session_id], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Count total events in storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM telemetry_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count distinct sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT session_id) FROM telemetry_events",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count sessions with at least one successful install event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_successful_installs(&self) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(DISTINCT session_id) FROM telemetry_events WHERE {SUCCESSFUL_INSTALL}"
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count sessions per reported OS name. Events without an OS are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn installs_by_os(&self) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT os_name, COUNT(DISTINCT session_id) FROM telemetry_events
            WHERE os_name IS NOT NULL
            GROUP BY os_name
            ",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Count events per step and status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn steps_status(&self) -> Result<BTreeMap<String, BTreeMap<String, i64>>> {
        let mut stmt = self.conn.prepare(
            "SELECT step, status, COUNT(*) FROM telemetry_events GROUP BY step, status",
        )?;
        let mut rows = stmt.query([])?;

        let mut result: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let step: String = row.get(0)?;
            let status: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            result.entry(step).or_default().insert(status, count);
        }
        Ok(result)
    }

    /// Get the install-step span of every session that has install events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn install_spans(&self) -> Result<Vec<InstallSpan>> {
        let sql = format!(
            "SELECT session_id, MIN(timestamp), MAX(timestamp), \
                 MAX(CASE WHEN {SUCCESSFUL_INSTALL} THEN 1 ELSE 0 END) \
             FROM telemetry_events WHERE step = ?1 GROUP BY session_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([INSTALL_STEP])?;

        let mut spans = Vec::new();
        while let Some(row) = rows.next()? {
            let session_id: String = row.get(0)?;
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            let succeeded: i64 = row.get(3)?;

            match (parse_timestamp(&first), parse_timestamp(&last)) {
                (Some(first), Some(last)) => spans.push(InstallSpan {
                    session_id,
                    first,
                    last,
                    succeeded: succeeded != 0,
                }),
                _ => warn!("Skipping session {} with unparseable timestamps", session_id),
            }
        }
        Ok(spans)
    }

    /// Get the latest install-step event of the `limit` most recently active sessions.
    ///
    /// Sessions are ordered by that event's timestamp, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_install_sessions(&self, limit: usize) -> Result<Vec<TelemetryEvent>> {
        let sql = format!(
            r"
            SELECT {EVENT_COLUMNS} FROM telemetry_events AS e
            WHERE e.step = ?1 AND e.id = (
                SELECT i.id FROM telemetry_events AS i
                WHERE i.session_id = e.session_id AND i.step = ?1
                ORDER BY i.timestamp DESC, i.id DESC LIMIT 1
            )
            ORDER BY e.timestamp DESC, e.id DESC LIMIT ?2
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map(params![INSTALL_STEP, limit_i64], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Summarize a session: its time span and the OS it reported.
    ///
    /// Returns `None` if the session has no events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let (first, last): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM telemetry_events WHERE session_id = ?1",
            [session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (Some(first), Some(last)) = (
            first.as_deref().and_then(parse_timestamp),
            last.as_deref().and_then(parse_timestamp),
        ) else {
            return Ok(None);
        };

        let os: Option<(String, Option<String>)> = self
            .conn
            .query_row(
                r"
                SELECT os_name, os_version FROM telemetry_events
                WHERE session_id = ?1 AND os_name IS NOT NULL
                ORDER BY timestamp ASC, id ASC LIMIT 1
                ",
                [session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let os = os.map(|(name, version)| {
            format!("{name} {}", version.unwrap_or_default())
                .trim()
                .to_string()
        });

        Ok(Some(SessionSummary { first, last, os }))
    }

    /// Count install-step events since `cutoff`, optionally with a given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_install_events_since(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<i64> {
        let cutoff = format_timestamp(&cutoff);
        let count: i64 = match status {
            Some(status) => self.conn.query_row(
                r"
                SELECT COUNT(*) FROM telemetry_events
                WHERE step = ?1 AND timestamp >= ?2 AND status = ?3
                ",
                params![INSTALL_STEP, cutoff, status],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM telemetry_events WHERE step = ?1 AND timestamp >= ?2",
                params![INSTALL_STEP, cutoff],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    /// Count failure events per step across the sessions whose install step
    /// failed since `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn failure_steps_since(&self, cutoff: DateTime<Utc>) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT step, COUNT(*) FROM telemetry_events
            WHERE status = ?2 AND session_id IN (
                SELECT DISTINCT session_id FROM telemetry_events
                WHERE step = ?1 AND status = ?2 AND timestamp >= ?3
            )
            GROUP BY step
            ",
        )?;
        let counts = stmt
            .query_map(
                params![INSTALL_STEP, status::FAILURE, format_timestamp(&cutoff)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }

    /// Prune events older than the given duration.
    ///
    /// Returns the number of events deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_age` reaches past the earliest representable
    /// time, or the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = format_timestamp(&cutoff_before(Utc::now(), max_age)?);

        let affected = self
            .conn
            .execute("DELETE FROM telemetry_events WHERE timestamp < ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} old telemetry events", affected);
        }
        Ok(affected)
    }

    /// Delete every event.
    ///
    /// Returns the number of events deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM telemetry_events", [])?;
        info!("Deleted {} telemetry events", affected);
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_events = self.count()?;
        let total_sessions = self.session_count()?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM telemetry_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_events,
            total_sessions,
            oldest_event: oldest.as_deref().and_then(parse_timestamp),
            newest_event: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    /// Convert a database row to a `TelemetryEvent`.
    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<TelemetryEvent> {
        let id: i64 = row.get(0)?;
        let timestamp_str: String = row.get(5)?;
        let metrics_str: String = row.get(11)?;

        let timestamp = parse_timestamp(&timestamp_str).unwrap_or_else(|| {
            warn!("Event {} has invalid timestamp {:?}", id, timestamp_str);
            DateTime::<Utc>::UNIX_EPOCH
        });

        let metrics = match serde_json::from_str::<Value>(&metrics_str) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("Event {} has invalid metrics, ignoring them", id);
                Map::new()
            }
        };

        Ok(TelemetryEvent {
            id: Some(id.to_string()),
            anonymous_id: row.get(1)?,
            session_id: row.get(2)?,
            step: row.get(3)?,
            status: row.get(4)?,
            timestamp,
            script_version: row.get(6)?,
            os_version: row.get(7)?,
            os_name: row.get(8)?,
            cpu_architecture: row.get(9)?,
            memory_gb: row.get(10)?,
            metrics,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of events stored.
    pub total_events: i64,
    /// Number of distinct sessions.
    pub total_sessions: i64,
    /// Timestamp of the oldest event.
    pub oldest_event: Option<DateTime<Utc>>,
    /// Timestamp of the newest event.
    pub newest_event: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn event(session: &str, step: &str, status: &str, minutes: i64) -> TelemetryEvent {
        let mut event = TelemetryEvent::new("anon", session, step, status);
        event.timestamp = at(minutes);
        event
    }

    fn successful_install(session: &str, minutes: i64) -> TelemetryEvent {
        let mut event = event(session, "install", "completed", minutes);
        event.metrics.insert("success".to_string(), json!(true));
        event
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_insert_and_get() {
        let storage = create_test_storage();
        let mut original = successful_install("s1", 0);
        original.os_name = Some("Windows".to_string());
        original.memory_gb = Some(16.0);
        original.metrics.insert("duration_seconds".to_string(), json!(120));

        let id = storage.insert(&original).unwrap();
        let retrieved = storage.get(id).unwrap().unwrap();

        assert_eq!(retrieved.id, Some(id.to_string()));
        assert_eq!(retrieved.session_id, "s1");
        assert_eq!(retrieved.timestamp, at(0));
        assert_eq!(retrieved.os_name.as_deref(), Some("Windows"));
        assert_eq!(retrieved.memory_gb, Some(16.0));
        assert_eq!(retrieved.metrics, original.metrics);
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get(99999).unwrap().is_none());
    }

    #[test]
    fn test_events_for_session_sorted() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 5)).unwrap();
        storage.insert(&event("s1", "download", "completed", 1)).unwrap();
        storage.insert(&event("s2", "download", "started", 0)).unwrap();

        let events = storage.events_for_session("s1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step, "download");
        assert_eq!(events[1].step, "install");

        assert!(storage.events_for_session("missing").unwrap().is_empty());
    }

    #[test]
    fn test_counts() {
        let storage = create_test_storage();
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.session_count().unwrap(), 0);

        storage.insert(&event("s1", "download", "started", 0)).unwrap();
        storage.insert(&event("s1", "download", "completed", 1)).unwrap();
        storage.insert(&event("s2", "download", "started", 2)).unwrap();

        assert_eq!(storage.count().unwrap(), 3);
        assert_eq!(storage.session_count().unwrap(), 2);
    }

    #[test]
    fn test_count_successful_installs() {
        let storage = create_test_storage();
        storage.insert(&successful_install("s1", 0)).unwrap();
        storage.insert(&successful_install("s1", 1)).unwrap();
        storage.insert(&event("s2", "install", "completed", 0)).unwrap();

        let mut numeric = event("s3", "install", "completed", 0);
        numeric.metrics.insert("success".to_string(), json!(1));
        storage.insert(&numeric).unwrap();

        storage.insert(&event("s4", "install", "failure", 0)).unwrap();

        assert_eq!(storage.count_successful_installs().unwrap(), 1);
    }

    #[test]
    fn test_installs_by_os() {
        let storage = create_test_storage();
        for (session, os) in [("s1", "Windows"), ("s2", "Windows"), ("s3", "Linux")] {
            let mut e = event(session, "prerequisites", "completed", 0);
            e.os_name = Some(os.to_string());
            storage.insert(&e).unwrap();
            let mut e = event(session, "install", "started", 1);
            e.os_name = Some(os.to_string());
            storage.insert(&e).unwrap();
        }
        storage.insert(&event("s4", "install", "started", 0)).unwrap();

        let by_os = storage.installs_by_os().unwrap();
        assert_eq!(by_os.len(), 2);
        assert_eq!(by_os["Windows"], 2);
        assert_eq!(by_os["Linux"], 1);
    }

    #[test]
    fn test_steps_status() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "download", "started", 0)).unwrap();
        storage.insert(&event("s1", "download", "completed", 1)).unwrap();
        storage.insert(&event("s2", "download", "completed", 1)).unwrap();
        storage.insert(&event("s2", "install", "failure", 2)).unwrap();

        let steps = storage.steps_status().unwrap();
        assert_eq!(steps["download"]["started"], 1);
        assert_eq!(steps["download"]["completed"], 2);
        assert_eq!(steps["install"]["failure"], 1);
    }

    #[test]
    fn test_install_spans() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 0)).unwrap();
        storage.insert(&successful_install("s1", 3)).unwrap();
        storage.insert(&event("s1", "cleanup", "completed", 30)).unwrap();
        storage.insert(&event("s2", "install", "started", 10)).unwrap();
        storage.insert(&event("s3", "download", "started", 10)).unwrap();

        let mut spans = storage.install_spans().unwrap();
        spans.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].session_id, "s1");
        assert!((spans[0].duration_secs() - 180.0).abs() < f64::EPSILON);
        assert!(spans[0].succeeded);
        assert!(spans[1].duration_secs().abs() < f64::EPSILON);
        assert!(!spans[1].succeeded);
    }

    #[test]
    fn test_recent_install_sessions() {
        let storage = create_test_storage();
        storage.insert(&event("old", "install", "started", 0)).unwrap();
        storage.insert(&event("old", "install", "failure", 1)).unwrap();
        storage.insert(&event("new", "install", "started", 5)).unwrap();
        storage.insert(&successful_install("new", 9)).unwrap();
        storage.insert(&event("mid", "install", "started", 3)).unwrap();
        storage.insert(&event("no-install", "download", "started", 20)).unwrap();

        let recent = storage.recent_install_sessions(10).unwrap();
        let sessions: Vec<&str> = recent.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["new", "mid", "old"]);
        assert_eq!(recent[0].status, "completed");
        assert_eq!(recent[2].status, "failure");

        let limited = storage.recent_install_sessions(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert!(storage.recent_install_sessions(0).unwrap().is_empty());
    }

    #[test]
    fn test_session_summary() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "start", "started", 0)).unwrap();
        let mut with_os = event("s1", "prerequisites", "completed", 2);
        with_os.os_name = Some("macOS".to_string());
        with_os.os_version = Some("14.2".to_string());
        storage.insert(&with_os).unwrap();
        storage.insert(&event("s1", "install", "completed", 7)).unwrap();

        let summary = storage.session_summary("s1").unwrap().unwrap();
        assert_eq!(summary.first, at(0));
        assert_eq!(summary.last, at(7));
        assert_eq!(summary.os.as_deref(), Some("macOS 14.2"));

        assert!(storage.session_summary("missing").unwrap().is_none());
    }

    #[test]
    fn test_session_summary_without_os() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 0)).unwrap();

        let summary = storage.session_summary("s1").unwrap().unwrap();
        assert!(summary.os.is_none());
    }

    #[test]
    fn test_windowed_install_queries() {
        let storage = create_test_storage();
        storage.insert(&event("old", "install", "failure", -120)).unwrap();
        storage.insert(&event("s1", "install", "failure", 0)).unwrap();
        storage.insert(&event("s1", "install", "failure", 1)).unwrap();
        storage.insert(&event("s2", "install", "completed", 0)).unwrap();
        storage.insert(&event("s3", "download", "failure", 0)).unwrap();

        let cutoff = at(-60);
        assert_eq!(storage.count_install_events_since(cutoff, None).unwrap(), 3);
        assert_eq!(
            storage
                .count_install_events_since(cutoff, Some("failure"))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_failure_steps_since() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "download", "failure", 0)).unwrap();
        storage.insert(&event("s1", "install", "failure", 1)).unwrap();
        storage.insert(&event("s2", "install", "failure", 1)).unwrap();
        storage.insert(&event("s2", "install", "completed", 2)).unwrap();
        // Never failed its install step
        storage.insert(&event("s3", "download", "failure", 0)).unwrap();
        // Install failure before the window
        storage.insert(&event("old", "verify", "failure", -200)).unwrap();
        storage.insert(&event("old", "install", "failure", -190)).unwrap();

        let counts = storage.failure_steps_since(at(-60)).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["install"], 2);
        assert_eq!(counts["download"], 1);

        assert!(storage.failure_steps_since(at(60)).unwrap().is_empty());
    }

    #[test]
    fn test_failure_steps_since_many_sessions() {
        let storage = create_test_storage();
        for i in 0..40_000 {
            storage
                .insert(&event(&format!("s{i}"), "install", "failure", 0))
                .unwrap();
        }

        let counts = storage.failure_steps_since(at(-1)).unwrap();
        assert_eq!(counts["install"], 40_000);
    }

    #[test]
    fn test_prune_older_than() {
        let storage = create_test_storage();
        let mut recent = event("s1", "install", "started", 0);
        recent.timestamp = Utc::now();
        storage.insert(&recent).unwrap();
        let mut old = event("s2", "install", "started", 0);
        old.timestamp = Utc::now() - Duration::days(40);
        storage.insert(&old).unwrap();

        let pruned = storage.prune_older_than(Duration::days(30)).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(storage.count().unwrap(), 1);
        assert!(storage.events_for_session("s2").unwrap().is_empty());
    }

    #[test]
    fn test_prune_out_of_range_age_is_rejected() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 0)).unwrap();

        let err = storage
            .prune_older_than(Duration::days(i64::from(u32::MAX)))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn test_cutoff_before() {
        assert_eq!(cutoff_before(at(60), Duration::hours(1)).unwrap(), at(0));
        assert!(cutoff_before(at(0), Duration::days(i64::from(u32::MAX))).is_err());
    }

    #[test]
    fn test_clear() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 0)).unwrap();
        storage.insert(&event("s2", "install", "started", 0)).unwrap();

        assert_eq!(storage.clear().unwrap(), 2);
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.total_sessions, 0);
        assert!(stats.oldest_event.is_none());
        assert!(stats.newest_event.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        storage.insert(&event("s1", "install", "started", 0)).unwrap();
        storage.insert(&event("s1", "install", "completed", 9)).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.oldest_event, Some(at(0)));
        assert_eq!(stats.newest_event, Some(at(9)));
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_open_file_based_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("telemetry.db");

        {
            let storage = Storage::open(&db_path).unwrap();
            storage.insert(&event("s1", "install", "started", 0)).unwrap();
            assert_eq!(storage.path(), db_path);
            assert!(storage.stats().unwrap().db_size_bytes > 0);
        }

        let reopened = Storage::open(&db_path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_unicode_metrics() {
        let storage = create_test_storage();
        let mut e = event("s1", "install", "failure", 0);
        e.metrics
            .insert("error".to_string(), json!("安装失败: 权限不足"));

        let id = storage.insert(&e).unwrap();
        let retrieved = storage.get(id).unwrap().unwrap();
        assert_eq!(retrieved.metrics["error"], json!("安装失败: 权限不足"));
    }
}
