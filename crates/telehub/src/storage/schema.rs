//! `SQLite` schema definitions for telehub.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the telemetry events table.
///
/// `timestamp` holds fixed-width RFC 3339 UTC text, so text ordering is
/// chronological. `metrics` holds a JSON object.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS telemetry_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    anonymous_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    step TEXT NOT NULL,
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    script_version TEXT,
    os_version TEXT,
    os_name TEXT,
    cpu_architecture TEXT,
    memory_gb REAL,
    metrics TEXT NOT NULL DEFAULT '{}',
    received_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
";

/// SQL statement to create an index on session and time for timelines.
pub const CREATE_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_session ON telemetry_events(session_id, timestamp)
";

/// SQL statement to create an index on step and status for aggregates.
pub const CREATE_STEP_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_step_status ON telemetry_events(step, status, timestamp)
";

/// SQL statement to create an index on timestamp for pruning.
pub const CREATE_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON telemetry_events(timestamp DESC)
";

/// SQL statement to create an index on `os_name` for the OS breakdown.
pub const CREATE_OS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_os ON telemetry_events(os_name)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_EVENTS_TABLE,
    CREATE_SESSION_INDEX,
    CREATE_STEP_STATUS_INDEX,
    CREATE_TIMESTAMP_INDEX,
    CREATE_OS_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_events_table_contains_required_columns() {
        assert!(CREATE_EVENTS_TABLE.contains("id INTEGER PRIMARY KEY"));
        assert!(CREATE_EVENTS_TABLE.contains("session_id TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("step TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("status TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("timestamp TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("metrics TEXT NOT NULL"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
