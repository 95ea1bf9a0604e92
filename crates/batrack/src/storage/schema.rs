//! `SQLite` schema definitions for the event store.

/// SQL statement to create the trigger events table.
pub const CREATE_TRIGGER_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trigger_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    run TEXT NOT NULL,
    source TEXT NOT NULL,
    "trigger" INTEGER NOT NULL,
    message TEXT NOT NULL
)
"#;

/// SQL statement to create an index on timestamp for efficient queries.
pub const CREATE_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trigger_events_timestamp ON trigger_events(timestamp DESC)
";

/// SQL statement to create an index on source for filtering.
pub const CREATE_SOURCE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trigger_events_source ON trigger_events(source)
";

/// SQL statement to create an index on run for per-run queries.
pub const CREATE_RUN_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trigger_events_run ON trigger_events(run)
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
    CREATE_TRIGGER_EVENTS_TABLE,
    CREATE_TIMESTAMP_INDEX,
    CREATE_SOURCE_INDEX,
    CREATE_RUN_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert_eq!(SCHEMA_STATEMENTS.len(), 5);
        for stmt in SCHEMA_STATEMENTS {
            assert!(stmt.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn test_trigger_events_columns() {
        for column in [
            "id INTEGER PRIMARY KEY",
            "timestamp TEXT NOT NULL",
            "run TEXT NOT NULL",
            "source TEXT NOT NULL",
            r#""trigger" INTEGER NOT NULL"#,
            "message TEXT NOT NULL",
        ] {
            assert!(CREATE_TRIGGER_EVENTS_TABLE.contains(column), "missing {column}");
        }
    }
}
