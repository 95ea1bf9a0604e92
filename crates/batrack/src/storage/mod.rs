//! Storage layer for batrack.
//!
//! Every trigger change is kept in a local `SQLite` database next to the CSV
//! trigger logs, so that `batrack events` and `batrack status` can answer
//! questions about past nights without parsing log files.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::unit::TriggerEvent;

const SELECT_COLUMNS: &str =
    r#"SELECT id, timestamp, run, source, "trigger", message FROM trigger_events"#;

/// A trigger event as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    /// Row id.
    pub id: i64,
    /// When the trigger changed.
    pub timestamp: DateTime<Utc>,
    /// Run the event belongs to.
    pub run: String,
    /// Name of the raising unit, or `BatRack`.
    pub source: String,
    /// The new trigger value.
    pub trigger: bool,
    /// Measurements explaining the change.
    pub message: Map<String, Value>,
}

/// Event store backed by `SQLite`.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open or create an event store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
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

        // The CLI reads while the daemon writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Event store opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store.
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

    /// Store a trigger event of the given run.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, run: &str, event: &TriggerEvent) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO trigger_events (timestamp, run, source, "trigger", message)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                format_timestamp(event.timestamp.with_timezone(&Utc)),
                run,
                event.source.name(),
                event.trigger,
                event.message_json(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Stored trigger event {}", id);
        Ok(id)
    }

    /// Get the most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        self.query(
            &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?1"),
            params![limit_param(limit)],
        )
    }

    /// Get the most recent events raised by `source`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE source = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"),
            params![source, limit_param(limit)],
        )
    }

    /// Get events at or after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<StoredEvent>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"),
            params![format_timestamp(since), limit_param(limit)],
        )
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let events = stmt
            .query_map(params, Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Count stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trigger_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete events older than `max_age`.
    ///
    /// Returns the number of events deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = format_timestamp(Utc::now() - max_age);
        let affected = self
            .conn
            .execute("DELETE FROM trigger_events WHERE timestamp < ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} old trigger events", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_events = self.count()?;

        let bounds: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM trigger_events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (oldest, newest) = bounds.unwrap_or((None, None));

        let mut by_source = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT source, COUNT(*) FROM trigger_events GROUP BY source")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (source, count) = row?;
            by_source.insert(source, count);
        }

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_events,
            by_source,
            oldest_event: oldest.as_deref().and_then(parse_timestamp),
            newest_event: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<StoredEvent> {
        let timestamp: String = row.get(1)?;
        let message: String = row.get(5)?;

        let message = match serde_json::from_str::<Value>(&message) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("Stored message is not a JSON object: {}", message);
                Map::new()
            }
        };

        Ok(StoredEvent {
            id: row.get(0)?,
            timestamp: parse_timestamp(&timestamp).unwrap_or_default(),
            run: row.get(2)?,
            source: row.get(3)?,
            trigger: row.get(4)?,
            message,
        })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// fixed width keeps text order equal to time order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Statistics about the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of stored events.
    pub total_events: i64,
    /// Events per source.
    pub by_source: BTreeMap<String, i64>,
    /// Timestamp of the oldest event.
    pub oldest_event: Option<DateTime<Utc>>,
    /// Timestamp of the newest event.
    pub newest_event: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
