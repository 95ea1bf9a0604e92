//! Per-run CSV log of trigger changes.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::Result;
use crate::unit::TriggerEvent;

/// Timestamp format of the first column.
const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Timestamp format used in file names.
pub const FILE_TIME_FORMAT: &str = "%Y-%m-%dT%H_%M_%S";

/// CSV file with one row per trigger change:
/// `timestamp, source, True|False, message json`.
#[derive(Debug)]
pub struct TriggerLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl TriggerLog {
    /// File name for a run started at `start` on `host`.
    #[must_use]
    pub fn file_name(host: &str, start: DateTime<Local>, run: &str) -> String {
        format!("{host}_{}_{run}.csv", start.format(FILE_TIME_FORMAT))
    }

    /// Create the log in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(dir: &Path, host: &str, start: DateTime<Local>, run: &str) -> Result<Self> {
        let path = dir.join(Self::file_name(host, start, run));
        debug!("Writing trigger log {}", path.display());
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        Ok(Self { path, writer })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event and flush it to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn append(&mut self, event: &TriggerEvent) -> Result<()> {
        self.writer.write_record([
            event.timestamp.format(ROW_TIME_FORMAT).to_string(),
            event.source.name().to_string(),
            event.trigger_str().to_string(),
            event.message_json(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}
