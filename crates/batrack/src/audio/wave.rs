//! Wave file export with size-based rotation.
//!
//! Blocks are handed from the analysis task to a blocking writer thread
//! through a bounded channel, so slow SD cards never stall the detector.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Blocks buffered between the analysis task and the writer thread.
const WRITE_QUEUE_BLOCKS: usize = 256;

struct OpenFile {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    frames: u64,
}

/// Synchronous rotating wave writer.
///
/// A new file is started whenever the next block would push the current
/// file past `max_frames`.
pub struct WaveFiles {
    dir: PathBuf,
    prefix: String,
    spec: WavSpec,
    max_frames: u64,
    current: Option<OpenFile>,
    written: Vec<PathBuf>,
}

impl std::fmt::Debug for WaveFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveFiles")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("max_frames", &self.max_frames)
            .field("current", &self.current.as_ref().map(|c| &c.path))
            .field("written", &self.written)
            .finish()
    }
}

impl WaveFiles {
    /// Prepare a writer for 16 bit mono files in `dir`.
    ///
    /// Files are named `<prefix>_<%Y-%m-%dT%H_%M_%S>.wav`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: &Path, prefix: &str, sampling_rate: u32, max_duration_s: f64) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_frames = (f64::from(sampling_rate) * max_duration_s) as u64;

        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            spec: WavSpec {
                channels: 1,
                sample_rate: sampling_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            max_frames: max_frames.max(1),
            current: None,
            written: Vec::new(),
        })
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%dT%H_%M_%S");
        let base = format!("{}_{}", self.prefix, stamp);
        let mut path = self.dir.join(format!("{base}.wav"));
        let mut n = 1;
        // rotation can happen more than once per second
        while path.exists() {
            path = self.dir.join(format!("{base}_{n}.wav"));
            n += 1;
        }
        path
    }

    fn open(&mut self) -> Result<()> {
        let path = self.next_path();
        info!("Creating wave file {}", path.display());
        let writer = WavWriter::create(&path, self.spec)?;
        self.current = Some(OpenFile {
            path,
            writer,
            frames: 0,
        });
        Ok(())
    }

    /// Append a block, rotating first if the file would grow too long.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be created or written.
    pub fn write_block(&mut self, block: &[i16]) -> Result<()> {
        let needs_rotation = self
            .current
            .as_ref()
            .is_some_and(|c| c.frames > 0 && c.frames + block.len() as u64 > self.max_frames);
        if needs_rotation {
            debug!("Wave file full, rotating");
            self.close_current()?;
        }
        if self.current.is_none() {
            self.open()?;
        }

        let Some(current) = self.current.as_mut() else {
            return Err(Error::internal("wave file missing after open"));
        };
        for &sample in block {
            current.writer.write_sample(sample)?;
        }
        current.frames += block.len() as u64;
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(current) = self.current.take() {
            current.writer.finalize()?;
            debug!("Closed wave file {} ({} frames)", current.path.display(), current.frames);
            self.written.push(current.path);
        }
        Ok(())
    }

    /// Close the open file and return every file written.
    ///
    /// # Errors
    ///
    /// Returns an error if the wave header cannot be finalized.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.close_current()?;
        Ok(std::mem::take(&mut self.written))
    }
}

/// Handle to a wave writer running on a blocking thread.
#[derive(Debug)]
pub struct WaveRecorder {
    tx: mpsc::Sender<Vec<i16>>,
    handle: JoinHandle<Result<Vec<PathBuf>>>,
}

impl WaveRecorder {
    /// Start writing wave files in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the output directory cannot be created.
    pub fn start(dir: &Path, prefix: &str, sampling_rate: u32, max_duration_s: f64) -> Result<Self> {
        let mut files = WaveFiles::new(dir, prefix, sampling_rate, max_duration_s)?;
        let (tx, mut rx) = mpsc::channel::<Vec<i16>>(WRITE_QUEUE_BLOCKS);

        let handle = tokio::task::spawn_blocking(move || {
            while let Some(block) = rx.blocking_recv() {
                files.write_block(&block)?;
            }
            files.finish()
        });

        Ok(Self { tx, handle })
    }

    /// Queue a block for writing. Drops the block if the writer is behind.
    pub fn write(&self, block: Vec<i16>) {
        if let Err(e) = self.tx.try_send(block) {
            match e {
                mpsc::error::TrySendError::Full(_) => warn!("Wave writer is behind, dropping block"),
                mpsc::error::TrySendError::Closed(_) => debug!("Wave writer already stopped"),
            }
        }
    }

    /// Flush all queued blocks and close the last file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing failed or the writer thread panicked.
    pub async fn finish(self) -> Result<Vec<PathBuf>> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| Error::internal(format!("wave writer task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_in(path: &Path) -> u32 {
        hound::WavReader::open(path).unwrap().duration()
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = WaveFiles::new(dir.path(), "station", 1000, 1.0).unwrap();

        files.write_block(&[1; 300]).unwrap();
        files.write_block(&[2; 300]).unwrap();
        let written = files.finish().unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(frames_in(&written[0]), 600);

        let name = written[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("station_"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn test_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = WaveFiles::new(dir.path(), "station", 1000, 1.0).unwrap();

        for _ in 0..5 {
            files.write_block(&[0; 400]).unwrap();
        }
        let written = files.finish().unwrap();

        // 400 + 400 fit, the third block starts a new file
        assert_eq!(written.len(), 3);
        assert_eq!(frames_in(&written[0]), 800);
        assert_eq!(frames_in(&written[1]), 800);
        assert_eq!(frames_in(&written[2]), 400);

        // names stay unique within the same second
        let mut names: Vec<_> = written.iter().map(|p| p.file_name().unwrap()).collect();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_oversized_block_gets_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = WaveFiles::new(dir.path(), "station", 1000, 0.1).unwrap();

        files.write_block(&[0; 500]).unwrap();
        files.write_block(&[0; 500]).unwrap();
        let written = files.finish().unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(frames_in(&written[0]), 500);
    }

    #[test]
    fn test_finish_without_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let files = WaveFiles::new(dir.path(), "station", 1000, 1.0).unwrap();
        assert!(files.finish().unwrap().is_empty());
    }

    #[test]
    fn test_wave_spec() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = WaveFiles::new(dir.path(), "station", 250_000, 1.0).unwrap();
        files.write_block(&[7; 10]).unwrap();
        let written = files.finish().unwrap();

        let reader = hound::WavReader::open(&written[0]).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 250_000);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[tokio::test]
    async fn test_recorder_background_writes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = WaveRecorder::start(dir.path(), "station", 1000, 10.0).unwrap();

        for _ in 0..4 {
            recorder.write(vec![3; 250]);
        }
        let written = recorder.finish().await.unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(frames_in(&written[0]), 1000);
    }
}
