//! Camera unit.
//!
//! Video capture is done by RPi Cam Web Interface, which listens for
//! commands on a FIFO and reports in a schedule log. This unit switches the
//! IR light, sends the start/stop commands and checks the log for
//! confirmation. It never triggers on its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::platform;
use crate::unit::{AnalysisUnit, TriggerEvent, UnitKind, UnitState};

/// Give up on a FIFO nobody reads from.
const FIFO_TIMEOUT: Duration = Duration::from_secs(5);

const CAPTURE_STARTED: &str = "Capturing started";
const CAPTURE_STOPPED: &str = "Capturing stopped";

/// A switchable light.
pub trait Light: Send + Sync + std::fmt::Debug {
    /// Switch the light on.
    ///
    /// # Errors
    ///
    /// Returns an error if the light cannot be switched.
    fn on(&mut self) -> Result<()>;

    /// Switch the light off.
    ///
    /// # Errors
    ///
    /// Returns an error if the light cannot be switched.
    fn off(&mut self) -> Result<()>;
}

/// Write a single command to the camera FIFO.
///
/// # Errors
///
/// Returns an error if the FIFO cannot be opened or nobody reads from it.
pub async fn send_command(fifo: &Path, command: &str) -> Result<()> {
    let write = async {
        let mut file = tokio::fs::OpenOptions::new().write(true).open(fifo).await?;
        file.write_all(command.as_bytes()).await?;
        file.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    match tokio::time::timeout(FIFO_TIMEOUT, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::platform(format!(
            "timed out writing to camera FIFO {}",
            fifo.display()
        ))),
    }
}

/// Check whether the last `lines` lines of the schedule log contain `pattern`.
///
/// # Errors
///
/// Returns an error if the log cannot be read.
pub async fn log_tail_contains(log: &Path, lines: usize, pattern: &str) -> Result<bool> {
    let content = tokio::fs::read_to_string(log).await?;
    let tail: Vec<&str> = content.lines().collect();
    let start = tail.len().saturating_sub(lines);
    Ok(tail[start..].iter().any(|line| line.contains(pattern)))
}

/// IR light plus camera control.
#[derive(Debug)]
pub struct CameraAnalysisUnit {
    config: CameraConfig,
    state: Arc<UnitState>,
    light: Box<dyn Light>,
    failed: Arc<Notify>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl CameraAnalysisUnit {
    /// Create the unit with the given light.
    #[must_use]
    pub fn new(config: CameraConfig, use_trigger: bool, light: Box<dyn Light>) -> Self {
        Self {
            config,
            state: UnitState::new(UnitKind::Camera, use_trigger),
            light,
            failed: Arc::new(Notify::new()),
            stop_tx: None,
            task: None,
        }
    }

    /// Claim the configured GPIO pin and create the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the GPIO pin is unavailable.
    pub fn open(config: CameraConfig, use_trigger: bool) -> Result<Self> {
        let light = platform::open_light(config.light_pin)
            .map_err(|e| Error::unit_start(UnitKind::Camera, e.to_string()))?;
        Ok(Self::new(config, use_trigger, light))
    }

    fn spawn_confirmation(&self, pattern: &'static str, fatal: bool) {
        let log = self.config.schedule_log_path.clone();
        let lines = self.config.observe_lines;
        let delay = Duration::from_millis(self.config.confirm_delay_ms);
        let failed = Arc::clone(&self.failed);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let confirmed = match log_tail_contains(&log, lines, pattern).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Reading {} failed: {}", log.display(), e);
                    false
                }
            };

            if confirmed {
                info!("Confirmed {}", pattern.to_lowercase());
            } else if fatal {
                error!("{} NOT confirmed, terminating", pattern);
                failed.notify_one();
            } else {
                warn!("{} NOT confirmed, ignoring", pattern);
            }
        });
    }

    /// Path of the command FIFO.
    #[must_use]
    pub fn fifo_path(&self) -> &PathBuf {
        &self.config.fifo_path
    }
}

#[async_trait]
impl AnalysisUnit for CameraAnalysisUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Camera
    }

    fn state(&self) -> &Arc<UnitState> {
        &self.state
    }

    // the camera interface runs in its own process, nothing to compute here
    async fn start(&mut self, _events: mpsc::Sender<TriggerEvent>) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::unit_start(UnitKind::Camera, "camera unit was already started"));
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let failed = Arc::clone(&self.failed);
        let state = Arc::clone(&self.state);

        self.state.mark_started();
        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = stop_rx.changed() => debug!("Camera unit stopping"),
                () = failed.notified() => error!("Camera did not start capturing"),
            }
            state.mark_dead();
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<()> {
        if self.state.is_recording() {
            info!("Starting camera recording: ignored, camera already recording");
            return Ok(());
        }

        info!("Powering light on");
        self.light.on()?;

        info!("Starting camera recording");
        if let Err(e) = send_command(&self.config.fifo_path, "1").await {
            if let Err(off) = self.light.off() {
                warn!("Powering light off failed: {}", off);
            }
            return Err(e);
        }

        self.spawn_confirmation(CAPTURE_STARTED, true);
        self.state.set_recording(true);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        if !self.state.is_recording() {
            debug!("Stopping camera recording: ignored, camera not recording");
            return Ok(());
        }

        info!("Stopping camera recording");
        self.state.set_recording(false);
        let sent = send_command(&self.config.fifo_path, "0").await;

        info!("Powering light off");
        self.light.off()?;
        sent?;

        self.spawn_confirmation(CAPTURE_STOPPED, false);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let stopped = self.stop_recording().await;
        self.state.mark_stopped();
        if let Err(e) = self.light.off() {
            warn!("Powering light off failed: {}", e);
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Camera task failed: {}", e);
            }
        }
        stopped
    }
}
