//! Ultrasonic audio unit.
//!
//! Reads fixed-size blocks from the microphone, feeds them to the
//! [`PingDetector`] and, while the rack records, into rotating wave files.
//! If the microphone stops delivering audio the USB hub it hangs off is
//! power cycled and the unit ends, which the rack reports as a failure.

pub mod detector;
pub mod wave;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::platform;
use crate::unit::{report_trigger, AnalysisUnit, TriggerEvent, UnitKind, UnitState};

pub use detector::{Peak, PingDetector, TriggerChange};
pub use wave::{WaveFiles, WaveRecorder};

/// Blocks buffered between the capture reader and the analysis loop.
const BLOCK_QUEUE: usize = 64;

/// A source of audio blocks.
#[async_trait]
pub trait AudioInput: Send + Sync + std::fmt::Debug {
    /// Read the next block; `None` once the input has ended.
    async fn read_block(&mut self) -> Result<Option<Vec<i16>>>;

    /// Release the input.
    async fn close(self: Box<Self>);
}

/// Microphone-driven analysis unit.
#[derive(Debug)]
pub struct AudioAnalysisUnit {
    config: AudioConfig,
    wave_dir: PathBuf,
    wave_prefix: String,
    state: Arc<UnitState>,
    input: Option<Box<dyn AudioInput>>,
    recorder: Arc<Mutex<Option<WaveRecorder>>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl AudioAnalysisUnit {
    /// Create the unit on top of an opened input.
    ///
    /// Wave files go to `wave_dir` and are prefixed with the station name.
    #[must_use]
    pub fn new(
        config: AudioConfig,
        use_trigger: bool,
        wave_dir: PathBuf,
        wave_prefix: String,
        input: Box<dyn AudioInput>,
    ) -> Self {
        Self {
            config,
            wave_dir,
            wave_prefix,
            state: UnitState::new(UnitKind::Audio, use_trigger),
            input: Some(input),
            recorder: Arc::new(Mutex::new(None)),
            stop_tx: None,
            task: None,
        }
    }

    /// Open the configured microphone and create the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture device cannot be opened.
    pub async fn open(
        config: AudioConfig,
        use_trigger: bool,
        wave_dir: PathBuf,
        wave_prefix: String,
    ) -> Result<Self> {
        let input = platform::open_audio_input(&config)
            .await
            .map_err(|e| Error::unit_start(UnitKind::Audio, e.to_string()))?;
        Ok(Self::new(config, use_trigger, wave_dir, wave_prefix, input))
    }
}

/// Forward blocks from the input into a channel until either side ends.
///
/// Reading happens in its own task so that a partially read block is never
/// abandoned by the analysis loop's `select!`.
fn spawn_reader(mut input: Box<dyn AudioInput>, tx: mpsc::Sender<Vec<i16>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match input.read_block().await {
                Ok(Some(block)) => {
                    if tx.send(block).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    warn!("Audio input ended");
                    break;
                }
                Err(e) => {
                    error!("Reading audio failed: {}", e);
                    break;
                }
            }
        }
        input.close().await;
    })
}

struct AnalysisLoop {
    config: AudioConfig,
    state: Arc<UnitState>,
    events: mpsc::Sender<TriggerEvent>,
    recorder: Arc<Mutex<Option<WaveRecorder>>>,
}

impl AnalysisLoop {
    async fn run(self, mut blocks: mpsc::Receiver<Vec<i16>>, mut stop_rx: watch::Receiver<bool>) {
        let mut detector = PingDetector::new(&self.config);
        let mut watchdog = tokio::time::interval(Duration::from_secs(self.config.stall_timeout_s.max(1)));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        watchdog.tick().await;
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("Audio analysis stopping");
                    break;
                }
                block = blocks.recv() => {
                    let Some(block) = block else {
                        warn!("Audio stream closed");
                        break;
                    };
                    received += 1;
                    for change in detector.process(&block) {
                        report_trigger(&self.state, &self.events, change.trigger, change.message).await;
                    }
                    if let Some(recorder) = self.recorder.lock().await.as_ref() {
                        recorder.write(block);
                    }
                }
                _ = watchdog.tick() => {
                    if received == 0 {
                        warn!("Received no audio for {}s, power cycling USB", self.config.stall_timeout_s);
                        if let Err(e) = platform::power_cycle_usb(
                            &self.config.usb_hub_location,
                            self.config.usb_hub_port,
                        )
                        .await
                        {
                            error!("USB power cycle failed: {}", e);
                        }
                        break;
                    }
                    debug!("Received {} audio blocks", received);
                    received = 0;
                }
            }
        }

        // the rack may never get to stop recording once the unit is gone
        if let Some(recorder) = self.recorder.lock().await.take() {
            if let Err(e) = recorder.finish().await {
                error!("Closing wave file failed: {}", e);
            }
            self.state.set_recording(false);
        }
    }
}

#[async_trait]
impl AnalysisUnit for AudioAnalysisUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Audio
    }

    fn state(&self) -> &Arc<UnitState> {
        &self.state
    }

    async fn start(&mut self, events: mpsc::Sender<TriggerEvent>) -> Result<()> {
        let input = self
            .input
            .take()
            .ok_or_else(|| Error::unit_start(UnitKind::Audio, "audio unit was already started"))?;

        info!(
            "Starting audio analysis at {} Hz, {} frames per block",
            self.config.sampling_rate,
            self.config.frames_per_block()
        );

        let (block_tx, block_rx) = mpsc::channel(BLOCK_QUEUE);
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = spawn_reader(input, block_tx);

        let analysis = AnalysisLoop {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            events,
            recorder: Arc::clone(&self.recorder),
        };
        let state = Arc::clone(&self.state);

        self.state.mark_started();
        self.task = Some(tokio::spawn(async move {
            analysis.run(block_rx, stop_rx).await;
            reader.abort();
            state.mark_dead();
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<()> {
        if self.config.wave_export_len_s <= 0.0 {
            info!("Wave export length is zero, not creating wave file");
            return Ok(());
        }

        let mut slot = self.recorder.lock().await;
        if slot.is_some() {
            warn!("Another wave file is open, not creating a new one");
            return Ok(());
        }

        info!("Starting audio recording");
        *slot = Some(WaveRecorder::start(
            &self.wave_dir,
            &self.wave_prefix,
            self.config.sampling_rate,
            self.config.wave_export_len_s,
        )?);
        self.state.set_recording(true);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        let recorder = self.recorder.lock().await.take();
        self.state.set_recording(false);
        if let Some(recorder) = recorder {
            info!("Stopping audio recording");
            let written = recorder.finish().await?;
            debug!("Wrote {} wave files", written.len());
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // the capture task has to go even if the last wave file is lost
        let recording = self.stop_recording().await;
        self.state.mark_stopped();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Audio task failed: {}", e);
            }
        }
        recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned blocks, then either ends or stalls.
    #[derive(Debug)]
    struct ScriptedInput {
        blocks: VecDeque<Vec<i16>>,
        stall: bool,
    }

    #[async_trait]
    impl AudioInput for ScriptedInput {
        async fn read_block(&mut self) -> Result<Option<Vec<i16>>> {
            match self.blocks.pop_front() {
                Some(block) => Ok(Some(block)),
                None if self.stall => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(self: Box<Self>) {}
    }

    fn config() -> AudioConfig {
        AudioConfig {
            sampling_rate: 250_000,
            input_block_duration_s: 0.004,
            quiet_threshold_s: 0.02,
            noise_threshold_s: 0.008,
            wave_export_len_s: 1.0,
            stall_timeout_s: 30,
            ..AudioConfig::default()
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn call() -> Vec<i16> {
        (0..1000)
            .map(|i| {
                let t = f64::from(i) / 250_000.0;
                (10_000.0 * (2.0 * std::f64::consts::PI * 40_000.0 * t).sin()) as i16
            })
            .collect()
    }

    fn unit(blocks: Vec<Vec<i16>>, stall: bool, dir: &std::path::Path) -> AudioAnalysisUnit {
        AudioAnalysisUnit::new(
            config(),
            true,
            dir.to_path_buf(),
            "station".to_string(),
            Box::new(ScriptedInput {
                blocks: blocks.into(),
                stall,
            }),
        )
    }

    #[tokio::test]
    async fn test_ping_reports_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = unit(vec![call(), vec![0; 1000]], true, dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        unit.start(tx).await.unwrap();
        let event = rx.recv().await.unwrap();

        assert!(event.trigger);
        assert_eq!(event.source.name(), "AudioAnalysisUnit");
        assert!(event.message.contains_key("Pings"));
        assert!(unit.status().trigger);

        unit.stop().await.unwrap();
        let status = unit.status();
        assert!(!status.running);
        assert!(!status.alive);
    }

    #[tokio::test]
    async fn test_input_end_kills_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = unit(vec![vec![0; 1000]], false, dir.path());
        let (tx, _rx) = mpsc::channel(8);

        unit.start(tx).await.unwrap();
        for _ in 0..100 {
            if !unit.status().alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = unit.status();
        assert!(status.running);
        assert!(!status.alive);
    }

    #[tokio::test]
    async fn test_recording_writes_wave() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = vec![vec![0; 1000]; 3];
        let mut unit = unit(blocks, true, dir.path());
        let (tx, _rx) = mpsc::channel(8);

        unit.start_recording().await.unwrap();
        assert!(unit.status().recording);
        unit.start(tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        unit.stop().await.unwrap();

        assert!(!unit.status().recording);
        let waves: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
            .collect();
        assert_eq!(waves.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_after_wave_failure_still_stops_task() {
        let dir = tempfile::tempdir().unwrap();
        let wave_dir = dir.path().join("waves");
        std::fs::create_dir(&wave_dir).unwrap();
        let mut unit = unit(vec![vec![0; 1000]; 3], true, &wave_dir);
        let (tx, _rx) = mpsc::channel(8);

        unit.start_recording().await.unwrap();
        std::fs::remove_dir_all(&wave_dir).unwrap();
        unit.start(tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(unit.stop().await.is_err());
        let status = unit.status();
        assert!(!status.running);
        assert!(!status.alive);
        assert!(!status.recording);
    }

    #[tokio::test]
    async fn test_zero_export_length_skips_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = unit(Vec::new(), true, dir.path());
        unit.config.wave_export_len_s = 0.0;

        unit.start_recording().await.unwrap();
        assert!(!unit.status().recording);
        unit.stop_recording().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = unit(Vec::new(), true, dir.path());
        let (tx, _rx) = mpsc::channel(8);

        unit.start(tx.clone()).await.unwrap();
        assert!(unit.start(tx).await.is_err());
        unit.stop().await.unwrap();
    }
}
