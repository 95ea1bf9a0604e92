//! Ultrasonic ping detection.
//!
//! Each block of samples is transformed with an FFT, restricted to the
//! configured band, and reduced to its loudest bin. Short loud stretches
//! followed by silence count as pings; the first ping sets the trigger and a
//! long enough silence clears it again.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::AudioConfig;
use crate::unit::message;

/// Magnitude assigned to bins outside the analysed band.
const MASKED_MAGNITUDE: f64 = 0.000_000_001;

/// The loudest bin of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Peak level in dBFS.
    pub db: f64,
    /// Frequency of the peak bin.
    pub frequency_hz: f64,
}

/// A trigger change decided by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerChange {
    /// The new trigger value.
    pub trigger: bool,
    /// Measurements explaining the change.
    pub message: Map<String, Value>,
}

/// Block-wise ping detector.
pub struct PingDetector {
    frames: usize,
    sampling_rate: f64,
    highpass_hz: f64,
    lowpass_hz: f64,
    threshold_dbfs: f64,
    quiet_blocks_max: f64,
    noise_blocks_max: f64,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    pings: u64,
    noise_blocks: u64,
    quiet_blocks: u64,
    triggered: bool,
}

impl std::fmt::Debug for PingDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingDetector")
            .field("frames", &self.frames)
            .field("pings", &self.pings)
            .field("noise_blocks", &self.noise_blocks)
            .field("quiet_blocks", &self.quiet_blocks)
            .field("triggered", &self.triggered)
            .finish_non_exhaustive()
    }
}

impl PingDetector {
    /// Create a detector for blocks of `config.frames_per_block()` samples.
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        let frames = config.frames_per_block();
        let fft = FftPlanner::new().plan_fft_forward(frames);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Self {
            frames,
            sampling_rate: f64::from(config.sampling_rate),
            highpass_hz: f64::from(config.highpass_hz),
            lowpass_hz: f64::from(config.lowpass_hz),
            threshold_dbfs: config.threshold_dbfs,
            quiet_blocks_max: config.quiet_threshold_s / config.input_block_duration_s,
            noise_blocks_max: config.noise_threshold_s / config.input_block_duration_s,
            fft,
            buffer: vec![Complex::default(); frames],
            scratch,
            pings: 0,
            noise_blocks: 0,
            quiet_blocks: 0,
            triggered: false,
        }
    }

    /// Number of samples per block.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Pings counted since the trigger was last cleared.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.pings
    }

    /// Whether the detector currently holds the trigger.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Find the loudest in-band bin of a block.
    ///
    /// Blocks shorter than the configured size are zero padded, longer ones
    /// truncated.
    pub fn peak(&mut self, samples: &[i16]) -> Peak {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0);
            *slot = Complex::new(f64::from(sample), 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bin_width_hz = self.sampling_rate / self.frames as f64;
        let full_scale = (self.frames as f64 / 2.0).max(1.0);

        let mut peak_index = 0;
        let mut peak_db = f64::NEG_INFINITY;
        for (k, bin) in self.buffer.iter().take(self.frames / 2 + 1).enumerate() {
            let freq_hz = k as f64 * bin_width_hz;
            let magnitude = if freq_hz < self.highpass_hz || freq_hz > self.lowpass_hz {
                MASKED_MAGNITUDE
            } else {
                bin.norm()
            };
            let db = 20.0 * (magnitude / full_scale).log10();
            if db > peak_db {
                peak_db = db;
                peak_index = k;
            }
        }

        let peak = Peak {
            db: peak_db,
            frequency_hz: peak_index as f64 * bin_width_hz,
        };
        debug!("Peak freq hz: {} dBFS: {}", peak.frequency_hz, peak.db);
        peak
    }

    /// Analyse one block and return the trigger changes it causes.
    pub fn process(&mut self, samples: &[i16]) -> Vec<TriggerChange> {
        let peak = self.peak(samples);
        let mut changes = Vec::new();

        if peak.db > self.threshold_dbfs {
            self.quiet_blocks = 0;
            self.noise_blocks += 1;
            return changes;
        }

        // a ping is a noisy stretch no longer than noise_blocks_max
        if self.noise_blocks >= 1 && self.noise_blocks as f64 <= self.noise_blocks_max {
            info!("detected ping {}", self.pings);
            self.pings += 1;
        }

        if self.pings >= 1 && !self.triggered {
            self.triggered = true;
            changes.push(TriggerChange {
                trigger: true,
                message: message([
                    ("Pings", json!(self.pings)),
                    ("Ping Frequency", json!(peak.frequency_hz)),
                ]),
            });
        }

        if self.quiet_blocks as f64 > self.quiet_blocks_max && self.triggered {
            self.triggered = false;
            changes.push(TriggerChange {
                trigger: false,
                message: message([("Quiet Blocks", json!(self.quiet_blocks))]),
            });
            self.pings = 0;
        }

        self.noise_blocks = 0;
        self.quiet_blocks += 1;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1000 frames per block at 250 kHz: 250 Hz per bin
    fn config() -> AudioConfig {
        AudioConfig {
            threshold_dbfs: 20.0,
            highpass_hz: 15_000,
            lowpass_hz: 42_000,
            quiet_threshold_s: 0.02,
            noise_threshold_s: 0.008,
            sampling_rate: 250_000,
            input_block_duration_s: 0.004,
            ..AudioConfig::default()
        }
    }

    fn tone(freq_hz: f64, amplitude: f64, frames: usize) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f64 / 250_000.0;
                #[allow(clippy::cast_possible_truncation)]
                let s = (amplitude * (2.0 * std::f64::consts::PI * freq_hz * t).sin()) as i16;
                s
            })
            .collect()
    }

    fn silence(frames: usize) -> Vec<i16> {
        vec![0; frames]
    }

    #[test]
    fn test_peak_of_in_band_tone() {
        let mut detector = PingDetector::new(&config());
        assert_eq!(detector.frames(), 1000);

        let peak = detector.peak(&tone(40_000.0, 10_000.0, 1000));
        assert!((peak.frequency_hz - 40_000.0).abs() < f64::EPSILON);
        // amplitude * N / 2 normalised by N / 2
        assert!((peak.db - 80.0).abs() < 0.5, "peak db was {}", peak.db);
    }

    #[test]
    fn test_out_of_band_tone_is_masked() {
        let mut detector = PingDetector::new(&config());
        let peak = detector.peak(&tone(5_000.0, 10_000.0, 1000));
        assert!(peak.db < 0.0);

        let peak = detector.peak(&tone(60_000.0, 10_000.0, 1000));
        assert!(peak.db < 0.0);
    }

    #[test]
    fn test_silence_is_quiet() {
        let mut detector = PingDetector::new(&config());
        for _ in 0..20 {
            assert!(detector.process(&silence(1000)).is_empty());
        }
        assert_eq!(detector.pings(), 0);
        assert!(!detector.is_triggered());
    }

    #[test]
    fn test_ping_sets_trigger() {
        let mut detector = PingDetector::new(&config());
        let call = tone(40_000.0, 10_000.0, 1000);

        assert!(detector.process(&call).is_empty());
        let changes = detector.process(&silence(1000));

        assert_eq!(changes.len(), 1);
        assert!(changes[0].trigger);
        assert_eq!(changes[0].message["Pings"], json!(1));
        assert!(changes[0].message.contains_key("Ping Frequency"));
        assert!(detector.is_triggered());
    }

    #[test]
    fn test_long_noise_is_not_a_ping() {
        let mut detector = PingDetector::new(&config());
        let noise = tone(40_000.0, 10_000.0, 1000);

        // five noisy blocks exceed noise_blocks_max (2)
        for _ in 0..5 {
            assert!(detector.process(&noise).is_empty());
        }
        assert!(detector.process(&silence(1000)).is_empty());
        assert_eq!(detector.pings(), 0);
        assert!(!detector.is_triggered());
    }

    #[test]
    fn test_silence_clears_trigger() {
        let mut detector = PingDetector::new(&config());
        detector.process(&tone(40_000.0, 10_000.0, 1000));
        assert_eq!(detector.process(&silence(1000)).len(), 1);

        let mut cleared = Vec::new();
        for _ in 0..10 {
            cleared.extend(detector.process(&silence(1000)));
        }

        assert_eq!(cleared.len(), 1);
        assert!(!cleared[0].trigger);
        assert_eq!(cleared[0].message["Quiet Blocks"], json!(6));
        assert_eq!(detector.pings(), 0);
        assert!(!detector.is_triggered());
    }

    #[test]
    fn test_retrigger_after_clear() {
        let mut detector = PingDetector::new(&config());
        let call = tone(40_000.0, 10_000.0, 1000);

        detector.process(&call);
        detector.process(&silence(1000));
        for _ in 0..10 {
            detector.process(&silence(1000));
        }
        assert!(!detector.is_triggered());

        detector.process(&call);
        let changes = detector.process(&silence(1000));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].trigger);
        assert_eq!(changes[0].message["Pings"], json!(1));
    }

    #[test]
    fn test_short_block_is_padded() {
        let mut detector = PingDetector::new(&config());
        let peak = detector.peak(&tone(40_000.0, 10_000.0, 500));
        assert!((peak.frequency_hz - 40_000.0).abs() < f64::EPSILON);
    }
}
