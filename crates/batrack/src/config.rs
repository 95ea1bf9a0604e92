//! Configuration management for batrack.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "batrack.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "batrack";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "events.db";

/// Upper bound of the VHF hold and activity windows (one year).
const MAX_HOLD_S: f64 = 365.0 * 24.0 * 3600.0;

/// Run name used when no runs are scheduled.
pub const CONTINUOUS_RUN: &str = "continuous";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `BATRACK_`, sections split on `__`)
/// 2. TOML config file at `~/.config/batrack/batrack.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rack-wide settings, the base of every run.
    pub batrack: RackConfig,
    /// MQTT broker settings.
    pub mqtt: MqttConfig,
    /// Audio unit settings.
    pub audio: AudioConfig,
    /// VHF unit settings.
    pub vhf: VhfConfig,
    /// Camera unit settings.
    pub camera: CameraConfig,
    /// Event store settings.
    pub storage: StorageConfig,
    /// Scheduled daily runs.
    pub runs: Vec<RunConfig>,
}

/// Rack-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackConfig {
    /// Root directory for recordings and trigger logs.
    /// Defaults to `~/.local/share/batrack`
    pub data_path: Option<PathBuf>,
    /// Interval between status reports in seconds.
    pub duty_cycle_s: u64,
    /// Enable the VHF unit.
    pub use_vhf: bool,
    /// Enable the audio unit.
    pub use_audio: bool,
    /// Enable the camera unit.
    pub use_camera: bool,
    /// Let the VHF unit trigger recordings.
    pub use_trigger_vhf: bool,
    /// Let the audio unit trigger recordings.
    pub use_trigger_audio: bool,
    /// Let the camera unit trigger recordings.
    pub use_trigger_camera: bool,
    /// Record regardless of triggers.
    pub always_on: bool,
    /// Default log level when no verbosity flag is given.
    pub log_level: Option<String>,
}

/// MQTT broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Keep-alive interval in seconds.
    pub keepalive_s: u64,
}

/// Audio unit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Peak loudness above which a block counts as noisy.
    pub threshold_dbfs: f64,
    /// Lower edge of the analysed band.
    pub highpass_hz: u32,
    /// Upper edge of the analysed band.
    pub lowpass_hz: u32,
    /// Maximum duration of a single wave file; 0 disables recording.
    pub wave_export_len_s: f64,
    /// Silence needed to clear the trigger.
    pub quiet_threshold_s: f64,
    /// Longest noisy stretch still counted as a ping.
    pub noise_threshold_s: f64,
    /// Microphone sampling rate.
    pub sampling_rate: u32,
    /// Length of one analysed block in seconds.
    pub input_block_duration_s: f64,
    /// ALSA device override, e.g. `hw:1,0`.
    pub device: Option<String>,
    /// USB hub location passed to `uhubctl -l`.
    pub usb_hub_location: String,
    /// USB hub port passed to `uhubctl -p`.
    pub usb_hub_port: u8,
    /// Seconds without audio before the microphone is considered stalled.
    pub stall_timeout_s: u64,
}

/// VHF unit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VhfConfig {
    /// Bandwidth of a transmitter, used to match signals to frequencies.
    pub freq_bw_hz: u32,
    /// Monitored tag frequencies.
    pub sig_freqs_mhz: Vec<f64>,
    /// Minimum signal power.
    pub sig_threshold_dbw: f64,
    /// Maximum signal duration; 0 disables the check.
    pub sig_duration_threshold_s: f64,
    /// Window used for the active/passive classification.
    pub freq_active_window_s: f64,
    /// Power standard deviation above which a tag counts as active.
    pub freq_active_var: f64,
    /// Signals required before the variance is evaluated.
    pub freq_active_count: usize,
    /// How long a trigger stays set after the last matching signal.
    pub untrigger_duration_s: f64,
    /// Topic filter for matched signals.
    pub topic: String,
}

/// Camera unit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// BCM pin driving the light.
    pub light_pin: u8,
    /// Command FIFO of the camera web interface.
    pub fifo_path: PathBuf,
    /// Schedule log of the camera web interface.
    pub schedule_log_path: PathBuf,
    /// Number of trailing log lines inspected for confirmation.
    pub observe_lines: usize,
    /// Delay before checking the log for confirmation.
    pub confirm_delay_ms: u64,
}

/// Event store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `<data dir>/events.db`
    pub database_path: Option<PathBuf>,
    /// Events older than this many days are pruned when a run starts.
    /// 0 keeps events forever.
    pub max_age_days: u32,
}

/// A scheduled daily run with optional overrides of the rack settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run name, used in file names and logs.
    pub name: String,
    /// Daily start time (`HH:MM` or `HH:MM:SS`).
    pub start: String,
    /// Daily stop time (`HH:MM` or `HH:MM:SS`).
    pub stop: String,
    /// Override of `batrack.data_path`.
    pub data_path: Option<PathBuf>,
    /// Override of `batrack.duty_cycle_s`.
    pub duty_cycle_s: Option<u64>,
    /// Override of `batrack.use_vhf`.
    pub use_vhf: Option<bool>,
    /// Override of `batrack.use_audio`.
    pub use_audio: Option<bool>,
    /// Override of `batrack.use_camera`.
    pub use_camera: Option<bool>,
    /// Override of `batrack.use_trigger_vhf`.
    pub use_trigger_vhf: Option<bool>,
    /// Override of `batrack.use_trigger_audio`.
    pub use_trigger_audio: Option<bool>,
    /// Override of `batrack.use_trigger_camera`.
    pub use_trigger_camera: Option<bool>,
    /// Override of `batrack.always_on`.
    pub always_on: Option<bool>,
}

/// Rack settings of one run after overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Run name.
    pub name: String,
    /// Root data directory.
    pub data_path: PathBuf,
    /// Interval between status reports.
    pub duty_cycle: Duration,
    /// Enable the VHF unit.
    pub use_vhf: bool,
    /// Enable the audio unit.
    pub use_audio: bool,
    /// Enable the camera unit.
    pub use_camera: bool,
    /// Let the VHF unit trigger.
    pub use_trigger_vhf: bool,
    /// Let the audio unit trigger.
    pub use_trigger_audio: bool,
    /// Let the camera unit trigger.
    pub use_trigger_camera: bool,
    /// Record regardless of triggers.
    pub always_on: bool,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            data_path: None, // Resolved to the data dir at runtime
            duty_cycle_s: 10,
            use_vhf: true,
            use_audio: true,
            use_camera: true,
            use_trigger_vhf: true,
            use_trigger_audio: true,
            use_trigger_camera: true,
            always_on: false,
            log_level: None,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive_s: 60,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            threshold_dbfs: 20.0,
            highpass_hz: 15_000,
            lowpass_hz: 42_000,
            wave_export_len_s: 60.0,
            quiet_threshold_s: 10.0,
            noise_threshold_s: 0.1,
            sampling_rate: 250_000,
            input_block_duration_s: 0.05,
            device: None,
            usb_hub_location: "1-1".to_string(),
            usb_hub_port: 3,
            stall_timeout_s: 2,
        }
    }
}

impl Default for VhfConfig {
    fn default() -> Self {
        Self {
            freq_bw_hz: 12_000,
            sig_freqs_mhz: Vec::new(),
            sig_threshold_dbw: -50.0,
            sig_duration_threshold_s: 0.0,
            freq_active_window_s: 60.0,
            freq_active_var: 1.0,
            freq_active_count: 5,
            untrigger_duration_s: 60.0,
            topic: "+/radiotracking/matched/cbor".to_string(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            light_pin: 12,
            fifo_path: PathBuf::from("/var/www/html/FIFO1"),
            schedule_log_path: PathBuf::from("/var/www/html/scheduleLog.txt"),
            observe_lines: 5,
            confirm_delay_ms: 1000,
        }
    }
}

impl AudioConfig {
    /// Number of frames in one analysed block.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn frames_per_block(&self) -> usize {
        (f64::from(self.sampling_rate) * self.input_block_duration_s) as usize
    }
}

/// Parse a daily time in `HH:MM:SS` or `HH:MM` form.
///
/// # Errors
///
/// Returns a validation error if the string is not a valid time of day.
pub fn parse_time(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| Error::validation(format!("invalid time of day: '{value}'")))
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("BATRACK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.batrack.duty_cycle_s == 0 {
            return Err(Error::validation("duty_cycle_s must be greater than 0"));
        }

        self.validate_audio()?;
        self.validate_vhf()?;
        self.validate_runs()?;

        Ok(())
    }

    fn validate_audio(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sampling_rate == 0 {
            return Err(Error::validation("sampling_rate must be greater than 0"));
        }
        if audio.input_block_duration_s <= 0.0 || audio.frames_per_block() < 2 {
            return Err(Error::validation(format!(
                "input_block_duration_s ({}) must yield at least 2 frames per block",
                audio.input_block_duration_s
            )));
        }
        if audio.lowpass_hz <= audio.highpass_hz {
            return Err(Error::validation(format!(
                "lowpass_hz ({}) must be greater than highpass_hz ({})",
                audio.lowpass_hz, audio.highpass_hz
            )));
        }
        for (name, value) in [
            ("wave_export_len_s", audio.wave_export_len_s),
            ("quiet_threshold_s", audio.quiet_threshold_s),
            ("noise_threshold_s", audio.noise_threshold_s),
        ] {
            if value < 0.0 {
                return Err(Error::validation(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }

    fn validate_vhf(&self) -> Result<()> {
        let uses_vhf = self.batrack.use_vhf || self.runs.iter().any(|r| r.use_vhf == Some(true));
        if uses_vhf && self.vhf.sig_freqs_mhz.is_empty() {
            return Err(Error::validation(
                "sig_freqs_mhz must list at least one frequency when the VHF unit is used",
            ));
        }
        if self.vhf.freq_bw_hz == 0 {
            return Err(Error::validation("freq_bw_hz must be greater than 0"));
        }
        if self.vhf.freq_active_count == 0 {
            return Err(Error::validation("freq_active_count must be greater than 0"));
        }
        for (name, value) in [
            ("untrigger_duration_s", self.vhf.untrigger_duration_s),
            ("freq_active_window_s", self.vhf.freq_active_window_s),
        ] {
            if !(0.0..=MAX_HOLD_S).contains(&value) {
                return Err(Error::validation(format!(
                    "{name} ({value}) must be between 0 and {MAX_HOLD_S}"
                )));
            }
        }
        Ok(())
    }

    fn validate_runs(&self) -> Result<()> {
        let mut names = HashSet::new();
        for run in &self.runs {
            if run.name.is_empty() {
                return Err(Error::validation("every run needs a name"));
            }
            if !names.insert(run.name.as_str()) {
                return Err(Error::validation(format!("duplicate run name '{}'", run.name)));
            }
            if run.start.is_empty() || run.stop.is_empty() {
                return Err(Error::validation(format!(
                    "[{}] is missing a start or stop time",
                    run.name
                )));
            }
            let start = parse_time(&run.start)?;
            let stop = parse_time(&run.stop)?;
            if start == stop {
                return Err(Error::validation(format!(
                    "[{}] start and stop time are equal",
                    run.name
                )));
            }
            if run.duty_cycle_s == Some(0) {
                return Err(Error::validation(format!(
                    "[{}] duty_cycle_s must be greater than 0",
                    run.name
                )));
            }
        }
        Ok(())
    }

    /// Get the data root, resolving defaults if not set.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.batrack
            .data_path
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.data_path().join(DATABASE_FILE_NAME))
    }

    /// Resolve the settings of a run, or the continuous run when `None`.
    #[must_use]
    pub fn run_settings(&self, run: Option<&RunConfig>) -> RunSettings {
        let base = &self.batrack;
        let Some(run) = run else {
            return RunSettings {
                name: CONTINUOUS_RUN.to_string(),
                data_path: self.data_path(),
                duty_cycle: Duration::from_secs(base.duty_cycle_s),
                use_vhf: base.use_vhf,
                use_audio: base.use_audio,
                use_camera: base.use_camera,
                use_trigger_vhf: base.use_trigger_vhf,
                use_trigger_audio: base.use_trigger_audio,
                use_trigger_camera: base.use_trigger_camera,
                always_on: base.always_on,
            };
        };

        RunSettings {
            name: run.name.clone(),
            data_path: run.data_path.clone().unwrap_or_else(|| self.data_path()),
            duty_cycle: Duration::from_secs(run.duty_cycle_s.unwrap_or(base.duty_cycle_s)),
            use_vhf: run.use_vhf.unwrap_or(base.use_vhf),
            use_audio: run.use_audio.unwrap_or(base.use_audio),
            use_camera: run.use_camera.unwrap_or(base.use_camera),
            use_trigger_vhf: run.use_trigger_vhf.unwrap_or(base.use_trigger_vhf),
            use_trigger_audio: run.use_trigger_audio.unwrap_or(base.use_trigger_audio),
            use_trigger_camera: run.use_trigger_camera.unwrap_or(base.use_trigger_camera),
            always_on: run.always_on.unwrap_or(base.always_on),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.vhf.sig_freqs_mhz = vec![150.077, 150.164];
        config
    }

    #[test]
    fn test_default_rack_config() {
        let rack = RackConfig::default();

        assert!(rack.data_path.is_none());
        assert_eq!(rack.duty_cycle_s, 10);
        assert!(rack.use_vhf && rack.use_audio && rack.use_camera);
        assert!(!rack.always_on);
    }

    #[test]
    fn test_default_audio_config() {
        let audio = AudioConfig::default();

        assert_eq!(audio.sampling_rate, 250_000);
        assert_eq!(audio.lowpass_hz, 42_000);
        assert_eq!(audio.frames_per_block(), 12_500);
        assert!(audio.device.is_none());
    }

    #[test]
    fn test_default_mqtt_config() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.host, "localhost");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.keepalive_s, 60);
    }

    #[test]
    fn test_default_camera_config() {
        let camera = CameraConfig::default();
        assert_eq!(camera.fifo_path, PathBuf::from("/var/www/html/FIFO1"));
        assert_eq!(camera.observe_lines, 5);
    }

    #[test]
    fn test_default_requires_frequencies() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("sig_freqs_mhz"));
    }

    #[test]
    fn test_without_vhf_no_frequencies_needed() {
        let mut config = Config::default();
        config.batrack.use_vhf = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_duty_cycle() {
        let mut config = valid_config();
        config.batrack.duty_cycle_s = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duty_cycle_s"));
    }

    #[test]
    fn test_validate_band() {
        let mut config = valid_config();
        config.audio.lowpass_hz = 10_000;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("lowpass_hz"));
    }

    #[test]
    fn test_validate_block_duration() {
        let mut config = valid_config();
        config.audio.input_block_duration_s = 0.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("input_block_duration_s"));
    }

    #[test]
    fn test_validate_negative_threshold() {
        let mut config = valid_config();
        config.audio.quiet_threshold_s = -1.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("quiet_threshold_s"));
    }

    #[test]
    fn test_validate_vhf_windows() {
        for value in [1e30, f64::INFINITY, f64::NAN, -1.0] {
            let mut config = valid_config();
            config.vhf.untrigger_duration_s = value;
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("untrigger_duration_s"), "accepted {value}");

            let mut config = valid_config();
            config.vhf.freq_active_window_s = value;
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("freq_active_window_s"), "accepted {value}");
        }

        let mut config = valid_config();
        config.vhf.untrigger_duration_s = 0.0;
        config.vhf.freq_active_window_s = 3600.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_run_times() {
        let mut config = valid_config();
        config.runs.push(RunConfig {
            name: "run1".to_string(),
            start: "25:00".to_string(),
            stop: "06:00".to_string(),
            ..RunConfig::default()
        });
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("25:00"));
    }

    #[test]
    fn test_validate_run_missing_stop() {
        let mut config = valid_config();
        config.runs.push(RunConfig {
            name: "run1".to_string(),
            start: "20:00".to_string(),
            ..RunConfig::default()
        });
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("missing a start or stop"));
    }

    #[test]
    fn test_validate_duplicate_runs() {
        let mut config = valid_config();
        let run = RunConfig {
            name: "night".to_string(),
            start: "20:00".to_string(),
            stop: "06:00".to_string(),
            ..RunConfig::default()
        };
        config.runs = vec![run.clone(), run];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate run name"));
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time("20:30").unwrap(),
            NaiveTime::from_hms_opt(20, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time("05:15:30").unwrap(),
            NaiveTime::from_hms_opt(5, 15, 30).unwrap()
        );
        assert!(parse_time("noon").is_err());
    }

    #[test]
    fn test_run_settings_continuous() {
        let config = valid_config();
        let settings = config.run_settings(None);
        assert_eq!(settings.name, CONTINUOUS_RUN);
        assert_eq!(settings.duty_cycle, Duration::from_secs(10));
        assert!(settings.use_audio);
    }

    #[test]
    fn test_run_settings_overrides() {
        let config = valid_config();
        let run = RunConfig {
            name: "dusk".to_string(),
            start: "19:00".to_string(),
            stop: "23:00".to_string(),
            use_camera: Some(false),
            always_on: Some(true),
            duty_cycle_s: Some(30),
            ..RunConfig::default()
        };
        let settings = config.run_settings(Some(&run));
        assert_eq!(settings.name, "dusk");
        assert!(!settings.use_camera);
        assert!(settings.always_on);
        assert!(settings.use_vhf);
        assert_eq!(settings.duty_cycle, Duration::from_secs(30));
    }

    #[test]
    fn test_database_path_default() {
        let mut config = valid_config();
        config.batrack.data_path = Some(PathBuf::from("/data"));
        assert_eq!(config.database_path(), PathBuf::from("/data/events.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = valid_config();
        config.storage.database_path = Some(PathBuf::from("/custom/events.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/events.sqlite")
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("batrack"));
        assert!(path.to_string_lossy().ends_with("batrack.toml"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batrack.toml");
        std::fs::write(
            &path,
            r#"
[batrack]
duty_cycle_s = 5
use_camera = false

[vhf]
sig_freqs_mhz = [150.077]

[audio]
threshold_dbfs = 25.0

[[runs]]
name = "night"
start = "21:00"
stop = "05:00"
always_on = true
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.batrack.duty_cycle_s, 5);
        assert!(!config.batrack.use_camera);
        assert!(config.batrack.use_audio);
        assert_eq!(config.vhf.sig_freqs_mhz, vec![150.077]);
        assert!((config.audio.threshold_dbfs - 25.0).abs() < f64::EPSILON);
        assert_eq!(config.runs.len(), 1);
        assert_eq!(config.runs[0].always_on, Some(true));
    }

    #[test]
    fn test_load_invalid_file_reports_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batrack.toml");
        std::fs::write(&path, "[batrack]\nuse_vhf = true\n").unwrap();

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&valid_config()).unwrap();
        assert!(json.contains("sig_freqs_mhz"));
        assert!(json.contains("threshold_dbfs"));
    }
}
