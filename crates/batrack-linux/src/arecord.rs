//! ALSA capture through the `arecord` utility.
//!
//! Devices are discovered by parsing `arecord -l`; audio is streamed as raw
//! mono S16LE from an `arecord` child process.

use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{PlatformError, Result};

/// Keywords that mark a capture device as a microphone.
const INPUT_KEYWORDS: &[&str] = &["mic", "input"];

/// An ALSA capture device as listed by `arecord -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// ALSA card index.
    pub card: u32,
    /// Device index on the card.
    pub device: u32,
    /// Short card identifier.
    pub card_id: String,
    /// Descriptive card name.
    pub card_name: String,
    /// Descriptive device name.
    pub device_name: String,
}

impl CaptureDevice {
    /// The ALSA hardware name, e.g. `hw:1,0`.
    #[must_use]
    pub fn alsa_name(&self) -> String {
        format!("hw:{},{}", self.card, self.device)
    }

    /// Human readable name used for keyword matching.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}: {} ({})", self.card_name, self.device_name, self.alsa_name())
    }
}

fn device_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^card (\d+): (\S+) \[(.*?)\], device (\d+): (.*?) \[(.*?)\]")
            .expect("device line pattern is valid")
    })
}

/// Parse the output of `arecord -l`.
///
/// Lines that do not describe a device (headers, subdevice listings) are
/// skipped.
#[must_use]
pub fn parse_device_list(output: &str) -> Vec<CaptureDevice> {
    output
        .lines()
        .filter_map(|line| {
            let caps = device_line().captures(line.trim())?;
            Some(CaptureDevice {
                card: caps[1].parse().ok()?,
                card_id: caps[2].to_string(),
                card_name: caps[3].to_string(),
                device: caps[4].parse().ok()?,
                device_name: caps[6].to_string(),
            })
        })
        .collect()
}

/// Pick the first device whose name looks like a microphone input.
#[must_use]
pub fn select_input_device(devices: &[CaptureDevice]) -> Option<&CaptureDevice> {
    for device in devices {
        let name = device.display_name().to_lowercase();
        debug!("Device {}: {}", device.alsa_name(), device.display_name());
        if INPUT_KEYWORDS.iter().any(|k| name.contains(k)) {
            info!(
                "Found an input: device {} - {}",
                device.alsa_name(),
                device.display_name()
            );
            return Some(device);
        }
    }
    info!("No preferred input found; using default input device");
    None
}

/// List the ALSA capture devices on this machine.
///
/// # Errors
///
/// Returns an error if `arecord` cannot be executed or fails.
pub async fn list_capture_devices() -> Result<Vec<CaptureDevice>> {
    let output = Command::new("arecord").arg("-l").output().await?;
    if !output.status.success() {
        return Err(PlatformError::CommandFailed {
            command: "arecord -l".to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Build the `arecord` argument list for a raw mono S16LE stream.
#[must_use]
pub fn capture_args(device: Option<&str>, sampling_rate: u32) -> Vec<String> {
    let mut args = vec!["-q".to_string()];
    if let Some(device) = device {
        args.push("-D".to_string());
        args.push(device.to_string());
    }
    args.extend(
        ["-t", "raw", "-f", "S16_LE", "-c", "1", "-r"]
            .iter()
            .map(ToString::to_string),
    );
    args.push(sampling_rate.to_string());
    args
}

/// A running capture stream that yields fixed-size blocks of samples.
#[derive(Debug)]
pub struct CaptureStream {
    child: Child,
    stdout: ChildStdout,
    buffer: Vec<u8>,
}

impl CaptureStream {
    /// Spawn `arecord` for the given device and sampling rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn spawn(device: Option<&str>, sampling_rate: u32, frames_per_block: usize) -> Result<Self> {
        let args = capture_args(device, sampling_rate);
        debug!("Spawning arecord {}", args.join(" "));

        let mut child = Command::new("arecord")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| PlatformError::CommandFailed {
            command: format!("arecord {}", args.join(" ")),
            message: "stdout not captured".to_string(),
        })?;

        Ok(Self {
            child,
            stdout,
            buffer: vec![0; frames_per_block * 2],
        })
    }

    /// Read the next block of samples.
    ///
    /// Returns `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the child process fails.
    pub async fn read_block(&mut self) -> Result<Option<Vec<i16>>> {
        match self.stdout.read_exact(&mut self.buffer).await {
            Ok(_) => Ok(Some(
                self.buffer
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Terminate the capture process.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to terminate arecord: {}", e);
        }
    }
}
