//! Adapters between the analysis units and the platform layer.
//!
//! On Linux these forward to `batrack-linux`; elsewhere the hardware
//! functions fail with [`crate::Error::Platform`] so that the rest of the crate
//! (configuration, storage, CLI) still builds and tests everywhere.

use std::path::PathBuf;
#[cfg(target_os = "linux")]
use std::path::Path;

use crate::audio::AudioInput;
use crate::camera::Light;
use crate::config::AudioConfig;
#[cfg(not(target_os = "linux"))]
use crate::error::Error;
use crate::error::Result;

#[cfg(target_os = "linux")]
use async_trait::async_trait;
#[cfg(target_os = "linux")]
use batrack_linux::{CaptureStream, OutputLine};

/// Name of the running platform.
#[must_use]
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        batrack_linux::platform_name()
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::consts::OS
    }
}

/// The station's hostname, used in topics, file names and client ids.
#[must_use]
pub fn hostname() -> String {
    #[cfg(target_os = "linux")]
    {
        batrack_linux::hostname()
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl AudioInput for CaptureStream {
    async fn read_block(&mut self) -> Result<Option<Vec<i16>>> {
        Ok(CaptureStream::read_block(self).await?)
    }

    async fn close(self: Box<Self>) {
        CaptureStream::close(*self).await;
    }
}

#[cfg(target_os = "linux")]
impl Light for OutputLine {
    fn on(&mut self) -> Result<()> {
        OutputLine::on(self);
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        OutputLine::off(self);
        Ok(())
    }
}

/// Resolve the capture device: the configured one, or the first device that
/// looks like a microphone.
#[cfg(target_os = "linux")]
async fn capture_device(config: &AudioConfig) -> Result<Option<String>> {
    if let Some(device) = &config.device {
        return Ok(Some(device.clone()));
    }
    let devices = batrack_linux::list_capture_devices().await?;
    Ok(batrack_linux::select_input_device(&devices).map(|d| {
        tracing::info!("Using input device {}", d.display_name());
        d.alsa_name()
    }))
}

/// Open the microphone described by `config`.
///
/// # Errors
///
/// Returns an error if no capture process can be started.
pub async fn open_audio_input(config: &AudioConfig) -> Result<Box<dyn AudioInput>> {
    #[cfg(target_os = "linux")]
    {
        let device = capture_device(config).await?;
        let stream = CaptureStream::spawn(
            device.as_deref(),
            config.sampling_rate,
            config.frames_per_block(),
        )?;
        Ok(Box::new(stream))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Err(Error::platform("audio capture requires Linux"))
    }
}

/// Claim a GPIO pin for the light.
///
/// # Errors
///
/// Returns an error if the pin is unavailable.
pub fn open_light(pin: u8) -> Result<Box<dyn Light>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(OutputLine::open(pin)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform(format!("GPIO {pin} requires Linux")))
    }
}

/// Power cycle a USB hub port.
///
/// # Errors
///
/// Returns an error if `uhubctl` fails.
pub async fn power_cycle_usb(location: &str, port: u8) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        batrack_linux::power_cycle_hub(location, port).await?;
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform(format!(
            "cannot power cycle USB hub {location} port {port} on this platform"
        )))
    }
}

/// A capture device as shown by `batrack devices`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    /// ALSA name, e.g. `hw:1,0`.
    pub alsa_name: String,
    /// Human readable name.
    pub description: String,
    /// Whether the device would be picked automatically.
    pub selected: bool,
}

/// List the ALSA capture devices.
///
/// # Errors
///
/// Returns an error if the devices cannot be listed.
pub async fn capture_devices() -> Result<Vec<DeviceInfo>> {
    #[cfg(target_os = "linux")]
    {
        let devices = batrack_linux::list_capture_devices().await?;
        let selected = batrack_linux::select_input_device(&devices).map(batrack_linux::CaptureDevice::alsa_name);
        Ok(devices
            .iter()
            .map(|d| DeviceInfo {
                alsa_name: d.alsa_name(),
                description: d.display_name(),
                selected: selected.as_deref() == Some(d.alsa_name().as_str()),
            })
            .collect())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform("listing capture devices requires Linux"))
    }
}

/// What `batrack service install` sets up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstall {
    /// Path of the `batrack` binary.
    pub binary: PathBuf,
    /// Configuration file the service runs with.
    pub config: PathBuf,
    /// User the service runs as.
    pub user: String,
    /// Home directory receiving the launch script.
    pub home: PathBuf,
    /// Data directory to create.
    pub data_dir: PathBuf,
}

#[cfg(target_os = "linux")]
fn unit_path() -> &'static Path {
    Path::new(batrack_linux::systemd::UNIT_PATH)
}

/// Install and enable the systemd service.
///
/// # Errors
///
/// Returns an error if the files cannot be written or systemd refuses.
pub fn install_service(install: &ServiceInstall, start_now: bool) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let plan = batrack_linux::InstallPlan {
            binary: install.binary.clone(),
            config: install.config.clone(),
            user: install.user.clone(),
            home: install.home.clone(),
            data_dir: install.data_dir.clone(),
            unit_path: unit_path().to_path_buf(),
        };
        Ok(batrack_linux::systemd::install(&plan, start_now)?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (install, start_now);
        Err(Error::platform("systemd services require Linux"))
    }
}

/// Stop, disable and remove the systemd service.
///
/// # Errors
///
/// Returns an error if systemd refuses.
pub fn uninstall_service() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        Ok(batrack_linux::systemd::uninstall(unit_path())?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform("systemd services require Linux"))
    }
}

/// Start the systemd service.
///
/// # Errors
///
/// Returns an error if the service is not installed or fails to start.
pub fn start_service() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        Ok(batrack_linux::systemd::start(unit_path())?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform("systemd services require Linux"))
    }
}

/// Stop the systemd service.
///
/// # Errors
///
/// Returns an error if the service is not installed or fails to stop.
pub fn stop_service() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        Ok(batrack_linux::systemd::stop(unit_path())?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::platform("systemd services require Linux"))
    }
}

/// State of the systemd service, e.g. `active` or `not installed`.
///
/// # Errors
///
/// Returns an error if `systemctl` cannot be run.
pub fn service_state() -> Result<String> {
    #[cfg(target_os = "linux")]
    {
        Ok(batrack_linux::systemd::state(unit_path())?.to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok("unsupported".to_string())
    }
}

/// Show the service journal.
///
/// # Errors
///
/// Returns an error if `journalctl` fails.
pub fn service_logs(follow: bool) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        Ok(batrack_linux::systemd::logs(follow)?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = follow;
        Err(Error::platform("the service journal requires Linux"))
    }
}
