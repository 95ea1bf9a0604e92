//! Linux and Raspberry Pi platform layer for batrack.
//!
//! This crate wraps the operating-system facilities the recorder needs on a
//! field station: ALSA capture through `arecord`, GPIO output pins, USB hub
//! power cycling through `uhubctl`, and systemd service management.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod arecord;
pub mod gpio;
pub mod systemd;
pub mod usb;

use thiserror::Error;

pub use arecord::{
    list_capture_devices, parse_device_list, select_input_device, CaptureDevice, CaptureStream,
};
pub use gpio::OutputLine;
pub use systemd::{InstallPlan, ServiceState};
pub use usb::power_cycle_hub;

/// Errors raised by the platform layer.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// File system or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// GPIO access failed.
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {message}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Exit status or captured stderr.
        message: String,
    },

    /// The systemd unit is not installed.
    #[error("service is not installed (missing {0})")]
    NotInstalled(String),
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Get platform name.
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}

/// Return the station's hostname.
///
/// Reads the kernel hostname, falling back to `$HOSTNAME` and finally to
/// `localhost`.
#[must_use]
pub fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        assert_eq!(platform_name(), "Linux");
    }

    #[test]
    fn test_hostname_not_empty() {
        let name = hostname();
        assert!(!name.is_empty());
        assert!(!name.contains('\n'));
    }

    #[test]
    fn test_command_failed_display() {
        let err = PlatformError::CommandFailed {
            command: "systemctl start batrack".to_string(),
            message: "exit status: 5".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("systemctl start batrack"));
        assert!(msg.contains("exit status: 5"));
    }

    #[test]
    fn test_not_installed_display() {
        let err = PlatformError::NotInstalled("/etc/systemd/system/batrack.service".to_string());
        assert!(err.to_string().contains("not installed"));
    }
}
