//! USB hub power control via `uhubctl`.

use tokio::process::Command;
use tracing::warn;

use crate::{PlatformError, Result};

/// Arguments for power cycling one port of a hub.
#[must_use]
pub fn power_cycle_args(location: &str, port: u8) -> Vec<String> {
    vec![
        "uhubctl".to_string(),
        "-a".to_string(),
        "cycle".to_string(),
        "-p".to_string(),
        port.to_string(),
        "-l".to_string(),
        location.to_string(),
    ]
}

/// Power cycle a USB hub port, used to revive a stalled microphone.
///
/// # Errors
///
/// Returns an error if `uhubctl` cannot be run or exits unsuccessfully.
pub async fn power_cycle_hub(location: &str, port: u8) -> Result<()> {
    let args = power_cycle_args(location, port);
    warn!("Power cycling USB hub {} port {}", location, port);

    let output = Command::new("sudo").args(&args).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandFailed {
            command: format!("sudo {}", args.join(" ")),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
