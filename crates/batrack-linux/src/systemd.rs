//! systemd service management.
//!
//! Installs the recorder as a system service: a launch script in the service
//! user's home directory, a unit file under `/etc/systemd/system`, and the
//! data directory, followed by `daemon-reload`, `enable` and `start`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::{PlatformError, Result};

/// Name of the systemd unit.
pub const UNIT_NAME: &str = "batrack";

/// Default location of the unit file.
pub const UNIT_PATH: &str = "/etc/systemd/system/batrack.service";

/// File name of the launch script placed in the service user's home.
pub const LAUNCH_SCRIPT_NAME: &str = "batrack.sh";

/// State reported by `systemctl is-active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// The unit is running.
    Active,
    /// The unit is installed but stopped.
    Inactive,
    /// The unit is starting.
    Activating,
    /// The unit is stopping.
    Deactivating,
    /// The unit failed.
    Failed,
    /// The unit file does not exist.
    NotInstalled,
    /// Any other state string.
    Unknown(String),
}

impl ServiceState {
    /// Parse the output of `systemctl is-active`.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        match output.trim() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the service is running or about to run.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Active | Self::Activating)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Activating => write!(f, "activating"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Failed => write!(f, "failed"),
            Self::NotInstalled => write!(f, "not installed"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Everything needed to install the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Path of the `batrack` binary.
    pub binary: PathBuf,
    /// Configuration file passed to `batrack run`.
    pub config: PathBuf,
    /// User the service runs as.
    pub user: String,
    /// Home directory receiving the launch script.
    pub home: PathBuf,
    /// Data directory to create.
    pub data_dir: PathBuf,
    /// Path of the unit file.
    pub unit_path: PathBuf,
}

impl InstallPlan {
    /// Path of the launch script.
    #[must_use]
    pub fn launch_script_path(&self) -> PathBuf {
        self.home.join(LAUNCH_SCRIPT_NAME)
    }

    /// Render the launch script.
    #[must_use]
    pub fn launch_script(&self) -> String {
        format!(
            "#!/bin/sh\ncd \"{home}\"\nexec \"{binary}\" --config \"{config}\" run\n",
            home = self.home.display(),
            binary = self.binary.display(),
            config = self.config.display(),
        )
    }

    /// Render the unit file.
    #[must_use]
    pub fn unit_file(&self) -> String {
        format!(
            r"[Unit]
Description=BatRack sensor-triggered bat recorder
After=network-online.target mosquitto.service
Wants=network-online.target

[Service]
Type=simple
User={user}
WorkingDirectory={home}
ExecStart={script}
Restart=on-failure
RestartSec=10s
KillSignal=SIGINT
StandardOutput=journal
StandardError=journal
SyslogIdentifier={UNIT_NAME}

[Install]
WantedBy=multi-user.target
",
            user = self.user,
            home = self.home.display(),
            script = self.launch_script_path().display(),
        )
    }
}

fn systemctl(args: &[&str]) -> Result<()> {
    let status = Command::new("systemctl").args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandFailed {
            command: format!("systemctl {}", args.join(" ")),
            message: status.to_string(),
        })
    }
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Query the service state.
///
/// # Errors
///
/// Returns an error if `systemctl` cannot be executed.
pub fn state(unit_path: &Path) -> Result<ServiceState> {
    if !unit_path.exists() {
        return Ok(ServiceState::NotInstalled);
    }
    let output = Command::new("systemctl")
        .args(["is-active", UNIT_NAME])
        .output()?;
    Ok(ServiceState::parse(&String::from_utf8_lossy(&output.stdout)))
}

/// Install the service as described by `plan`.
///
/// # Errors
///
/// Returns an error if a file cannot be written or a systemctl verb fails.
pub fn install(plan: &InstallPlan, start_now: bool) -> Result<()> {
    write_executable(&plan.launch_script_path(), &plan.launch_script())?;
    write_executable(&plan.unit_path, &plan.unit_file())?;

    fs::create_dir_all(&plan.data_dir)?;
    info!("Data directory {}", plan.data_dir.display());

    let owner = format!("{0}:{0}", plan.user);
    match Command::new("chown")
        .arg("-R")
        .arg(&owner)
        .arg(&plan.data_dir)
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("chown {} {} failed: {}", owner, plan.data_dir.display(), status),
        Err(e) => warn!("chown {} {} failed: {}", owner, plan.data_dir.display(), e),
    }

    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", UNIT_NAME])?;
    info!("Service {} enabled", UNIT_NAME);

    if start_now {
        start(&plan.unit_path)?;
    }
    Ok(())
}

/// Stop, disable and remove the service.
///
/// # Errors
///
/// Returns an error if the unit file cannot be removed or daemon-reload fails.
pub fn uninstall(unit_path: &Path) -> Result<()> {
    if !unit_path.exists() {
        info!("Service not installed");
        return Ok(());
    }

    if state(unit_path)?.is_running() {
        systemctl(&["stop", UNIT_NAME])?;
    }
    if let Err(e) = systemctl(&["disable", UNIT_NAME]) {
        warn!("Failed to disable service: {}", e);
    }

    fs::remove_file(unit_path)?;
    systemctl(&["daemon-reload"])?;
    info!("Service {} removed", UNIT_NAME);
    Ok(())
}

/// Start the service if it is not already running.
///
/// # Errors
///
/// Returns an error if the service is not installed or fails to start.
pub fn start(unit_path: &Path) -> Result<()> {
    match state(unit_path)? {
        ServiceState::NotInstalled => Err(PlatformError::NotInstalled(
            unit_path.display().to_string(),
        )),
        ServiceState::Active => {
            info!("Service already running");
            Ok(())
        }
        _ => systemctl(&["start", UNIT_NAME]),
    }
}

/// Stop the service if it is running.
///
/// # Errors
///
/// Returns an error if the service is not installed or fails to stop.
pub fn stop(unit_path: &Path) -> Result<()> {
    match state(unit_path)? {
        ServiceState::NotInstalled => Err(PlatformError::NotInstalled(
            unit_path.display().to_string(),
        )),
        ServiceState::Inactive => {
            info!("Service already stopped");
            Ok(())
        }
        _ => systemctl(&["stop", UNIT_NAME]),
    }
}

/// Show the service journal, optionally following it.
///
/// # Errors
///
/// Returns an error if `journalctl` cannot be executed.
pub fn logs(follow: bool) -> Result<()> {
    let mut cmd = Command::new("journalctl");
    cmd.args(["-u", UNIT_NAME]);
    if follow {
        cmd.arg("-f");
    }
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandFailed {
            command: format!("journalctl -u {UNIT_NAME}"),
            message: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> InstallPlan {
        InstallPlan {
            binary: PathBuf::from("/usr/local/bin/batrack"),
            config: PathBuf::from("/home/pi/batrack.toml"),
            user: "pi".to_string(),
            home: PathBuf::from("/home/pi"),
            data_dir: PathBuf::from("/data"),
            unit_path: PathBuf::from(UNIT_PATH),
        }
    }

    #[test]
    fn test_service_state_parse() {
        assert_eq!(ServiceState::parse("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::parse("inactive"), ServiceState::Inactive);
        assert_eq!(ServiceState::parse("failed"), ServiceState::Failed);
        assert_eq!(
            ServiceState::parse("reloading"),
            ServiceState::Unknown("reloading".to_string())
        );
    }

    #[test]
    fn test_service_state_is_running() {
        assert!(ServiceState::Active.is_running());
        assert!(ServiceState::Activating.is_running());
        assert!(!ServiceState::Failed.is_running());
        assert!(!ServiceState::NotInstalled.is_running());
    }

    #[test]
    fn test_launch_script() {
        let plan = plan();
        assert_eq!(plan.launch_script_path(), PathBuf::from("/home/pi/batrack.sh"));
        let script = plan.launch_script();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("exec \"/usr/local/bin/batrack\" --config \"/home/pi/batrack.toml\" run"));
    }

    #[test]
    fn test_unit_file() {
        let unit = plan().unit_file();
        assert!(unit.contains("ExecStart=/home/pi/batrack.sh"));
        assert!(unit.contains("User=pi"));
        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("SyslogIdentifier=batrack"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn test_state_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("batrack.service");
        assert_eq!(state(&missing).unwrap(), ServiceState::NotInstalled);
    }

    #[test]
    fn test_write_executable_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batrack.sh");
        write_executable(&path, "#!/bin/sh\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_uninstall_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(uninstall(&dir.path().join("batrack.service")).is_ok());
    }
}
