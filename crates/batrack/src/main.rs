//! `batrack` - CLI for the bat recorder
//!
//! This binary runs the recorder in the foreground, manages its systemd
//! service and inspects recorded trigger events.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use batrack::cli::{Cli, Command, ConfigCommand, EventsCommand, ServiceCommand};
use batrack::logging::Verbosity;
use batrack::platform::{self, ServiceInstall};
use batrack::{daemon, init_logging, Config, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Flags win over the configured level
    let verbosity = cli
        .verbosity()
        .unwrap_or_else(|| configured_verbosity(cli.config.clone()));
    init_logging(verbosity);

    match cli.command {
        Command::Run => handle_run(cli.config).await,
        Command::Service(cmd) => handle_service(cli.config, cmd),
        Command::Status(cmd) => handle_status(cli.config, cmd.json),
        Command::Events(cmd) => handle_events(cli.config, &cmd),
        Command::Devices => handle_devices().await,
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn configured_verbosity(config_path: Option<PathBuf>) -> Verbosity {
    Config::load_from(config_path)
        .ok()
        .and_then(|c| c.batrack.log_level)
        .and_then(|level| Verbosity::from_level_name(&level))
        .unwrap_or_default()
}

fn load_config(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = config_path.unwrap_or_else(Config::default_config_path);
    Config::load_from(Some(path.clone()))
        .with_context(|| format!("loading configuration {}", path.display()))
}

async fn handle_run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("batrack {} on {}", env!("CARGO_PKG_VERSION"), platform::platform_name());

    daemon::run(&config, daemon::shutdown_signal())
        .await
        .context("recorder stopped")?;
    tracing::info!("batrack finished");
    Ok(())
}

fn handle_service(config_path: Option<PathBuf>, cmd: ServiceCommand) -> anyhow::Result<()> {
    match cmd {
        ServiceCommand::Install { user, home, start } => {
            let config_file = config_path.unwrap_or_else(Config::default_config_path);
            let config = load_config(Some(config_file.clone()))?;

            let uses_camera =
                config.batrack.use_camera || config.runs.iter().any(|r| r.use_camera == Some(true));
            if uses_camera && !config.camera.fifo_path.exists() {
                println!(
                    "Warning: camera FIFO {} is missing; install RPi Cam Web Interface first.",
                    config.camera.fifo_path.display()
                );
            }

            let binary = std::env::current_exe().context("locating the batrack binary")?;
            let config_file = std::fs::canonicalize(&config_file).unwrap_or(config_file);
            let home = home.unwrap_or_else(|| PathBuf::from("/home").join(&user));
            let install = ServiceInstall {
                binary,
                config: config_file,
                user,
                home,
                data_dir: config.data_path(),
            };
            platform::install_service(&install, start)?;
            println!("Service installed{}.", if start { " and started" } else { "" });
        }
        ServiceCommand::Uninstall => {
            platform::uninstall_service()?;
            println!("Service removed.");
        }
        ServiceCommand::Start => {
            platform::start_service()?;
            println!("Service started.");
        }
        ServiceCommand::Stop => {
            platform::stop_service()?;
            println!("Service stopped.");
        }
        ServiceCommand::Status => {
            println!("{}", platform::service_state()?);
        }
        ServiceCommand::Logs { follow } => platform::service_logs(follow)?,
    }
    Ok(())
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("opening event store {}", path.display()))
}

fn handle_status(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let service = platform::service_state()?;
    let stats = open_storage(&config)?.stats()?;

    if json {
        let status = serde_json::json!({
            "platform": platform::platform_name(),
            "hostname": platform::hostname(),
            "service": service,
            "database_path": config.database_path(),
            "events": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("batrack status");
    println!("--------------");
    println!("Platform:      {}", platform::platform_name());
    println!("Hostname:      {}", platform::hostname());
    println!("Service:       {service}");
    println!("Database:      {}", config.database_path().display());
    println!("Events:        {}", stats.total_events);
    for (source, count) in &stats.by_source {
        println!("  {source:<22} {count}");
    }
    if let (Some(oldest), Some(newest)) = (stats.oldest_event, stats.newest_event) {
        println!("Oldest:        {}", oldest.with_timezone(&chrono::Local));
        println!("Newest:        {}", newest.with_timezone(&chrono::Local));
    }
    println!("Size:          {} bytes", stats.db_size_bytes);
    Ok(())
}

fn handle_events(config_path: Option<PathBuf>, cmd: &EventsCommand) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let storage = open_storage(&config)?;
    let events = match &cmd.source {
        Some(source) => storage.by_source(source, cmd.last)?,
        None => storage.recent(cmd.last)?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No trigger events recorded.");
    }
    for event in events.iter().rev() {
        println!(
            "{}  {:<12} {:<20} {:<5} {}",
            event.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            event.run,
            event.source,
            if event.trigger { "True" } else { "False" },
            serde_json::Value::Object(event.message.clone())
        );
    }
    Ok(())
}

async fn handle_devices() -> anyhow::Result<()> {
    let devices = platform::capture_devices().await?;
    if devices.is_empty() {
        println!("No capture devices found.");
    }
    for device in devices {
        println!(
            "{} {:<10} {}",
            if device.selected { "*" } else { " " },
            device.alsa_name,
            device.description
        );
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    let rack = &config.batrack;
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[BatRack]");
    println!("  Data path:          {}", config.data_path().display());
    println!("  Duty cycle (s):     {}", rack.duty_cycle_s);
    println!(
        "  Units:              vhf={} audio={} camera={}",
        rack.use_vhf, rack.use_audio, rack.use_camera
    );
    println!(
        "  Triggers:           vhf={} audio={} camera={}",
        rack.use_trigger_vhf, rack.use_trigger_audio, rack.use_trigger_camera
    );
    println!("  Always on:          {}", rack.always_on);
    println!();
    println!("[MQTT]");
    println!("  Broker:             {}:{}", config.mqtt.host, config.mqtt.port);
    println!();
    println!("[Audio]");
    println!("  Threshold (dBFS):   {}", config.audio.threshold_dbfs);
    println!(
        "  Band (Hz):          {}-{}",
        config.audio.highpass_hz, config.audio.lowpass_hz
    );
    println!("  Sampling rate:      {}", config.audio.sampling_rate);
    println!();
    println!("[VHF]");
    println!("  Frequencies (MHz):  {:?}", config.vhf.sig_freqs_mhz);
    println!("  Threshold (dBW):    {}", config.vhf.sig_threshold_dbw);
    println!();
    println!("[Camera]");
    println!("  Light pin:          {}", config.camera.light_pin);
    println!("  FIFO:               {}", config.camera.fifo_path.display());
    println!();
    println!("[Storage]");
    println!("  Database path:      {}", config.database_path().display());
    println!();
    println!("[Runs]");
    if config.runs.is_empty() {
        println!("  (continuous)");
    }
    for run in &config.runs {
        println!("  {:<16} {} - {}", run.name, run.start, run.stop);
    }
}
