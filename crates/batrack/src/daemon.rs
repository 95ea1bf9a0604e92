//! The foreground recorder process.
//!
//! Runs one rack at a time: the scheduled run active right now, or the
//! continuous run when no runs are configured. Waits are capped at
//! [`RECHECK`] and the wall clock is read again after each one, so a clock
//! set late at boot or a DST change moves runs as expected.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::config::{Config, RunSettings};
use crate::error::Result;
use crate::rack::BatRack;
use crate::schedule::{RunWindow, Schedule};

/// Longest single wait before the wall clock is read again.
pub const RECHECK: Duration = Duration::from_secs(1);

/// Wait used when no next start can be computed.
const IDLE_RETRY: Duration = Duration::from_secs(60);

/// Why a rack stopped.
enum Outcome {
    Shutdown,
    Finished,
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

fn until(now: &DateTime<Local>, deadline: &DateTime<Local>) -> Duration {
    (*deadline - *now).to_std().unwrap_or(Duration::ZERO)
}

/// Run racks according to the schedule until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if a rack cannot be set up or a unit dies; the process
/// should then exit non-zero so that it gets restarted.
pub async fn run(config: &Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    run_with(
        config,
        Local::now,
        move |settings| BatRack::new(config, settings),
        shutdown,
    )
    .await
}

/// Run racks built by `build`, reading the time of day from `clock`.
///
/// # Errors
///
/// Returns an error if the schedule is invalid, `build` fails or a unit dies.
pub async fn run_with<C, B, Fut>(
    config: &Config,
    clock: C,
    mut build: B,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    C: Fn() -> DateTime<Local>,
    B: FnMut(RunSettings) -> Fut,
    Fut: Future<Output = Result<BatRack>>,
{
    tokio::pin!(shutdown);
    let schedule = Schedule::from_runs(&config.runs)?;

    if schedule.is_empty() {
        info!("No runs scheduled, running continuously");
        run_rack(config, None, &clock, &mut build, &mut shutdown).await?;
        return Ok(());
    }

    let mut waiting_for = None;
    loop {
        let now = clock();
        if let Some(window) = schedule.active_at(now.time()) {
            waiting_for = None;
            match run_rack(config, Some(window), &clock, &mut build, &mut shutdown).await? {
                Outcome::Shutdown => return Ok(()),
                Outcome::Finished => continue,
            }
        }

        let wait = match schedule.next_start_after(&now) {
            Some((next, at)) => {
                if waiting_for != Some(at) {
                    info!("Waiting for [{}] starting at {}", next.name, at.format("%Y-%m-%d %H:%M:%S"));
                    waiting_for = Some(at);
                }
                until(&now, &at).min(RECHECK)
            }
            None => {
                warn!("No upcoming run found, retrying in {:?}", IDLE_RETRY);
                IDLE_RETRY
            }
        };

        tokio::select! {
            () = &mut shutdown => return Ok(()),
            () = tokio::time::sleep(wait) => {}
        }
    }
}

/// Sleep until `window` has ended by the clock, checking every [`RECHECK`].
async fn window_end<C: Fn() -> DateTime<Local>>(window: &RunWindow, clock: &C) {
    let started = clock();
    let deadline = Schedule::stop_deadline(window, &started);
    if let Some(deadline) = &deadline {
        info!("[{}] runs until {}", window.name, deadline.format("%Y-%m-%d %H:%M:%S"));
    }
    loop {
        let now = clock();
        let passed = deadline.as_ref().is_some_and(|d| now >= *d);
        if passed || !window.contains(now.time()) {
            return;
        }
        let wait = deadline.as_ref().map_or(RECHECK, |d| until(&now, d).min(RECHECK));
        tokio::time::sleep(wait).await;
    }
}

async fn run_rack<C, B, Fut, F>(
    config: &Config,
    window: Option<&RunWindow>,
    clock: &C,
    build: &mut B,
    shutdown: &mut std::pin::Pin<&mut F>,
) -> Result<Outcome>
where
    C: Fn() -> DateTime<Local>,
    B: FnMut(RunSettings) -> Fut,
    Fut: Future<Output = Result<BatRack>>,
    F: Future<Output = ()>,
{
    let run = window.and_then(|w| config.runs.iter().find(|r| r.name == w.name));
    let settings = config.run_settings(run);
    info!("Starting BatRack [{}]", settings.name);

    let mut rack = build(settings).await?;
    if let Err(e) = rack.start().await {
        error!("Starting [{}] failed: {}", rack.name(), e);
        rack.stop().await;
        return Err(e);
    }

    let stop_at = async {
        match window {
            Some(window) => window_end(window, clock).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        () = shutdown.as_mut() => Ok(Outcome::Shutdown),
        result = rack.run_until(stop_at) => result.map(|()| Outcome::Finished),
    };

    rack.stop().await;
    outcome
}
