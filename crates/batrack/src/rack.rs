//! The rack: units, system trigger and event sinks of one run.
//!
//! Units report trigger changes through a channel. For each change the rack
//! publishes an MQTT message, appends a row to the run's CSV log, stores the
//! event and re-evaluates the system trigger, starting or stopping the
//! recordings of all units on a transition.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::Map;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::AudioAnalysisUnit;
use crate::camera::CameraAnalysisUnit;
use crate::config::{Config, RunSettings};
use crate::error::{Error, Result};
use crate::mqtt::Publisher;
use crate::platform;
use crate::storage::Storage;
use crate::trigger::{system_trigger, SystemTrigger, Transition};
use crate::trigger_log::TriggerLog;
use crate::unit::{AnalysisUnit, EventSource, TriggerEvent, UnitStatus};
use crate::vhf::VhfAnalysisUnit;

/// Trigger changes buffered between the units and the rack.
const EVENT_QUEUE: usize = 64;

/// Where a rack sends its trigger events.
#[derive(Debug)]
pub struct EventSinks {
    /// MQTT publisher, `None` to skip publishing.
    pub publisher: Option<Publisher>,
    /// Per-run CSV log.
    pub trigger_log: TriggerLog,
    /// Event store, `None` to skip storing.
    pub storage: Option<Storage>,
}

/// One scheduled run of the recorder.
#[derive(Debug)]
pub struct BatRack {
    settings: RunSettings,
    host: String,
    data_path: PathBuf,
    units: Vec<Box<dyn AnalysisUnit>>,
    sinks: EventSinks,
    events_tx: mpsc::Sender<TriggerEvent>,
    events_rx: mpsc::Receiver<TriggerEvent>,
    system: SystemTrigger,
}

/// Directory a rack writes to: `<data_path>/<host>/batrack`.
#[must_use]
pub fn rack_data_path(data_path: &Path, host: &str) -> PathBuf {
    data_path.join(host).join("batrack")
}

impl BatRack {
    /// Build a rack for `settings`, connecting to the broker and opening
    /// every enabled unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, trigger log, event store or
    /// any enabled unit cannot be set up.
    pub async fn new(config: &Config, settings: RunSettings) -> Result<Self> {
        let host = platform::hostname();
        let data_path = rack_data_path(&settings.data_path, &host);
        std::fs::create_dir_all(&data_path).map_err(|source| Error::DirectoryCreate {
            path: data_path.clone(),
            source,
        })?;
        debug!("Data path: {}", data_path.display());

        let trigger_log = TriggerLog::create(&data_path, &host, Local::now(), &settings.name)?;
        let storage = Storage::open(config.database_path())?;
        if config.storage.max_age_days > 0 {
            let max_age = chrono::Duration::days(i64::from(config.storage.max_age_days));
            storage.prune_older_than(max_age)?;
        }
        let publisher = Publisher::connect(&format!("{host}-batrack"), &config.mqtt);

        let mut units: Vec<Box<dyn AnalysisUnit>> = Vec::new();
        if settings.use_vhf {
            units.push(Box::new(VhfAnalysisUnit::new(
                config.vhf.clone(),
                config.mqtt.clone(),
                settings.use_trigger_vhf,
                &host,
            )));
        }
        if settings.use_audio {
            units.push(Box::new(
                AudioAnalysisUnit::open(
                    config.audio.clone(),
                    settings.use_trigger_audio,
                    data_path.clone(),
                    host.clone(),
                )
                .await?,
            ));
        }
        if settings.use_camera {
            units.push(Box::new(CameraAnalysisUnit::open(
                config.camera.clone(),
                settings.use_trigger_camera,
            )?));
        }

        let sinks = EventSinks {
            publisher: Some(publisher),
            trigger_log,
            storage: Some(storage),
        };
        Ok(Self::with_units(settings, host, data_path, units, sinks))
    }

    /// Assemble a rack from already built parts.
    #[must_use]
    pub fn with_units(
        settings: RunSettings,
        host: String,
        data_path: PathBuf,
        units: Vec<Box<dyn AnalysisUnit>>,
        sinks: EventSinks,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            settings,
            host,
            data_path,
            units,
            sinks,
            events_tx,
            events_rx,
            system: SystemTrigger::new(),
        }
    }

    /// Name of the run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Directory recordings and logs go to.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Whether the system is currently triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.system.is_triggered()
    }

    /// Status of every unit.
    #[must_use]
    pub fn unit_statuses(&self) -> Vec<(String, UnitStatus)> {
        self.units
            .iter()
            .map(|u| (u.kind().to_string(), u.status()))
            .collect()
    }

    /// Start all units and perform the initial trigger evaluation.
    ///
    /// # Errors
    ///
    /// Returns an error if a unit fails to start.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting [{}] with {} units", self.settings.name, self.units.len());
        for unit in &mut self.units {
            unit.start(self.events_tx.clone()).await?;
        }

        // also starts recordings when no trigger is used at all
        self.handle_event(TriggerEvent::new(EventSource::Rack, false, Map::new()))
            .await;
        Ok(())
    }

    /// Deliver one trigger change to all sinks and re-evaluate.
    pub async fn handle_event(&mut self, event: TriggerEvent) {
        let message = event.message_json();

        if let Some(publisher) = &self.sinks.publisher {
            let topic = format!(
                "{}/batrack/{}/{}",
                self.host,
                event.source.name(),
                event.trigger_str()
            );
            debug!("mqtt publish {}: {}", topic, message);
            if let Err(e) = publisher.publish(&topic, message) {
                warn!("Publishing trigger event failed: {}", e);
            }
        }

        if let Err(e) = self.sinks.trigger_log.append(&event) {
            error!("Writing trigger log failed: {}", e);
        }

        if let Some(storage) = &self.sinks.storage {
            if let Err(e) = storage.insert(&self.settings.name, &event) {
                error!("Storing trigger event failed: {}", e);
            }
        }

        self.evaluate().await;
    }

    async fn evaluate(&mut self) {
        let statuses: Vec<UnitStatus> = self.units.iter().map(|u| u.status()).collect();
        let triggered = system_trigger(self.settings.always_on, &statuses);
        debug!("trigger evaluation, current state: {}", triggered);

        match self.system.update(triggered) {
            Transition::Started => {
                info!("System triggered, starting recordings");
                for unit in &mut self.units {
                    if let Err(e) = unit.start_recording().await {
                        error!("{}: starting recording failed: {}", unit.kind(), e);
                    }
                }
            }
            Transition::Stopped => {
                info!("System un-triggered, stopping recordings");
                for unit in &mut self.units {
                    if let Err(e) = unit.stop_recording().await {
                        error!("{}: stopping recording failed: {}", unit.kind(), e);
                    }
                }
            }
            Transition::Unchanged => {}
        }
    }

    /// Log every unit's status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnitDied`] if a unit is running but its task ended.
    pub fn supervise(&self) -> Result<()> {
        for unit in &self.units {
            let status = unit.status();
            info!("{}: {}", unit.kind(), status);
            if status.running && !status.alive {
                warn!("{} is not active, but should run; self-terminating", unit.kind());
                return Err(Error::UnitDied { kind: unit.kind() });
            }
        }
        Ok(())
    }

    /// Handle events and supervise the units until `shutdown` completes or a
    /// unit dies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnitDied`] if supervision fails.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut duty = tokio::time::interval(self.settings.duty_cycle);
        duty.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = &mut shutdown => return Ok(()),
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = duty.tick() => self.supervise()?,
            }
        }
    }

    /// Stop all units and disconnect from the broker.
    pub async fn stop(mut self) {
        info!("Stopping [{}] and respective sensor instances", self.settings.name);
        for unit in &mut self.units {
            if let Err(e) = unit.stop().await {
                error!("{}: stopping failed: {}", unit.kind(), e);
            }
        }
        info!("Finished cleaning [{}] sensors", self.settings.name);

        if let Some(publisher) = self.sinks.publisher.take() {
            publisher.disconnect().await;
        }
        info!("BatRack [{}] finished", self.settings.name);
    }
}
