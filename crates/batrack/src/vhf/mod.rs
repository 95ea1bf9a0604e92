//! Radio-tag (VHF) unit.
//!
//! Subscribes to the matched signals of a radio tracking station and sets the
//! trigger whenever a monitored tag shows up or moves. The trigger is held
//! for `untrigger_duration_s` after the last qualifying signal.

pub mod classifier;
pub mod signal;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Packet, QoS};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{MqttConfig, VhfConfig};
use crate::error::{Error, Result};
use crate::mqtt;
use crate::unit::{message, report_trigger, AnalysisUnit, TriggerEvent, UnitKind, UnitState};

pub use classifier::{Classification, FrequencyBins};
pub use signal::MatchedSignal;

/// Interval of the untrigger check.
const UNTRIGGER_POLL: Duration = Duration::from_millis(100);

/// Classification state plus the untrigger deadline.
#[derive(Debug)]
pub struct SignalTracker {
    bins: FrequencyBins,
    untrigger_duration: Duration,
    untrigger_at: Option<Instant>,
}

impl SignalTracker {
    /// Create a tracker for the configured frequencies.
    #[must_use]
    pub fn new(config: &VhfConfig) -> Self {
        Self {
            bins: FrequencyBins::new(config),
            untrigger_duration: Duration::try_from_secs_f64(config.untrigger_duration_s)
                .unwrap_or_else(|_| {
                    warn!(
                        "untrigger_duration_s {} out of range, not holding the trigger",
                        config.untrigger_duration_s
                    );
                    Duration::ZERO
                }),
            untrigger_at: None,
        }
    }

    /// Handle one received message.
    ///
    /// Returns the trigger message if the signal qualifies.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be decoded.
    pub fn on_message(&mut self, topic: &str, payload: &[u8], now: Instant) -> Result<Option<Map<String, Value>>> {
        let signal = MatchedSignal::decode(topic, payload)?;
        debug!("Received {:?}", signal);

        let classification = self.bins.classify(&signal);
        let Some(count) = classification.count() else {
            return Ok(None);
        };

        self.untrigger_at = Some(now.checked_add(self.untrigger_duration).unwrap_or(now));
        Ok(Some(message([
            ("VHF Frequency", json!(signal.frequency_hz)),
            ("VHF Power (dBW)", json!(signal.power_dbw())),
            ("VHF Signals", json!(count)),
        ])))
    }

    /// Whether the hold time after the last qualifying signal has passed.
    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.untrigger_at.map_or(true, |at| now >= at)
    }
}

/// MQTT-driven analysis unit.
#[derive(Debug)]
pub struct VhfAnalysisUnit {
    config: VhfConfig,
    mqtt: MqttConfig,
    client_id: String,
    state: Arc<UnitState>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl VhfAnalysisUnit {
    /// Create the unit; the MQTT client id is `<host>-batrack-client`.
    #[must_use]
    pub fn new(config: VhfConfig, mqtt: MqttConfig, use_trigger: bool, host: &str) -> Self {
        Self {
            config,
            mqtt,
            client_id: format!("{host}-batrack-client"),
            state: UnitState::new(UnitKind::Vhf, use_trigger),
            stop_tx: None,
            task: None,
        }
    }

    /// MQTT client id used by the unit.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

struct SignalLoop {
    topic: String,
    state: Arc<UnitState>,
    events: mpsc::Sender<TriggerEvent>,
    tracker: SignalTracker,
}

impl SignalLoop {
    async fn run(mut self, client: AsyncClient, mut eventloop: rumqttc::EventLoop, mut stop_rx: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(UNTRIGGER_POLL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = poll.tick() => {
                    if self.state.trigger() && self.tracker.expired(Instant::now()) {
                        report_trigger(&self.state, &self.events, false, Map::new()).await;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("MQTT connection established ({:?})", ack.code);
                        // persistent session, but the broker may have dropped it
                        match client.try_subscribe(self.topic.as_str(), QoS::AtMostOnce) {
                            Ok(()) => info!("Subscribed to {}", self.topic),
                            Err(e) => error!("Subscribing to {} failed: {}", self.topic, e),
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match self.tracker.on_message(&publish.topic, &publish.payload, Instant::now()) {
                            Ok(Some(msg)) => report_trigger(&self.state, &self.events, true, msg).await,
                            Ok(None) => {}
                            Err(e) => warn!("Discarding message on {}: {}", publish.topic, e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(mqtt::RECONNECT_DELAY).await;
                    }
                }
            }
        }

        mqtt::disconnect(&client, &mut eventloop).await;
    }
}

#[async_trait]
impl AnalysisUnit for VhfAnalysisUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Vhf
    }

    fn state(&self) -> &Arc<UnitState> {
        &self.state
    }

    async fn start(&mut self, events: mpsc::Sender<TriggerEvent>) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::unit_start(UnitKind::Vhf, "VHF unit was already started"));
        }

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.mqtt.host, self.mqtt.port, self.client_id
        );
        let (client, eventloop) = AsyncClient::new(
            mqtt::options(&self.client_id, &self.mqtt, false),
            mqtt::REQUEST_CAPACITY,
        );
        let (stop_tx, stop_rx) = watch::channel(false);

        let signal_loop = SignalLoop {
            topic: self.config.topic.clone(),
            state: Arc::clone(&self.state),
            events,
            tracker: SignalTracker::new(&self.config),
        };
        let state = Arc::clone(&self.state);

        self.state.mark_started();
        self.task = Some(tokio::spawn(async move {
            signal_loop.run(client, eventloop, stop_rx).await;
            state.mark_dead();
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    // the receiver records continuously
    async fn start_recording(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.state.mark_stopped();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("VHF task failed: {}", e);
            }
        }
        Ok(())
    }
}
