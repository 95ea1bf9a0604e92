//! Analysis unit abstraction.
//!
//! An analysis unit is a sensor (VHF receiver, microphone, camera) that runs
//! in its own task, reports trigger changes to the rack, and can be asked to
//! start or stop recording.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::Result;

/// The sensors a rack can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Radio-tag receiver fed by MQTT.
    Vhf,
    /// Ultrasonic microphone.
    Audio,
    /// Camera with light.
    Camera,
}

impl UnitKind {
    /// Name used in MQTT topics, trigger logs and status reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vhf => "VHFAnalysisUnit",
            Self::Audio => "AudioAnalysisUnit",
            Self::Camera => "CameraAnalysisUnit",
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a trigger event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// The rack itself (initial evaluation).
    Rack,
    /// An analysis unit.
    Unit(UnitKind),
}

impl EventSource {
    /// Name used in MQTT topics and trigger logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rack => "BatRack",
            Self::Unit(kind) => kind.name(),
        }
    }

    /// Parse a name produced by [`EventSource::name`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BatRack" => Some(Self::Rack),
            "VHFAnalysisUnit" => Some(Self::Unit(UnitKind::Vhf)),
            "AudioAnalysisUnit" => Some(Self::Unit(UnitKind::Audio)),
            "CameraAnalysisUnit" => Some(Self::Unit(UnitKind::Camera)),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A change of a trigger, with the measurements that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// When the change happened.
    pub timestamp: DateTime<Local>,
    /// Who raised it.
    pub source: EventSource,
    /// The new trigger value.
    pub trigger: bool,
    /// Measurements explaining the change.
    pub message: Map<String, Value>,
}

impl TriggerEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(source: EventSource, trigger: bool, message: Map<String, Value>) -> Self {
        Self {
            timestamp: Local::now(),
            source,
            trigger,
            message,
        }
    }

    /// Trigger value as spelled in topics and logs.
    #[must_use]
    pub fn trigger_str(&self) -> &'static str {
        if self.trigger {
            "True"
        } else {
            "False"
        }
    }

    /// The message as a JSON string.
    #[must_use]
    pub fn message_json(&self) -> String {
        Value::Object(self.message.clone()).to_string()
    }
}

/// Build a JSON message map from key/value pairs.
#[must_use]
pub fn message<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Snapshot of a unit's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    /// The unit was started and not yet stopped.
    pub running: bool,
    /// The unit's task is still executing.
    pub alive: bool,
    /// The unit is recording.
    pub recording: bool,
    /// The unit's trigger counts towards the system trigger.
    pub use_trigger: bool,
    /// The unit's current trigger.
    pub trigger: bool,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flag = |b: bool| if b { '1' } else { '0' };
        write!(
            f,
            "running: {}, alive: {}, recording: {}, use_trigger: {}, trigger: {}",
            flag(self.running),
            flag(self.alive),
            flag(self.recording),
            flag(self.use_trigger),
            flag(self.trigger)
        )
    }
}

/// Flags shared between a unit, its task and the rack.
#[derive(Debug)]
pub struct UnitState {
    kind: UnitKind,
    use_trigger: bool,
    running: AtomicBool,
    alive: AtomicBool,
    recording: AtomicBool,
    trigger: AtomicBool,
}

impl UnitState {
    /// Create the state of a stopped unit.
    #[must_use]
    pub fn new(kind: UnitKind, use_trigger: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            use_trigger,
            running: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            trigger: AtomicBool::new(false),
        })
    }

    /// The unit this state belongs to.
    #[must_use]
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Whether the unit's trigger counts towards the system trigger.
    #[must_use]
    pub fn use_trigger(&self) -> bool {
        self.use_trigger
    }

    /// Whether the unit was started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the unit's task is still executing.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether the unit is recording.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// The unit's current trigger.
    #[must_use]
    pub fn trigger(&self) -> bool {
        self.trigger.load(Ordering::SeqCst)
    }

    /// Mark the unit as started and its task as executing.
    pub fn mark_started(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Mark the unit as stopped on request.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Mark the unit's task as finished.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Record whether the unit is recording.
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    /// Set the trigger and report the change.
    ///
    /// Returns the event to deliver, or `None` if the trigger did not change.
    pub fn set_trigger(&self, trigger: bool, message: Map<String, Value>) -> Option<TriggerEvent> {
        if self.trigger.swap(trigger, Ordering::SeqCst) == trigger {
            return None;
        }
        let event = TriggerEvent::new(EventSource::Unit(self.kind), trigger, message);
        info!(
            "setting {} trigger {}: {}",
            self.kind,
            event.trigger_str(),
            event.message_json()
        );
        Some(event)
    }

    /// Take a snapshot of all flags.
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        UnitStatus {
            running: self.is_running(),
            alive: self.is_alive(),
            recording: self.is_recording(),
            use_trigger: self.use_trigger,
            trigger: self.trigger(),
        }
    }
}

/// Set a unit trigger and forward the change to the rack.
pub async fn report_trigger(
    state: &UnitState,
    events: &mpsc::Sender<TriggerEvent>,
    trigger: bool,
    message: Map<String, Value>,
) {
    if let Some(event) = state.set_trigger(trigger, message) {
        if events.send(event).await.is_err() {
            tracing::debug!("Rack event channel closed");
        }
    }
}

/// A sensor the rack can drive.
#[async_trait::async_trait]
pub trait AnalysisUnit: Send + Sync + std::fmt::Debug {
    /// Which sensor this is.
    fn kind(&self) -> UnitKind;

    /// Shared state flags.
    fn state(&self) -> &Arc<UnitState>;

    /// Start the unit's task; trigger changes are sent through `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sensor cannot be opened.
    async fn start(&mut self, events: mpsc::Sender<TriggerEvent>) -> Result<()>;

    /// Start recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the recording cannot be started.
    async fn start_recording(&mut self) -> Result<()>;

    /// Stop recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the recording cannot be stopped cleanly.
    async fn stop_recording(&mut self) -> Result<()>;

    /// Stop recording, then stop and join the unit's task.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit cannot be stopped cleanly.
    async fn stop(&mut self) -> Result<()>;

    /// Current status flags.
    fn status(&self) -> UnitStatus {
        self.state().status()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{AnalysisUnit, TriggerEvent, UnitKind, UnitState};
    use crate::error::Result;

    /// A unit driven by the test through its state.
    #[derive(Debug)]
    pub(crate) struct FakeUnit {
        pub(crate) kind: UnitKind,
        pub(crate) state: Arc<UnitState>,
        pub(crate) recordings: Arc<AtomicUsize>,
        dies: bool,
    }

    impl FakeUnit {
        pub(crate) fn new(kind: UnitKind, use_trigger: bool) -> Self {
            Self {
                kind,
                state: UnitState::new(kind, use_trigger),
                recordings: Arc::new(AtomicUsize::new(0)),
                dies: false,
            }
        }

        /// A unit whose task ends right after starting.
        pub(crate) fn dying(kind: UnitKind) -> Self {
            Self {
                dies: true,
                ..Self::new(kind, false)
            }
        }
    }

    #[async_trait]
    impl AnalysisUnit for FakeUnit {
        fn kind(&self) -> UnitKind {
            self.kind
        }

        fn state(&self) -> &Arc<UnitState> {
            &self.state
        }

        async fn start(&mut self, _events: mpsc::Sender<TriggerEvent>) -> Result<()> {
            self.state.mark_started();
            if self.dies {
                self.state.mark_dead();
            }
            Ok(())
        }

        async fn start_recording(&mut self) -> Result<()> {
            self.recordings.fetch_add(1, Ordering::SeqCst);
            self.state.set_recording(true);
            Ok(())
        }

        async fn stop_recording(&mut self) -> Result<()> {
            self.state.set_recording(false);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.state.set_recording(false);
            self.state.mark_stopped();
            self.state.mark_dead();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_kind_names() {
        assert_eq!(UnitKind::Vhf.to_string(), "VHFAnalysisUnit");
        assert_eq!(UnitKind::Audio.to_string(), "AudioAnalysisUnit");
        assert_eq!(UnitKind::Camera.to_string(), "CameraAnalysisUnit");
    }

    #[test]
    fn test_event_source_round_trip_names() {
        for source in [
            EventSource::Rack,
            EventSource::Unit(UnitKind::Vhf),
            EventSource::Unit(UnitKind::Audio),
            EventSource::Unit(UnitKind::Camera),
        ] {
            assert_eq!(EventSource::from_name(source.name()), Some(source));
        }
        assert_eq!(EventSource::from_name("Unknown"), None);
    }

    #[test]
    fn test_set_trigger_only_on_change() {
        let state = UnitState::new(UnitKind::Audio, true);

        assert!(state.set_trigger(false, Map::new()).is_none());

        let event = state
            .set_trigger(true, message([("Pings", json!(2))]))
            .unwrap();
        assert!(event.trigger);
        assert_eq!(event.source, EventSource::Unit(UnitKind::Audio));
        assert_eq!(event.message_json(), r#"{"Pings":2}"#);

        assert!(state.set_trigger(true, Map::new()).is_none());
        assert!(state.trigger());

        assert!(state.set_trigger(false, Map::new()).is_some());
        assert!(!state.trigger());
    }

    #[test]
    fn test_unit_state_lifecycle() {
        let state = UnitState::new(UnitKind::Camera, false);
        assert!(!state.is_running());
        assert!(!state.is_alive());

        state.mark_started();
        assert!(state.is_running());
        assert!(state.is_alive());

        state.mark_dead();
        assert!(state.is_running());
        assert!(!state.is_alive());

        state.mark_stopped();
        assert!(!state.is_running());
    }

    #[test]
    fn test_status_display() {
        let state = UnitState::new(UnitKind::Vhf, true);
        state.mark_started();
        state.set_recording(true);
        assert_eq!(
            state.status().to_string(),
            "running: 1, alive: 1, recording: 1, use_trigger: 1, trigger: 0"
        );
    }

    #[test]
    fn test_trigger_str() {
        let event = TriggerEvent::new(EventSource::Rack, false, Map::new());
        assert_eq!(event.trigger_str(), "False");
        assert_eq!(event.message_json(), "{}");
    }

    #[test]
    fn test_message_keeps_key_order() {
        let event = TriggerEvent::new(
            EventSource::Unit(UnitKind::Audio),
            true,
            message([
                ("Pings", json!(4)),
                ("Ping Frequency", json!(42_000)),
                ("Ping Power", json!(31.5)),
            ]),
        );
        assert_eq!(
            event.message_json(),
            r#"{"Pings":4,"Ping Frequency":42000,"Ping Power":31.5}"#
        );
    }

    #[tokio::test]
    async fn test_report_trigger_sends_once() {
        let state = UnitState::new(UnitKind::Vhf, true);
        let (tx, mut rx) = mpsc::channel(4);

        report_trigger(&state, &tx, true, Map::new()).await;
        report_trigger(&state, &tx, true, Map::new()).await;
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert!(first.trigger);
        assert!(rx.recv().await.is_none());
    }
}
