//! `batrack` - A sensor-triggered bat activity recorder
//!
//! This library provides the analysis units (VHF radio tags, ultrasonic
//! audio, camera), the rack combining their triggers into recordings, the
//! daily run schedule and the event store of a field station.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod audio;
pub mod camera;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod mqtt;
pub mod platform;
pub mod rack;
pub mod schedule;
pub mod storage;
pub mod trigger;
pub mod trigger_log;
pub mod unit;
pub mod vhf;

pub use config::{Config, RunSettings};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use rack::BatRack;
pub use schedule::{RunWindow, Schedule};
pub use storage::{Storage, StorageStats, StoredEvent};
pub use unit::{AnalysisUnit, EventSource, TriggerEvent, UnitKind, UnitStatus};
