//! System trigger evaluation.
//!
//! The system trigger is set when the rack is configured as always on, or
//! when any unit that is allowed to trigger currently reports a trigger.

use crate::unit::UnitStatus;

/// A change of the system trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The system became triggered; recordings start.
    Started,
    /// The system became untriggered; recordings stop.
    Stopped,
    /// Nothing changed.
    Unchanged,
}

/// Compute the system trigger from the unit states.
#[must_use]
pub fn system_trigger<'a>(always_on: bool, units: impl IntoIterator<Item = &'a UnitStatus>) -> bool {
    always_on || units.into_iter().any(|u| u.use_trigger && u.trigger)
}

/// Remembers the last system trigger and reports transitions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemTrigger {
    triggered: bool,
}

impl SystemTrigger {
    /// Create an untriggered system trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the system is currently triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Apply a freshly evaluated trigger.
    pub fn update(&mut self, triggered: bool) -> Transition {
        if triggered == self.triggered {
            return Transition::Unchanged;
        }
        self.triggered = triggered;
        if triggered {
            Transition::Started
        } else {
            Transition::Stopped
        }
    }
}
