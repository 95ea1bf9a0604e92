//! GPIO output lines (light control).

use rppal::gpio::{Gpio, OutputPin};
use tracing::debug;

use crate::Result;

/// A GPIO pin configured as an active-high output.
#[derive(Debug)]
pub struct OutputLine {
    number: u8,
    pin: OutputPin,
}

impl OutputLine {
    /// Claim the given BCM pin as an output, initially low.
    ///
    /// # Errors
    ///
    /// Returns an error if the GPIO peripheral or the pin is unavailable.
    pub fn open(number: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(number)?.into_output_low();
        debug!("GPIO {} configured as output", number);
        Ok(Self { number, pin })
    }

    /// The BCM pin number.
    #[must_use]
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Drive the pin high.
    pub fn on(&mut self) {
        self.pin.set_high();
    }

    /// Drive the pin low.
    pub fn off(&mut self) {
        self.pin.set_low();
    }

    /// Whether the pin is currently driven high.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.pin.is_set_high()
    }
}
