//! Probe pin for FIQ latency measurement
//!
//! A single output line, driven only from the FIQ handler. Each delivered FIQ
//! produces one high-then-low pulse that a scope or logic analyzer can time
//! against the interrupt source.

use embedded_hal::digital::OutputPin;

use crate::fiq::FiqSafe;

/// Logic level
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    #[default]
    Low,
    High,
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        if val {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        matches!(level, Level::High)
    }
}

/// Output line owned by the FIQ handler.
pub struct ProbePin<P: OutputPin> {
    pin: P,
}

impl<P: OutputPin + FiqSafe> ProbePin<P> {
    /// The pin should already be driven low by whoever handed it over.
    #[inline]
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Drive high, then low.
    ///
    /// Pin errors are dropped: there is nobody to report them to at FIQ level.
    #[inline]
    pub fn pulse(&mut self) {
        let _ = self.pin.set_high();
        let _ = self.pin.set_low();
    }

    pub fn free(self) -> P {
        self.pin
    }
}
