//! FIQ bridge for the SAMA5D2 Advanced Interrupt Controller (AIC5).
//!
//! One interrupt source is steered onto the core's nFIQ line. Its normal IRQ line
//! is claimed with a handler that never services anything, so the generic
//! dispatcher leaves it alone, and the FIQ entry pulses a probe pin and runs the
//! AIC acknowledge sequence.
//!
//! ```ignore
//! static BOARD: Board<ProbeOut> = Board::sama5d2(49, PROBE_OUT);
//! static STATS: FiqStats = FiqStats::new();
//! static mut SLOT: DeviceSlot<Board<ProbeOut>> = None;
//!
//! let slot = unsafe { &mut *core::ptr::addr_of_mut!(SLOT) };
//! let armed = sama5d2_fiq::init(&BOARD, slot, &STATS, Config::default())?;
//! ```
//!
//! Dropping the returned [`Armed`] masks FIQ, removes the entry and releases every
//! resource.

#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "arm")]
pub use arm9; // critical_section implementation for the single-core target

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod aic;

pub mod gpio;

pub mod fiq;

pub mod cpu;

pub mod binding;

pub mod board;

#[cfg(test)]
mod testing;

pub use crate::aic::{Route, SourceType};
pub use crate::binding::{activate, Armed, DeviceSlot, Error, Platform};
pub use crate::cpu::{CpuFiq, EntryBusy, FiqVector};
pub use crate::fiq::{FiqCounts, FiqStats};

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Source number ISR is expected to report on each FIQ. Anything else is
    /// counted in [`FiqStats`], never reported from the FIQ path.
    pub expected_source: u32,
    /// Source to steer onto nFIQ during activation, if the AIC is not already
    /// configured by earlier boot stages.
    pub route: Option<Route>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expected_source: aic::FIQ_SOURCE as u32,
            route: None,
        }
    }
}

/// Activate the device on this core's FIQ path.
///
/// This should only be called once per slot; the slot holds the device for as long
/// as the returned [`Armed`] lives.
pub fn init<PL: Platform + 'static>(
    platform: &'static PL,
    slot: &'static mut DeviceSlot<PL>,
    stats: &'static FiqStats,
    config: Config,
) -> Result<Armed<PL, CpuFiq>, Error> {
    activate(platform, CpuFiq, slot, stats, &config)
}
