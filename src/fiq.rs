//! FIQ handler
//!
//! Runs on the core's FIQ exception path. Normal IRQ masking (`cpsid i`, and with it
//! `critical_section`) does not hold FIQ off, so anything reachable from here may
//! have interrupted a lock holder. The handler therefore only touches handles that
//! are [`FiqSafe`]: a probe pin and the AIC register block, both owned exclusively.
//!
//! Per delivery:
//! 1. Pulse the probe pin (high, then low) before any register access, so the pulse
//!    edge marks handler entry on a scope.
//! 2. ISR read, FVR read, EOICR write.
//! 3. Bump the lock-free counters and return.
//!
//! The controller does not present FIQ N+1 before the EOICR write for N, so a
//! delivery never races the previous one.

use core::marker::PhantomData;

use embedded_hal::digital::OutputPin;
use portable_atomic::{AtomicU32, Ordering};

use crate::aic::{Aic, Registers};
use crate::gpio::ProbePin;

/// Marker for handles usable from FIQ context.
///
/// # Safety
/// Every operation on the implementor must complete without blocking, sleeping,
/// allocating, or taking a lock that code running below FIQ level may hold.
pub unsafe trait FiqSafe {}

unsafe impl<T: FiqSafe + ?Sized> FiqSafe for &T {}

unsafe impl<T: FiqSafe + ?Sized> FiqSafe for &mut T {}

/// Proof that the current code runs in FIQ mode.
///
/// Not `Send`; only obtainable through [`FiqContext::steal`].
#[derive(Clone, Copy)]
pub struct FiqContext<'a> {
    _private: PhantomData<(&'a (), *mut ())>,
}

impl<'a> FiqContext<'a> {
    /// # Safety
    /// Must only be called from the FIQ exception entry.
    #[inline(always)]
    pub unsafe fn steal() -> Self {
        Self { _private: PhantomData }
    }
}

/// Something that can be installed as the FIQ entry point.
pub trait FiqHandler {
    fn on_fiq(&mut self, cx: FiqContext<'_>);
}

const NO_SOURCE: u32 = u32::MAX;

/// Delivery counters, written at FIQ level and read from normal context.
pub struct FiqStats {
    deliveries: AtomicU32,
    unexpected: AtomicU32,
    last_unexpected: AtomicU32,
}

/// Point-in-time copy of [`FiqStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FiqCounts {
    pub deliveries: u32,
    pub unexpected: u32,
    pub last_unexpected: Option<u32>,
}

impl FiqStats {
    pub const fn new() -> Self {
        Self {
            deliveries: AtomicU32::new(0),
            unexpected: AtomicU32::new(0),
            last_unexpected: AtomicU32::new(NO_SOURCE),
        }
    }

    #[inline]
    fn record(&self, source: u32, expected: u32) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        if source != expected {
            self.last_unexpected.store(source, Ordering::Relaxed);
            self.unexpected.fetch_add(1, Ordering::Release);
        }
    }

    pub fn snapshot(&self) -> FiqCounts {
        let unexpected = self.unexpected.load(Ordering::Acquire);
        let last = self.last_unexpected.load(Ordering::Relaxed);
        FiqCounts {
            deliveries: self.deliveries.load(Ordering::Relaxed),
            unexpected,
            last_unexpected: (last != NO_SOURCE).then_some(last),
        }
    }
}

impl Default for FiqStats {
    fn default() -> Self {
        Self::new()
    }
}

/// FIQ handler state for one AIC instance.
pub struct FiqDriver<'s, R: Registers, P: OutputPin> {
    // Field order is release order: probe pin, then register mapping.
    probe: ProbePin<P>,
    aic: Aic<R>,
    expected_source: u32,
    stats: &'s FiqStats,
}

impl<'s, R, P> FiqDriver<'s, R, P>
where
    R: Registers + FiqSafe,
    P: OutputPin + FiqSafe,
{
    pub fn new(aic: Aic<R>, probe: ProbePin<P>, expected_source: u32, stats: &'s FiqStats) -> Self {
        Self {
            probe,
            aic,
            expected_source,
            stats,
        }
    }

    pub fn aic(&self) -> &Aic<R> {
        &self.aic
    }

    pub fn stats(&self) -> &'s FiqStats {
        self.stats
    }

    /// Service one FIQ delivery and return the source number the controller reported.
    ///
    /// An unexpected source is only counted; it is not actionable here and
    /// reporting it synchronously could block.
    #[inline]
    pub fn handle(&mut self, _cx: FiqContext<'_>) -> u32 {
        self.probe.pulse();
        let source = self.aic.acknowledge_fiq();
        self.stats.record(source, self.expected_source);
        source
    }

    pub fn free(self) -> (Aic<R>, ProbePin<P>) {
        (self.aic, self.probe)
    }
}

impl<'s, R, P> FiqHandler for FiqDriver<'s, R, P>
where
    R: Registers + FiqSafe,
    P: OutputPin + FiqSafe,
{
    #[inline]
    fn on_fiq(&mut self, cx: FiqContext<'_>) {
        self.handle(cx);
    }
}
