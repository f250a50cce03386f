//! Advanced Interrupt Controller (AIC5) register interface for SAMA5D2
//!
//! The AIC multiplexes up to 128 sources onto the core's nIRQ and nFIQ lines.
//! Per-source configuration goes through a select-then-configure scheme: the source
//! number is written to SSR, and SMR/IECR/IDCR/ICCR/FFER then act on that source.
//!
//! Register layout (offset from controller base):
//! - SSR:   0x00 (source select, bits 6:0)
//! - SMR:   0x04 (source mode: SRCTYPE bits 6:5, PRIOR bits 2:0)
//! - SVR:   0x08 (source vector)
//! - IVR:   0x10 (IRQ vector, read acknowledges the IRQ)
//! - FVR:   0x14 (FIQ vector, read is part of the FIQ acknowledge)
//! - ISR:   0x18 (current interrupt source number)
//! - IPR0-3: 0x20-0x2C (pending bitmap)
//! - IMR:   0x30 (mask of the selected source)
//! - CISR:  0x34 (core interrupt status, nFIQ bit 0 / nIRQ bit 1)
//! - EOICR: 0x38 (end of interrupt, write any value)
//! - SPU:   0x3C (spurious vector)
//! - IECR/IDCR/ICCR/ISCR: 0x40-0x4C (enable/disable/clear/set selected source)
//! - FFER/FFDR/FFSR: 0x50-0x58 (fast forcing enable/disable/status)
//! - DCR:   0x6C (debug control)
//!
//! Only the FIQ path (`acknowledge_fiq`) runs at interrupt level. Everything else is
//! setup-time configuration.

use core::ptr::NonNull;

use crate::fiq::FiqSafe;

pub const SSR: usize = 0x00;
pub const SMR: usize = 0x04;
pub const FVR: usize = 0x14;
pub const ISR: usize = 0x18;
pub const EOICR: usize = 0x38;
pub const IECR: usize = 0x40;
pub const IDCR: usize = 0x44;
pub const ICCR: usize = 0x48;
pub const FFER: usize = 0x50;
pub const FFDR: usize = 0x54;

/// Source number field of SSR
pub const INTSEL_MASK: u32 = 0x7F;

/// Source number of the dedicated nFIQ input. It is always delivered as FIQ.
pub const FIQ_SOURCE: u8 = 0;

const SRCTYPE_SHIFT: u32 = 5;
const SRCTYPE_MASK: u32 = 0x3 << SRCTYPE_SHIFT;

/// Register block size, through DCR at 0x6C
pub const REGISTER_SPAN: usize = 0x70;

/// 32-bit register access at byte offsets from a controller base.
pub trait Registers {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

impl<T: Registers + ?Sized> Registers for &T {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Volatile access to a mapped register block.
pub struct Mmio {
    base: NonNull<u32>,
}

impl Mmio {
    /// # Safety
    /// `base` must point to a mapped AIC5 register block of at least
    /// [`REGISTER_SPAN`] bytes that stays mapped for the lifetime of this value.
    #[inline]
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }
}

impl Registers for Mmio {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        unsafe { self.base.as_ptr().byte_add(offset).read_volatile() }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        unsafe { self.base.as_ptr().byte_add(offset).write_volatile(value) }
    }
}

// Two volatile word accesses, nothing else.
unsafe impl FiqSafe for Mmio {}

/// Source trigger (SMR SRCTYPE field)
///
/// Internal sources only distinguish level (`LevelLow`/`LevelHigh` both mean
/// "high level") from edge (`FallingEdge`/`RisingEdge` both mean "rising edge").
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SourceType {
    #[default]
    LevelLow = 0,
    FallingEdge = 1,
    LevelHigh = 2,
    RisingEdge = 3,
}

/// Which source to steer onto nFIQ, and how it triggers.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Route {
    pub source: u8,
    pub trigger: SourceType,
}

/// One AIC5 instance.
pub struct Aic<R: Registers> {
    regs: R,
}

impl<R: Registers> Aic<R> {
    #[inline]
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    #[inline]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn free(self) -> R {
        self.regs
    }

    /// Current interrupt source number (ISR).
    #[inline]
    pub fn status(&self) -> u32 {
        self.regs.read(ISR) & INTSEL_MASK
    }

    /// Read FVR. The value is not needed, the read itself advances the controller.
    #[inline]
    pub fn fast_vector(&self) -> u32 {
        self.regs.read(FVR)
    }

    /// Signal completion of the interrupt being serviced.
    #[inline]
    pub fn end_of_interrupt(&self) {
        self.regs.write(EOICR, 0);
    }

    /// FIQ acknowledge: ISR read, FVR read, EOICR write, in that order.
    ///
    /// Returns the source number read from ISR. Skipping the EOICR write leaves
    /// the controller unable to present the next FIQ.
    #[inline]
    pub fn acknowledge_fiq(&self) -> u32 {
        let source = self.status();
        let _ = self.fast_vector();
        self.end_of_interrupt();
        source
    }

    pub fn select_source(&self, source: u8) {
        self.regs.write(SSR, source as u32 & INTSEL_MASK);
    }

    pub fn set_source_type(&self, trigger: SourceType) {
        let smr = self.regs.read(SMR);
        self.regs
            .write(SMR, (smr & !SRCTYPE_MASK) | ((trigger as u32) << SRCTYPE_SHIFT));
    }

    pub fn enable_source(&self) {
        self.regs.write(IECR, 1);
    }

    pub fn disable_source(&self) {
        self.regs.write(IDCR, 1);
    }

    pub fn clear_source(&self) {
        self.regs.write(ICCR, 1);
    }

    /// Redirect the selected source to nFIQ.
    pub fn enable_fast_forcing(&self) {
        self.regs.write(FFER, 1);
    }

    pub fn disable_fast_forcing(&self) {
        self.regs.write(FFDR, 1);
    }

    /// Configure `route.source` so that it is delivered on nFIQ.
    ///
    /// The source is disabled while its mode changes and stale pending state is
    /// cleared before it is re-enabled. Priority is left untouched, FIQ ignores it.
    pub fn route_to_fiq(&self, route: Route) {
        self.select_source(route.source);
        self.disable_source();
        self.set_source_type(route.trigger);
        self.clear_source();
        if route.source != FIQ_SOURCE {
            self.enable_fast_forcing();
        }
        self.enable_source();
    }

    /// Undo [`Aic::route_to_fiq`], leaving the source disabled.
    pub fn unroute(&self, source: u8) {
        self.select_source(source);
        self.disable_source();
        if source != FIQ_SOURCE {
            self.disable_fast_forcing();
        }
        self.clear_source();
    }
}
