//! Fixed-resource platform for bare-metal SAMA5D2 boards
//!
//! Without a device tree the register window, interrupt number and probe pin are
//! known up front. [`Board`] hands them out through [`Platform`] and keeps the
//! bookkeeping a kernel would otherwise do: who holds the pin, who owns the line.
//!
//! The AIC is accessed at its physical address (MMU off or identity-mapped).

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use critical_section::Mutex;
use embedded_hal::digital::OutputPin;

use crate::aic::{Mmio, REGISTER_SPAN};
use crate::binding::{IrqHandler, IrqReturn, Platform, RegisterRange, ResourceError, COMPATIBLE, OUTPUT_NAME};
use crate::fiq::FiqSafe;
use crate::gpio::Level;

/// AIC (non-secure) base address
pub const SAMA5D2_AIC_BASE: usize = 0xFC02_0000;

/// Secure AIC base address
pub const SAMA5D2_SAIC_BASE: usize = 0xF803_C000;

/// Size of one AIC register window
pub const SAMA5D2_AIC_SIZE: usize = 0x200;

pub struct Board<P> {
    aic: Option<RegisterRange>,
    irq: Option<u32>,
    probe: Mutex<RefCell<Option<P>>>,
    claim: Mutex<Cell<Option<(u32, IrqHandler)>>>,
}

impl<P> Board<P> {
    pub const fn new(aic: Option<RegisterRange>, irq: Option<u32>, probe: Option<P>) -> Self {
        Self {
            aic,
            irq,
            probe: Mutex::new(RefCell::new(probe)),
            claim: Mutex::new(Cell::new(None)),
        }
    }

    /// Non-secure AIC with the given interrupt and probe pin.
    pub const fn sama5d2(irq: u32, probe: P) -> Self {
        Self::new(
            Some(RegisterRange {
                start: SAMA5D2_AIC_BASE,
                size: SAMA5D2_AIC_SIZE,
            }),
            Some(irq),
            Some(probe),
        )
    }

    /// Run the handler claiming `irq` on the normal IRQ path, if any.
    pub fn dispatch_irq(&self, irq: u32) -> IrqReturn {
        let claim = critical_section::with(|cs| self.claim.borrow(cs).get());
        match claim {
            Some((owned, handler)) if owned == irq => handler(irq),
            _ => IrqReturn::None,
        }
    }

    pub fn is_claimed(&self, irq: u32) -> bool {
        critical_section::with(|cs| matches!(self.claim.borrow(cs).get(), Some((owned, _)) if owned == irq))
    }
}

impl<P: OutputPin + FiqSafe + 'static> Platform for Board<P> {
    type Registers = Mmio;
    type Pin = P;

    fn is_compatible(&self, compatible: &str) -> bool {
        compatible == COMPATIBLE
    }

    fn register_range(&self, index: usize) -> Option<RegisterRange> {
        match index {
            0 => self.aic,
            _ => None,
        }
    }

    fn map_registers(&self, range: &RegisterRange) -> Result<Mmio, ResourceError> {
        if range.size < REGISTER_SPAN || range.start % 4 != 0 {
            return Err(ResourceError::Invalid);
        }
        let base = NonNull::new(range.start as *mut u32).ok_or(ResourceError::Invalid)?;
        Ok(unsafe { Mmio::new(base) })
    }

    fn unmap_registers(&self, _regs: Mmio) {}

    fn request_output(&self, name: &'static str, initial: Level) -> Result<P, ResourceError> {
        if name != OUTPUT_NAME {
            return Err(ResourceError::NotFound);
        }
        let mut pin = critical_section::with(|cs| self.probe.borrow_ref_mut(cs).take()).ok_or(ResourceError::Busy)?;
        let driven = match initial {
            Level::Low => pin.set_low(),
            Level::High => pin.set_high(),
        };
        if driven.is_err() {
            self.release_output(pin);
            return Err(ResourceError::Invalid);
        }
        Ok(pin)
    }

    fn release_output(&self, pin: P) {
        critical_section::with(|cs| {
            self.probe.borrow_ref_mut(cs).replace(pin);
        });
    }

    fn irq(&self, index: usize) -> Option<u32> {
        match index {
            0 => self.irq,
            _ => None,
        }
    }

    fn request_irq(&self, irq: u32, handler: IrqHandler, _name: &'static str) -> Result<(), ResourceError> {
        critical_section::with(|cs| {
            let claim = self.claim.borrow(cs);
            if claim.get().is_some() {
                return Err(ResourceError::Busy);
            }
            claim.set(Some((irq, handler)));
            Ok(())
        })
    }

    fn free_irq(&self, irq: u32) {
        critical_section::with(|cs| {
            let claim = self.claim.borrow(cs);
            if matches!(claim.get(), Some((owned, _)) if owned == irq) {
                claim.set(None);
            }
        });
    }
}
