//! Simulated controller, pin and platform for host tests.
//!
//! Every mock appends to one shared [`EventLog`] so tests can assert the relative
//! order of pin writes, register accesses and resource operations.

use core::ptr::NonNull;
use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::Mutex;
use std::vec::Vec;

use crate::aic::Registers;
use crate::binding::{IrqHandler, Platform, RegisterRange, ResourceError};
use crate::cpu::{EntryBusy, FiqVector};
use crate::fiq::{FiqContext, FiqHandler, FiqSafe};
use crate::gpio::Level;

/// Serializes tests that go through the global `CpuFiq` entry.
pub static CPU_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Read(usize),
    Write(usize, u32),
    Pin(bool),
    Map(usize),
    Unmap,
    RequestOutput(&'static str, Level),
    ReleaseOutput,
    RequestIrq(u32),
    FreeIrq(u32),
    MaskFiq,
    UnmaskFiq,
    Install,
    Uninstall,
}

#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn count(&self, event: &Event) -> usize {
        self.0.borrow().iter().filter(|e| *e == event).count()
    }
}

/// Register block that records accesses and replays queued read values.
///
/// Reads of an offset with nothing queued return 0.
pub struct SimRegisters {
    log: EventLog,
    reads: RefCell<BTreeMap<usize, VecDeque<u32>>>,
}

impl SimRegisters {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            reads: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn queue_read(&self, offset: usize, value: u32) {
        self.reads.borrow_mut().entry(offset).or_default().push_back(value);
    }
}

impl Registers for SimRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.log.push(Event::Read(offset));
        self.reads
            .borrow_mut()
            .get_mut(&offset)
            .and_then(|q| q.pop_front())
            .unwrap_or(0)
    }

    fn write(&self, offset: usize, value: u32) {
        self.log.push(Event::Write(offset, value));
    }
}

unsafe impl FiqSafe for SimRegisters {}

pub struct SimPin {
    log: EventLog,
}

impl SimPin {
    pub fn new(log: &EventLog) -> Self {
        Self { log: log.clone() }
    }
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SimPin {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.push(Event::Pin(true));
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.push(Event::Pin(false));
        Ok(())
    }
}

unsafe impl FiqSafe for SimPin {}

/// Which platform lookup should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    Incompatible,
    NoRegisterRange,
    MapBusy,
    NoOutput,
    NoIrq,
    IrqBusy,
}

pub const SIM_BASE: usize = 0xFC02_0000;
pub const SIM_IRQ: u32 = 49;

/// Platform device with one register range, one "out" line and one interrupt.
pub struct SimPlatform {
    pub log: EventLog,
    pub fault: Fault,
    /// Values handed to the register block created by `map_registers`.
    pub reads: Vec<(usize, u32)>,
    pub claimed: RefCell<Option<IrqHandler>>,
}

impl SimPlatform {
    pub fn new(log: &EventLog, fault: Fault) -> Self {
        Self {
            log: log.clone(),
            fault,
            reads: Vec::new(),
            claimed: RefCell::new(None),
        }
    }
}

impl Platform for SimPlatform {
    type Registers = SimRegisters;
    type Pin = SimPin;

    fn is_compatible(&self, compatible: &str) -> bool {
        self.fault != Fault::Incompatible && compatible == crate::binding::COMPATIBLE
    }

    fn register_range(&self, index: usize) -> Option<RegisterRange> {
        if self.fault == Fault::NoRegisterRange || index != 0 {
            return None;
        }
        Some(RegisterRange {
            start: SIM_BASE,
            size: 0x200,
        })
    }

    fn map_registers(&self, range: &RegisterRange) -> Result<SimRegisters, ResourceError> {
        self.log.push(Event::Map(range.start));
        if self.fault == Fault::MapBusy {
            return Err(ResourceError::Busy);
        }
        let regs = SimRegisters::new(&self.log);
        for &(offset, value) in &self.reads {
            regs.queue_read(offset, value);
        }
        Ok(regs)
    }

    fn unmap_registers(&self, _regs: SimRegisters) {
        self.log.push(Event::Unmap);
    }

    fn request_output(&self, name: &'static str, initial: Level) -> Result<SimPin, ResourceError> {
        self.log.push(Event::RequestOutput(name, initial));
        if self.fault == Fault::NoOutput {
            return Err(ResourceError::NotFound);
        }
        Ok(SimPin::new(&self.log))
    }

    fn release_output(&self, _pin: SimPin) {
        self.log.push(Event::ReleaseOutput);
    }

    fn irq(&self, index: usize) -> Option<u32> {
        if self.fault == Fault::NoIrq || index != 0 {
            return None;
        }
        Some(SIM_IRQ)
    }

    fn request_irq(&self, irq: u32, handler: IrqHandler, _name: &'static str) -> Result<(), ResourceError> {
        self.log.push(Event::RequestIrq(irq));
        if self.fault == Fault::IrqBusy {
            return Err(ResourceError::Busy);
        }
        *self.claimed.borrow_mut() = Some(handler);
        Ok(())
    }

    fn free_irq(&self, irq: u32) {
        self.log.push(Event::FreeIrq(irq));
        *self.claimed.borrow_mut() = None;
    }
}

/// Per-test stand-in for the core FIQ path. Clones share the installed entry.
#[derive(Clone)]
pub struct SimVector {
    log: EventLog,
    entry: Rc<Cell<Option<NonNull<dyn FiqHandler>>>>,
    masked: Rc<Cell<bool>>,
}

impl SimVector {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            entry: Rc::new(Cell::new(None)),
            masked: Rc::new(Cell::new(false)),
        }
    }

    pub fn is_masked(&self) -> bool {
        self.masked.get()
    }

    /// Deliver one FIQ. Returns false when nothing is installed or FIQ is masked.
    pub fn fire(&self) -> bool {
        if self.masked.get() {
            return false;
        }
        match self.entry.get() {
            Some(mut handler) => {
                unsafe { handler.as_mut().on_fiq(FiqContext::steal()) };
                true
            }
            None => false,
        }
    }
}

impl FiqVector for SimVector {
    fn mask(&self) {
        self.log.push(Event::MaskFiq);
        self.masked.set(true);
    }

    fn unmask(&self) {
        self.log.push(Event::UnmaskFiq);
        self.masked.set(false);
    }

    unsafe fn install(&self, handler: NonNull<dyn FiqHandler>) -> Result<(), EntryBusy> {
        assert!(self.masked.get(), "install with FIQ unmasked");
        if self.entry.get().is_some() {
            return Err(EntryBusy);
        }
        self.log.push(Event::Install);
        self.entry.set(Some(handler));
        Ok(())
    }

    fn uninstall(&self) {
        assert!(self.masked.get(), "uninstall with FIQ unmasked");
        self.log.push(Event::Uninstall);
        self.entry.set(None);
    }

    fn is_installed(&self) -> bool {
        self.entry.get().is_some()
    }
}

pub fn leak<T>(value: T) -> &'static mut T {
    Box::leak(Box::new(value))
}
