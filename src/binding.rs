//! Device binding and activation
//!
//! Resolves the AIC register range, the "out" probe line and the interrupt number
//! from the platform, claims that interrupt on the normal IRQ path with a handler
//! that never services anything, and only then installs the FIQ entry.
//!
//! Each acquired resource is held by a guard that releases it on drop, so an error
//! at any step unwinds everything acquired before it. Nothing half-armed is ever
//! reachable: the FIQ entry is installed last, with FIQ masked.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::aic::{Aic, Registers, Route};
use crate::cpu::FiqVector;
use crate::fiq::{FiqContext, FiqCounts, FiqDriver, FiqHandler, FiqSafe, FiqStats};
use crate::gpio::{Level, ProbePin};
use crate::Config;

/// Device-tree compatible string handled by this driver.
pub const COMPATIBLE: &str = "atmel,sama5d2-fiq";

/// Name used when claiming the normal interrupt line.
pub const DRIVER_NAME: &str = "aic5-fiq";

/// Name of the probe output line.
pub const OUTPUT_NAME: &str = "out";

const ENOENT: i32 = 2;
const ENXIO: i32 = 6;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;

/// Physical register window of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterRange {
    pub start: usize,
    pub size: usize,
}

/// Normal interrupt handler result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqReturn {
    None,
    Handled,
}

/// Normal interrupt handler function type
pub type IrqHandler = fn(u32) -> IrqReturn;

/// Handler registered on the normal IRQ path purely to own the line.
///
/// The source is routed to FIQ, so the IRQ dispatcher never sees it asserted.
pub fn claim_only(_irq: u32) -> IrqReturn {
    IrqReturn::None
}

/// Why a platform refused a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResourceError {
    NotFound,
    Busy,
    NoMemory,
    Invalid,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceError::NotFound => "not found",
            ResourceError::Busy => "busy",
            ResourceError::NoMemory => "out of memory",
            ResourceError::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Activation failure. Each cause has its own [`Error::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Incompatible,
    MissingRegisterRange,
    MapRegisters(ResourceError),
    MissingOutput(ResourceError),
    MissingIrq,
    ClaimIrq(ResourceError),
    /// The core's FIQ entry is held by another device.
    FiqBusy,
}

impl Error {
    /// Negative errno for callers speaking the platform's error convention.
    pub fn code(&self) -> i32 {
        match self {
            Error::Incompatible => -ENODEV,
            Error::MissingRegisterRange => -ENXIO,
            Error::MapRegisters(_) => -ENOMEM,
            Error::MissingOutput(_) => -ENOENT,
            Error::MissingIrq => -EINVAL,
            Error::ClaimIrq(_) => -EBUSY,
            Error::FiqBusy => -EEXIST,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incompatible => write!(f, "device is not {}", COMPATIBLE),
            Error::MissingRegisterRange => f.write_str("no register range"),
            Error::MapRegisters(e) => write!(f, "cannot map registers: {}", e),
            Error::MissingOutput(e) => write!(f, "cannot get \"{}\" line: {}", OUTPUT_NAME, e),
            Error::MissingIrq => f.write_str("no interrupt number"),
            Error::ClaimIrq(e) => write!(f, "cannot claim interrupt: {}", e),
            Error::FiqBusy => f.write_str("FIQ entry already in use"),
        }
    }
}

/// Resource provider for one device instance.
///
/// Methods take `&self` so that release guards can hold a shared reference.
pub trait Platform {
    type Registers: Registers + FiqSafe + 'static;
    type Pin: OutputPin + FiqSafe + 'static;

    fn is_compatible(&self, compatible: &str) -> bool;

    fn register_range(&self, index: usize) -> Option<RegisterRange>;
    fn map_registers(&self, range: &RegisterRange) -> Result<Self::Registers, ResourceError>;
    fn unmap_registers(&self, regs: Self::Registers);

    /// Acquire a named output line, driven to `initial`.
    fn request_output(&self, name: &'static str, initial: Level) -> Result<Self::Pin, ResourceError>;
    fn release_output(&self, pin: Self::Pin);

    fn irq(&self, index: usize) -> Option<u32>;
    fn request_irq(&self, irq: u32, handler: IrqHandler, name: &'static str) -> Result<(), ResourceError>;
    fn free_irq(&self, irq: u32);
}

/// Mapped register block, unmapped on drop.
pub struct MappedRegisters<'p, PL: Platform> {
    platform: &'p PL,
    regs: ManuallyDrop<PL::Registers>,
}

impl<'p, PL: Platform> MappedRegisters<'p, PL> {
    fn map(platform: &'p PL, range: &RegisterRange) -> Result<Self, Error> {
        let regs = platform.map_registers(range).map_err(Error::MapRegisters)?;
        Ok(Self {
            platform,
            regs: ManuallyDrop::new(regs),
        })
    }
}

impl<'p, PL: Platform> Registers for MappedRegisters<'p, PL> {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        self.regs.read(offset)
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        self.regs.write(offset, value)
    }
}

unsafe impl<'p, PL: Platform> FiqSafe for MappedRegisters<'p, PL> {}

impl<'p, PL: Platform> Drop for MappedRegisters<'p, PL> {
    fn drop(&mut self) {
        let regs = unsafe { ManuallyDrop::take(&mut self.regs) };
        self.platform.unmap_registers(regs);
    }
}

/// Acquired output line, released on drop.
pub struct OutputLine<'p, PL: Platform> {
    platform: &'p PL,
    pin: ManuallyDrop<PL::Pin>,
}

impl<'p, PL: Platform> OutputLine<'p, PL> {
    fn request(platform: &'p PL, name: &'static str, initial: Level) -> Result<Self, Error> {
        let pin = platform.request_output(name, initial).map_err(Error::MissingOutput)?;
        Ok(Self {
            platform,
            pin: ManuallyDrop::new(pin),
        })
    }
}

impl<'p, PL: Platform> ErrorType for OutputLine<'p, PL> {
    type Error = <PL::Pin as ErrorType>::Error;
}

impl<'p, PL: Platform> OutputPin for OutputLine<'p, PL> {
    #[inline]
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin.set_high()
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low()
    }
}

unsafe impl<'p, PL: Platform> FiqSafe for OutputLine<'p, PL> {}

impl<'p, PL: Platform> Drop for OutputLine<'p, PL> {
    fn drop(&mut self) {
        let pin = unsafe { ManuallyDrop::take(&mut self.pin) };
        self.platform.release_output(pin);
    }
}

/// Ownership of the normal interrupt line, freed on drop.
pub struct IrqClaim<'p, PL: Platform> {
    platform: &'p PL,
    irq: u32,
}

impl<'p, PL: Platform> IrqClaim<'p, PL> {
    fn request(platform: &'p PL, irq: u32) -> Result<Self, Error> {
        platform
            .request_irq(irq, claim_only, DRIVER_NAME)
            .map_err(Error::ClaimIrq)?;
        Ok(Self { platform, irq })
    }

    pub fn irq(&self) -> u32 {
        self.irq
    }
}

impl<'p, PL: Platform> Drop for IrqClaim<'p, PL> {
    fn drop(&mut self) {
        self.platform.free_irq(self.irq);
    }
}

type Driver<'p, PL> = FiqDriver<'p, MappedRegisters<'p, PL>, OutputLine<'p, PL>>;

/// Everything an active device owns.
///
/// Dropping it undoes any routing, frees the interrupt claim, releases the probe
/// line and unmaps the registers, in that order.
pub struct FiqDevice<'p, PL: Platform> {
    claim: IrqClaim<'p, PL>,
    route: Option<Route>,
    driver: Driver<'p, PL>,
}

impl<'p, PL: Platform> FiqDevice<'p, PL> {
    /// Interrupt line claimed on the normal IRQ path.
    pub fn irq(&self) -> u32 {
        self.claim.irq()
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }
}

impl<'p, PL: Platform> FiqHandler for FiqDevice<'p, PL> {
    #[inline]
    fn on_fiq(&mut self, cx: FiqContext<'_>) {
        self.driver.handle(cx);
    }
}

impl<'p, PL: Platform> Drop for FiqDevice<'p, PL> {
    fn drop(&mut self) {
        if let Some(route) = self.route {
            self.driver.aic().unroute(route.source);
        }
    }
}

/// Storage for an active device. Must outlive the FIQ entry, hence `'static`.
pub type DeviceSlot<PL> = Option<FiqDevice<'static, PL>>;

/// Bind the device and arm its FIQ path.
///
/// On error every resource acquired so far has been released and no FIQ entry is
/// installed. FIQ is left unmasked on return, whether or not activation succeeded
/// past the point where it was masked.
pub fn activate<PL, V>(
    platform: &'static PL,
    vector: V,
    slot: &'static mut DeviceSlot<PL>,
    stats: &'static FiqStats,
    config: &Config,
) -> Result<Armed<PL, V>, Error>
where
    PL: Platform + 'static,
    V: FiqVector,
{
    if !platform.is_compatible(COMPATIBLE) {
        return Err(Error::Incompatible);
    }

    let range = platform.register_range(0).ok_or(Error::MissingRegisterRange)?;
    let regs = MappedRegisters::map(platform, &range)?;
    let probe = OutputLine::request(platform, OUTPUT_NAME, Level::Low)?;
    let irq = platform.irq(0).ok_or(Error::MissingIrq)?;

    vector.mask();

    // The entry is only written with FIQ masked, so this holds until install.
    if vector.is_installed() {
        vector.unmask();
        warn!("{}: {}", DRIVER_NAME, Error::FiqBusy);
        return Err(Error::FiqBusy);
    }

    let claim = match IrqClaim::request(platform, irq) {
        Ok(claim) => claim,
        Err(e) => {
            vector.unmask();
            warn!("{}: {}", DRIVER_NAME, e);
            return Err(e);
        }
    };

    let aic = Aic::new(regs);
    if let Some(route) = config.route {
        aic.route_to_fiq(route);
    }

    let device = FiqDevice {
        claim,
        route: config.route,
        driver: FiqDriver::new(aic, ProbePin::new(probe), config.expected_source, stats),
    };

    let slot = NonNull::from(slot);
    let device: &'static mut FiqDevice<'static, PL> = unsafe { (*slot.as_ptr()).insert(device) };
    let entry = NonNull::from(device as &mut dyn FiqHandler);
    if unsafe { vector.install(entry) }.is_err() {
        // Not installed, so nothing else references the device.
        drop(unsafe { (*slot.as_ptr()).take() });
        vector.unmask();
        return Err(Error::FiqBusy);
    }

    vector.unmask();

    info!("{}: irq {} at {:#x} armed", DRIVER_NAME, irq, range.start);

    Ok(Armed {
        slot,
        vector,
        irq,
        stats,
    })
}

/// An activated device. Dropping it tears the device down.
///
/// Leaking it leaves the FIQ path armed for good, which is sound since the device
/// lives in a `'static` slot.
pub struct Armed<PL: Platform + 'static, V: FiqVector> {
    slot: NonNull<DeviceSlot<PL>>,
    vector: V,
    irq: u32,
    stats: &'static FiqStats,
}

impl<PL: Platform + 'static, V: FiqVector> Armed<PL, V> {
    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn stats(&self) -> FiqCounts {
        self.stats.snapshot()
    }

    pub fn deactivate(self) {}
}

impl<PL: Platform + 'static, V: FiqVector> Drop for Armed<PL, V> {
    fn drop(&mut self) {
        self.vector.mask();
        self.vector.uninstall();
        // Entry is gone and FIQ is masked, so the slot is ours again.
        let device = unsafe { (*self.slot.as_ptr()).take() };
        drop(device);
        self.vector.unmask();
        debug!("{}: irq {} released", DRIVER_NAME, self.irq);
    }
}
