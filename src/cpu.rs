//! Processor FIQ path
//!
//! The runtime's FIQ vector calls [`__fiq_handler`], which forwards to at most one
//! installed [`FiqHandler`]. The F bit in CPSR masks FIQ independently of the
//! I bit used by `critical_section`.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{compiler_fence, Ordering};

use portable_atomic::AtomicBool;

use crate::fiq::{FiqContext, FiqHandler};

/// Core-level control of the FIQ path.
pub trait FiqVector {
    /// Mask FIQ on this core.
    fn mask(&self);

    /// Unmask FIQ on this core.
    fn unmask(&self);

    /// Make `handler` the FIQ entry point.
    ///
    /// Fails without touching the entry if another handler is installed.
    ///
    /// # Safety
    /// `handler` must stay valid and otherwise unaliased until [`FiqVector::uninstall`]
    /// returns. FIQ must be masked while installing.
    unsafe fn install(&self, handler: NonNull<dyn FiqHandler>) -> Result<(), EntryBusy>;

    /// Remove the entry point. FIQ must be masked while uninstalling.
    fn uninstall(&self);

    fn is_installed(&self) -> bool;
}

/// The FIQ entry already belongs to another handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryBusy;

struct Entry(UnsafeCell<Option<NonNull<dyn FiqHandler>>>);

// Written only with FIQ masked, read only from FIQ.
unsafe impl Sync for Entry {}

static ENTRY: Entry = Entry(UnsafeCell::new(None));
static INSTALLED: AtomicBool = AtomicBool::new(false);

#[cfg(not(target_arch = "arm"))]
static MASKED: AtomicBool = AtomicBool::new(false);

/// The FIQ path of the executing core.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuFiq;

impl CpuFiq {
    /// Check whether FIQ is masked (CPSR.F).
    pub fn is_masked(&self) -> bool {
        #[cfg(target_arch = "arm")]
        {
            let cpsr: u32;
            unsafe { core::arch::asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags)) };
            cpsr & (1 << 6) != 0
        }
        #[cfg(not(target_arch = "arm"))]
        {
            MASKED.load(Ordering::Relaxed)
        }
    }
}

impl FiqVector for CpuFiq {
    #[inline]
    fn mask(&self) {
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("cpsid f", options(nostack, preserves_flags));
        }
        #[cfg(not(target_arch = "arm"))]
        MASKED.store(true, Ordering::Relaxed);
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    fn unmask(&self) {
        compiler_fence(Ordering::SeqCst);
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("cpsie f", options(nostack, preserves_flags));
        }
        #[cfg(not(target_arch = "arm"))]
        MASKED.store(false, Ordering::Relaxed);
    }

    unsafe fn install(&self, handler: NonNull<dyn FiqHandler>) -> Result<(), EntryBusy> {
        if INSTALLED.load(Ordering::Acquire) {
            return Err(EntryBusy);
        }
        *ENTRY.0.get() = Some(handler);
        INSTALLED.store(true, Ordering::Release);
        Ok(())
    }

    fn uninstall(&self) {
        INSTALLED.store(false, Ordering::Release);
        unsafe { *ENTRY.0.get() = None };
    }

    fn is_installed(&self) -> bool {
        INSTALLED.load(Ordering::Acquire)
    }
}

/// FIQ entry called from the runtime's FIQ vector wrapper.
///
/// The wrapper owns the banked-register save/restore and `subs pc, lr, #4`.
/// Returns immediately when nothing is installed.
#[no_mangle]
pub unsafe extern "C" fn __fiq_handler() {
    if !INSTALLED.load(Ordering::Acquire) {
        return;
    }
    if let Some(mut handler) = *ENTRY.0.get() {
        handler.as_mut().on_fiq(FiqContext::steal());
    }
}
