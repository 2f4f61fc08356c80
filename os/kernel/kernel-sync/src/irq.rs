//! # Interrupt masking
//!
//! Critical sections in the kernel are formed by masking interrupts on the
//! calling CPU. The masking itself is abstracted behind [`InterruptControl`]
//! so that the same bookkeeping code runs on bare metal (via [`CpuInterrupts`])
//! and on a hosted build or under test (via [`SoftInterrupts`]).

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Save/disable/restore access to the interrupt flag of the calling CPU.
///
/// Implementations must make [`save_and_disable`](Self::save_and_disable)
/// idempotent: masking while already masked returns `false` and leaves
/// interrupts masked.
pub trait InterruptControl {
    /// Masks interrupts and reports whether they were enabled before.
    fn save_and_disable(&self) -> bool;

    /// Unmasks interrupts.
    fn enable(&self);

    /// Returns `true` if interrupts are currently unmasked.
    fn enabled(&self) -> bool;
}

impl<I: InterruptControl + ?Sized> InterruptControl for &I {
    #[inline]
    fn save_and_disable(&self) -> bool {
        (**self).save_and_disable()
    }

    #[inline]
    fn enable(&self) {
        (**self).enable();
    }

    #[inline]
    fn enabled(&self) -> bool {
        (**self).enabled()
    }
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop **only** if they were enabled when the
/// guard was created, so guards nest.
///
/// ```
/// use kernel_sync::{InterruptControl, IrqGuard, SoftInterrupts};
///
/// let irq = SoftInterrupts::new();
/// {
///     let _outer = IrqGuard::new(&irq);
///     {
///         let _inner = IrqGuard::new(&irq);
///     }
///     assert!(!irq.enabled()); // still inside the outer section
/// }
/// assert!(irq.enabled());
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    ctl: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    #[inline]
    pub fn new(ctl: &'a I) -> Self {
        let were_enabled = ctl.save_and_disable();
        Self { ctl, were_enabled }
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable();
        }
    }
}

/// Software interrupt flag.
///
/// Used for hosted builds and tests where the real CPU flag is not ours to
/// touch. Counts how many critical sections were entered so callers can
/// assert that a code path really ran under a critical section.
pub struct SoftInterrupts {
    enabled: AtomicBool,
    sections: AtomicUsize,
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftInterrupts {
    /// Creates a controller with interrupts enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            sections: AtomicUsize::new(0),
        }
    }

    /// Number of times interrupts went from enabled to masked.
    #[must_use]
    pub fn sections_entered(&self) -> usize {
        self.sections.load(Ordering::Relaxed)
    }
}

impl InterruptControl for SoftInterrupts {
    fn save_and_disable(&self) -> bool {
        let was = self.enabled.swap(false, Ordering::AcqRel);
        if was {
            self.sections.fetch_add(1, Ordering::Relaxed);
        }
        was
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// The real interrupt flag of an `x86_64` CPU (`IF`, bit 9 of `RFLAGS`).
///
/// # Safety & Privilege
///
/// `cli`/`sti` are only legal at CPL0. Only available on bare-metal targets.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub struct CpuInterrupts;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl CpuInterrupts {
    const IF: u64 = 1 << 9;

    #[inline]
    fn rflags() -> u64 {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl InterruptControl for CpuInterrupts {
    #[inline]
    fn save_and_disable(&self) -> bool {
        let enabled = Self::rflags() & Self::IF != 0;
        if enabled {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }
        enabled
    }

    #[inline]
    fn enable(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enabled(&self) -> bool {
        Self::rflags() & Self::IF != 0
    }
}
