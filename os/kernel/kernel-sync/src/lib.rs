//! # Kernel synchronization primitives
//!
//! Two kinds of exclusion are used by the memory manager and the scheduler
//! bookkeeping built on top of it:
//!
//! * [`SpinMutex`]: plain mutual exclusion between tasks. Used for the heap,
//!   where a walk over a large region must not mask interrupts.
//! * [`Mutex::lock_irq`]: mutual exclusion **plus** masked interrupts on the
//!   calling CPU, i.e. a critical section. Used for short list surgery that
//!   may race with interrupt handlers.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use irq::CpuInterrupts;
pub use irq::{InterruptControl, IrqGuard, SoftInterrupts};
pub use mutex::{IrqMutexGuard, Mutex, MutexGuard};
pub use raw_spin::RawSpin;

/// Spin lock protecting its value without touching interrupts.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

/// A lock without payload, driven by [`Mutex`].
pub trait RawLock {
    /// The unlocked state.
    const INIT: Self;

    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn unlock(&self);

    fn is_locked(&self) -> bool;
}
