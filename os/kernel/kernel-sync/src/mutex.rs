use crate::RawLock;
use crate::irq::{InterruptControl, IrqGuard};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A value behind a raw lock `R`.
///
/// Locking never masks interrupts by itself; use
/// [`lock_irq`](Self::lock_irq) for data an interrupt handler may also take.
pub struct Mutex<T, R> {
    raw: R,
    data: UnsafeCell<T>,
}

// Safety: `data` is only reachable through a guard, and `R` hands out at
// most one guard at a time.
unsafe impl<T: Send, R: RawLock + Sync> Sync for Mutex<T, R> {}

impl<T, R: RawLock> Mutex<T, R> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: R::INIT,
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Takes the lock only if nobody holds it.
    #[must_use]
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.try_lock().then(|| MutexGuard { mutex: self })
    }

    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }

    /// Enters a critical section: interrupts on this CPU are masked, then the
    /// lock is taken.
    ///
    /// Masking first keeps a handler on this CPU from spinning on a lock its
    /// own CPU already holds. On drop the lock is released before the
    /// previous interrupt state comes back.
    #[inline]
    pub fn lock_irq<'a, I>(&'a self, ctl: &'a I) -> IrqMutexGuard<'a, T, R, I>
    where
        I: InterruptControl + ?Sized,
    {
        let irq = IrqGuard::new(ctl);
        IrqMutexGuard {
            inner: self.lock(),
            _irq: irq,
        }
    }

    /// `true` while some context holds the lock. Racy; for diagnostics.
    #[must_use]
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default, R: RawLock> Default for Mutex<T, R> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T, R: RawLock> {
    mutex: &'a Mutex<T, R>,
}

impl<T, R: RawLock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T, R: RawLock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T, R: RawLock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        unsafe { self.mutex.raw.unlock() }
    }
}

/// Guard returned by [`Mutex::lock_irq`].
///
/// Fields drop in declaration order: the lock goes first, interrupts second.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct IrqMutexGuard<'a, T, R, I>
where
    R: RawLock,
    I: InterruptControl + ?Sized,
{
    inner: MutexGuard<'a, T, R>,
    _irq: IrqGuard<'a, I>,
}

impl<T, R, I> Deref for IrqMutexGuard<'_, T, R, I>
where
    R: RawLock,
    I: InterruptControl + ?Sized,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, R, I> DerefMut for IrqMutexGuard<'_, T, R, I>
where
    R: RawLock,
    I: InterruptControl + ?Sized,
{
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
