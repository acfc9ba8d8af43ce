use core::{
    cell::UnsafeCell,
    fmt, hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::interrupt::{self, CriticalSection};

/// A spin mutex that masks interrupts (and, in debug builds, trap delivery)
/// while it is held.
///
/// Holding the lock keeps interrupt handlers off the CPU, so data shared with
/// handlers can be mutated without the handler ever observing a half-done
/// update. The lock must not be held across anything that may block.
pub struct IrqMutex<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> Default for IrqMutex<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

unsafe impl<T> Sync for IrqMutex<T> where T: Send {}

impl<T> fmt::Debug for IrqMutex<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("IrqMutex");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &"<locked>"),
        };
        d.finish()
    }
}

impl<T> IrqMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let critical_section = interrupt::critical_section();

        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }

        IrqMutexGuard {
            mutex: self,
            _critical_section: critical_section,
        }
    }

    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let critical_section = interrupt::critical_section();

        if self.locked.swap(true, Ordering::Acquire) {
            return None;
        }

        Some(IrqMutexGuard {
            mutex: self,
            _critical_section: critical_section,
        })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

pub struct IrqMutexGuard<'a, T> {
    mutex: &'a IrqMutex<T>,
    _critical_section: CriticalSection,
}

unsafe impl<T> Sync for IrqMutexGuard<'_, T> where T: Sync {}

impl<T> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        assert!(
            self.mutex.is_locked(),
            "IrqMutexGuard dropped without holding the lock"
        );
        self.mutex.locked.store(false, Ordering::Release);
    }
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.data.get() }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_masks_interrupts() {
        let mutex = IrqMutex::new(1);
        {
            let mut guard = mutex.lock();
            assert!(!interrupt::is_enabled());
            *guard += 1;
        }
        assert!(interrupt::is_enabled());
        assert_eq!(mutex.into_inner(), 2);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let mutex = IrqMutex::new(());
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
        assert!(interrupt::is_enabled());
    }

    #[test]
    fn test_unlock_precedes_unmasking() {
        let mutex = IrqMutex::new(0_u32);
        let outer = interrupt::disable();
        {
            let mut guard = mutex.lock();
            *guard += 1;
        }
        assert!(!interrupt::is_enabled());
        assert!(!mutex.is_locked());
        drop(outer);

        // Nothing is left for an interrupt handler to spin on.
        let guard = mutex.try_lock().unwrap();
        assert_eq!(*guard, 1);
        drop(guard);
        assert!(interrupt::is_enabled());
    }

    #[test]
    fn test_debug_shows_locked() {
        let mutex = IrqMutex::new(7);
        assert_eq!(format!("{mutex:?}"), "IrqMutex { data: 7 }");
        let _guard = mutex.lock();
        assert_eq!(format!("{mutex:?}"), "IrqMutex { data: \"<locked>\" }");
    }
}
