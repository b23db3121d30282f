//! Mutex-guarded single value

use parking_lot::{Mutex, MutexGuard};

/// Wrap any value in a mutex and lock it on every access.
///
/// The only way around the lock is [`LockedValue::unsafe_access`], which is
/// reserved for phases where the caller already knows no other thread can
/// touch the value (e.g. while the owner is still being constructed).
#[derive(Debug, Default)]
pub struct LockedValue<T> {
    contents: Mutex<T>,
}

impl<T> LockedValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            contents: Mutex::new(value),
        }
    }

    /// Invoke `f` with exclusive mutable access and return its result.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.contents.lock();
        f(&mut guard)
    }

    /// Invoke `f` with shared access while locked.
    pub fn with_lock_ref<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.contents.lock();
        f(&guard)
    }

    /// Lock manually, for callers that need to hold the value across several
    /// statements.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.contents.lock()
    }

    /// Exclusive access without locking; `&mut self` already proves it.
    pub fn get_mut(&mut self) -> &mut T {
        self.contents.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.contents.into_inner()
    }

    /// Get a reference to the value without taking the lock.
    ///
    /// # Safety
    ///
    /// This lifts the locking invariant. The caller must guarantee that no
    /// other access (locked or not) happens while the returned reference is
    /// alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn unsafe_access(&self) -> &mut T {
        &mut *self.contents.data_ptr()
    }
}

impl<T: Clone> LockedValue<T> {
    /// Clone the current value out under the lock.
    pub fn snapshot(&self) -> T {
        self.contents.lock().clone()
    }
}
