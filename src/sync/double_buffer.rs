//! Inner/outer buffers swapped atomically
//!
//! The inner slot belongs to a single owning thread and is read without
//! locking. The outer slot is only touched under the buffer's lock, so any
//! number of producers can append to it concurrently. `swap` exchanges the two
//! designations under the same lock and then clears one slot according to the
//! [`AfterSwap`] policy.

use parking_lot::{Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Containers that can be reset to their empty state in place.
pub trait Clear {
    fn clear(&mut self);
}

impl<T> Clear for Vec<T> {
    fn clear(&mut self) {
        Vec::clear(self);
    }
}

impl<T> Clear for VecDeque<T> {
    fn clear(&mut self) {
        VecDeque::clear(self);
    }
}

impl Clear for String {
    fn clear(&mut self) {
        String::clear(self);
    }
}

/// What to do with the two slots right after a swap.
pub trait AfterSwap {
    fn after_swap<T: Clear>(inner: &mut T, outer: &mut T);
}

/// Clear the slot that just became outer.
///
/// Producers append to the outer slot, the owner swaps and consumes the inner
/// slot. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearOuter;

impl AfterSwap for ClearOuter {
    fn after_swap<T: Clear>(_inner: &mut T, outer: &mut T) {
        outer.clear();
    }
}

/// Clear the slot that just became inner.
///
/// The owner fills the inner slot lock-free and publishes it by swapping;
/// other threads read the published data from the outer slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearInner;

impl AfterSwap for ClearInner {
    fn after_swap<T: Clear>(inner: &mut T, _outer: &mut T) {
        inner.clear();
    }
}

/// Two instances of `T`, one inner and one outer.
///
/// # Single-owner contract
///
/// Exactly one thread may use [`DoubleBuffer::inner_unchecked`], and that
/// same thread must be the only one calling [`DoubleBuffer::swap`] while a
/// reference obtained from it is alive. The type cannot check this; callers
/// usually serialize their owner-side work behind a lock of their own. When
/// the buffer is not shared, [`DoubleBuffer::inner`] gives the same access
/// safely through `&mut self`.
pub struct DoubleBuffer<T, P = ClearOuter> {
    store: [UnsafeCell<T>; 2],
    inner_idx: AtomicUsize,
    outer_lock: Mutex<()>,
    _policy: PhantomData<fn() -> P>,
}

// SAFETY: the outer slot is only reachable while `outer_lock` is held, and the
// inner slot is only reachable through `&mut self` or the unsafe single-owner
// accessor. Moving `T` across threads is therefore all that is required.
unsafe impl<T: Send, P> Sync for DoubleBuffer<T, P> {}

impl<T, P> DoubleBuffer<T, P> {
    pub fn new(inner: T, outer: T) -> Self {
        Self {
            store: [UnsafeCell::new(inner), UnsafeCell::new(outer)],
            inner_idx: AtomicUsize::new(0),
            outer_lock: Mutex::new(()),
            _policy: PhantomData,
        }
    }

    fn inner_index(&self) -> usize {
        self.inner_idx.load(Ordering::Acquire)
    }

    /// Exclusive access to the inner slot.
    pub fn inner(&mut self) -> &mut T {
        let idx = self.inner_index();
        self.store[idx].get_mut()
    }

    /// Access the inner slot from a shared reference without locking.
    ///
    /// # Safety
    ///
    /// The caller must be the buffer's single owner: no other thread may call
    /// this method, and no `swap` may run on any other thread, while the
    /// returned reference is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn inner_unchecked(&self) -> &mut T {
        &mut *self.store[self.inner_index()].get()
    }

    /// Lock and return the outer slot.
    pub fn outer(&self) -> OuterGuard<'_, T> {
        let lock = self.outer_lock.lock();
        let idx = 1 - self.inner_index();
        // SAFETY: the outer slot is only handed out while `outer_lock` is held,
        // and `lock` lives as long as the returned reference.
        let value = unsafe { &mut *self.store[idx].get() };
        OuterGuard { _lock: lock, value }
    }

    /// Run `f` on the outer slot while locked.
    pub fn with_outer_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut outer = self.outer();
        f(&mut outer)
    }

    pub fn into_inner(self) -> (T, T) {
        let idx = self.inner_idx.into_inner();
        let [a, b] = self.store;
        let (a, b) = (a.into_inner(), b.into_inner());
        if idx == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl<T: Clear, P: AfterSwap> DoubleBuffer<T, P> {
    /// Exchange inner and outer, then apply the after-swap policy.
    ///
    /// Every append that completed before the swap is visible in the new inner
    /// slot; appends after it land in the new outer slot.
    pub fn swap(&self) {
        let _lock = self.outer_lock.lock();
        let new_inner = 1 - self.inner_index();
        self.inner_idx.store(new_inner, Ordering::Release);

        // SAFETY: `outer_lock` is held so no producer can see the outer slot,
        // and the single-owner contract rules out a live inner reference on
        // another thread.
        let (inner, outer) = unsafe {
            (
                &mut *self.store[new_inner].get(),
                &mut *self.store[1 - new_inner].get(),
            )
        };
        P::after_swap(inner, outer);
    }
}

impl<T: Default, P> Default for DoubleBuffer<T, P> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

/// The outer slot of a [`DoubleBuffer`], locked for as long as the guard lives.
pub struct OuterGuard<'a, T> {
    _lock: MutexGuard<'a, ()>,
    value: &'a mut T,
}

impl<T> Deref for OuterGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for OuterGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_append_then_swap_moves_data_inward() {
        let mut buffer: DoubleBuffer<Vec<u8>> = DoubleBuffer::default();

        buffer.with_outer_lock(|outer| outer.extend_from_slice(&[0x20, 0xC0]));
        buffer.swap();

        assert_eq!(buffer.inner(), &vec![0x20, 0xC0]);
        assert!(buffer.outer().is_empty());
    }

    #[test]
    fn test_clear_outer_discards_previous_inner() {
        let mut buffer: DoubleBuffer<Vec<u8>> = DoubleBuffer::new(vec![1], vec![2]);

        buffer.swap();

        // Old outer is now inner, old inner was cleared as the new outer.
        assert_eq!(buffer.inner(), &vec![2]);
        assert!(buffer.outer().is_empty());
    }

    #[test]
    fn test_clear_inner_publishes_to_outer() {
        let mut buffer: DoubleBuffer<Vec<&str>, ClearInner> = DoubleBuffer::default();

        buffer.inner().push("press");
        buffer.inner().push("release");
        buffer.swap();

        assert!(buffer.inner().is_empty());
        assert_eq!(*buffer.outer(), vec!["press", "release"]);
    }

    #[test]
    fn test_outer_guard_holds_lock_until_dropped() {
        let buffer: DoubleBuffer<String> = DoubleBuffer::default();
        {
            let mut outer = buffer.outer();
            outer.push_str("abc");
            assert!(buffer.outer_lock.try_lock().is_none());
        }
        assert!(buffer.outer_lock.try_lock().is_some());
        assert_eq!(buffer.with_outer_lock(|s| s.clone()), "abc");
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let buffer: Arc<DoubleBuffer<Vec<u32>>> = Arc::new(DoubleBuffer::default());
        let threads = 16u32;
        let per_thread = 500u32;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        buffer.with_outer_lock(|outer| outer.push(t * per_thread + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        buffer.swap();

        let mut buffer = Arc::try_unwrap(buffer).ok().unwrap();
        let inner = buffer.inner();
        assert_eq!(inner.len(), (threads * per_thread) as usize);
        inner.sort_unstable();
        assert!(inner.iter().copied().eq(0..threads * per_thread));
        assert!(buffer.outer().is_empty());
    }

    #[test]
    fn test_owner_swaps_while_producers_append() {
        let buffer: Arc<DoubleBuffer<Vec<u32>>> = Arc::new(DoubleBuffer::default());
        let producers = 4u32;
        let per_thread = 2_000u32;

        let handles: Vec<_> = (0..producers)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        buffer.with_outer_lock(|outer| outer.push(t * per_thread + i));
                    }
                })
            })
            .collect();

        // This thread is the single owner: it alone swaps and reads inner.
        let mut seen = Vec::new();
        while handles.iter().any(|h| !h.is_finished()) {
            buffer.swap();
            seen.extend_from_slice(unsafe { buffer.inner_unchecked() });
        }
        for handle in handles {
            handle.join().unwrap();
        }
        buffer.swap();
        seen.extend_from_slice(unsafe { buffer.inner_unchecked() });

        seen.sort_unstable();
        assert!(seen.iter().copied().eq(0..producers * per_thread));
    }

    #[test]
    fn test_into_inner_respects_designation() {
        let buffer: DoubleBuffer<Vec<u8>> = DoubleBuffer::new(vec![1], vec![2]);
        buffer.with_outer_lock(|o| o.push(3));
        buffer.swap();
        let (inner, outer) = buffer.into_inner();
        assert_eq!(inner, vec![2, 3]);
        assert!(outer.is_empty());
    }
}
