//! Spin-based mutual exclusion.
//!
//! The allocators cannot use a lock that allocates on contention (parking
//! lots grow their wait tables on the heap), so they use this one.

use core::{
  cell::UnsafeCell,
  hint,
  ops::{Deref, DerefMut},
  sync::atomic::{AtomicBool, Ordering},
};

/// Busy-wait iterations before a waiter starts yielding its time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

struct SpinLock {
  locked: AtomicBool,
}

impl SpinLock {
  const fn new() -> Self {
    Self {
      locked: AtomicBool::new(false),
    }
  }

  #[inline]
  fn try_lock(&self) -> bool {
    self
      .locked
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_ok()
  }

  #[inline]
  fn lock(&self) {
    let mut spins = 0;
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        if spins < SPINS_BEFORE_YIELD {
          spins += 1;
          hint::spin_loop();
        } else {
          std::thread::yield_now();
        }
      }
    }
  }

  #[inline]
  fn unlock(&self) {
    self.locked.store(false, Ordering::Release);
  }
}

pub(crate) struct SpinMutex<T> {
  lock: SpinLock,
  data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
  pub(crate) const fn new(data: T) -> Self {
    Self {
      lock: SpinLock::new(),
      data: UnsafeCell::new(data),
    }
  }

  /// Blocks until the lock is acquired.
  pub(crate) fn lock(&self) -> SpinMutexGuard<'_, T> {
    self.lock.lock();
    SpinMutexGuard { mutex: self }
  }

  pub(crate) fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
    self.lock.try_lock().then_some(SpinMutexGuard { mutex: self })
  }

  pub(crate) fn get_mut(&mut self) -> &mut T {
    self.data.get_mut()
  }
}

pub(crate) struct SpinMutexGuard<'a, T> {
  mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    unsafe { &*self.mutex.data.get() }
  }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.mutex.data.get() }
  }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
  fn drop(&mut self) {
    self.mutex.lock.unlock();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn try_lock_fails_while_held() {
    let mutex = SpinMutex::new(0u32);
    let guard = mutex.lock();
    assert!(mutex.try_lock().is_none());
    drop(guard);
    assert!(mutex.try_lock().is_some());
  }

  #[test]
  fn serializes_increments_across_threads() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 10_000;

    let mutex = SpinMutex::new(0usize);
    thread::scope(|s| {
      for _ in 0..THREADS {
        s.spawn(|| {
          for _ in 0..ROUNDS {
            *mutex.lock() += 1;
          }
        });
      }
    });

    assert_eq!(*mutex.lock(), THREADS * ROUNDS);
  }
}
