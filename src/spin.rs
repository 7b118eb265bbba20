//! Adaptive spin lock for very short critical sections.
//!
//! On a single-core host spinning can only burn the time slice of the thread
//! holding the lock, so every failed attempt yields. On multi-core hosts the
//! lock busy-spins up to a configurable number of iterations before yielding.

use crate::settings::AmbientSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;

fn is_single_core() -> bool {
    static SINGLE_CORE: OnceLock<bool> = OnceLock::new();
    *SINGLE_CORE.get_or_init(|| thread::available_parallelism().map_or(true, |n| n.get() == 1))
}

#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
    spin_iterations: u32,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    /// Creates a lock using the installed `spin.spin_iterations` setting.
    #[must_use]
    pub fn new() -> Self {
        Self::with_spin_iterations(AmbientSettings::current().spin.spin_iterations)
    }

    #[must_use]
    pub fn with_spin_iterations(spin_iterations: u32) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            spin_iterations: spin_iterations.max(1),
        }
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> SpinGuard<'_> {
        let mut spins = 0u32;
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            if is_single_core() || spins >= self.spin_iterations {
                thread::yield_now();
                spins = 0;
            } else {
                std::hint::spin_loop();
                spins += 1;
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Runs `f` while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        f()
    }
}

/// Releases the lock when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
