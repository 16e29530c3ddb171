//! Futex-backed raw mutex guarding bucket headers.
//!
//! A single `u32` word: 0 unlocked, 1 locked, 2 locked with waiters.
//! Uncontended acquire is one CAS; contended acquire spins briefly and then
//! parks on the futex. Nothing here allocates, so it is usable from inside
//! the allocator. Non-Linux targets yield instead of parking.
//!
//! Plugs into `lock_api` (re-exported by `parking_lot`) to get RAII guards.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::lock_api::{self, GuardNoSend};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// Spin iterations before parking.
const SPIN_LIMIT: u32 = 64;

/// Four-byte futex mutex.
pub struct RawFutex {
    state: AtomicU32,
}

/// Mutex over `T` locked by a [`RawFutex`].
pub type FutexMutex<T> = lock_api::Mutex<RawFutex, T>;

/// Guard returned by [`FutexMutex::lock`].
pub type FutexGuard<'a, T> = lock_api::MutexGuard<'a, RawFutex, T>;

#[cfg(any(target_os = "linux", target_os = "android"))]
fn futex_wait(word: &AtomicU32, expected: u32) {
    // SAFETY: Linux futex syscall with a valid aligned userspace word and no timeout.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            std::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn futex_wake_one(word: &AtomicU32) {
    // SAFETY: Linux futex syscall with a valid aligned userspace word.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1,
        );
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn futex_wait(_word: &AtomicU32, _expected: u32) {
    std::thread::yield_now();
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn futex_wake_one(_word: &AtomicU32) {}

impl RawFutex {
    /// An unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    #[cold]
    fn lock_contended(&self) {
        let mut spins = 0;
        loop {
            let observed = self.state.load(Ordering::Relaxed);
            if observed == UNLOCKED {
                // Claim as CONTENDED: other waiters may still be parked.
                if self
                    .state
                    .compare_exchange(UNLOCKED, CONTENDED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }

            if observed == LOCKED
                && self
                    .state
                    .compare_exchange(LOCKED, CONTENDED, Ordering::Relaxed, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }
            futex_wait(&self.state, CONTENDED);
        }
    }

    /// Whether the word is currently held (racy; for diagnostics and tests).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl Default for RawFutex {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: acquire/release orderings on the state word give mutual exclusion;
// unlock is only reachable through the guard of the holding thread.
unsafe impl lock_api::RawMutex for RawFutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            futex_wake_one(&self.state);
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawFutex::is_locked(self)
    }
}
