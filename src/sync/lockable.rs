// ============================================================================
// prism-props - Lockable
// The non-recursive exclusive lock that gates every property
// ============================================================================
//
// A property's lock is the single gate for its value, its observer list and
// its active-binding slot. The lock is deliberately non-recursive: a binding
// loop that re-enters a write on the same thread deadlocks in release builds
// and trips a fatal assertion in debug builds, instead of silently
// re-entering.
// ============================================================================

use parking_lot::lock_api::{GuardSend, RawMutex as RawMutexTrait};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// THREAD IDENTITY (debug builds)
// =============================================================================

#[cfg(debug_assertions)]
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// A small, monotonically assigned per-thread id. 0 means "no owner".
#[cfg(debug_assertions)]
pub(crate) fn current_thread_id() -> u64 {
    thread_local! {
        static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

// =============================================================================
// RAW LOCKABLE
// =============================================================================

/// The raw lock behind both [`Lockable`] and [`Locked`].
///
/// Wraps `parking_lot::RawMutex` and, in debug builds, tracks the owning
/// thread so that recursive acquisition and non-owner release are reported
/// as fatal assertions rather than silent deadlocks or corruption.
pub struct RawLockable {
    raw: parking_lot::RawMutex,
    #[cfg(debug_assertions)]
    owner: AtomicU64,
}

impl RawLockable {
    #[cfg(debug_assertions)]
    fn assert_not_owner(&self) {
        let me = current_thread_id();
        assert!(
            self.owner.load(Ordering::Relaxed) != me,
            "lock contract violation: recursive acquisition of a non-recursive lock"
        );
    }

    #[cfg(debug_assertions)]
    fn record_owner(&self) {
        self.owner.store(current_thread_id(), Ordering::Relaxed);
    }

    #[cfg(debug_assertions)]
    fn clear_owner(&self) {
        let me = current_thread_id();
        assert!(
            self.owner.load(Ordering::Relaxed) == me,
            "lock contract violation: release by a thread that does not own the lock"
        );
        self.owner.store(0, Ordering::Relaxed);
    }
}

unsafe impl RawMutexTrait for RawLockable {
    const INIT: Self = RawLockable {
        raw: <parking_lot::RawMutex as RawMutexTrait>::INIT,
        #[cfg(debug_assertions)]
        owner: AtomicU64::new(0),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        #[cfg(debug_assertions)]
        self.assert_not_owner();

        self.raw.lock();

        #[cfg(debug_assertions)]
        self.record_owner();
    }

    // No owner assertion here: a try by the owning thread is a query, not
    // a contract violation, and simply fails.
    fn try_lock(&self) -> bool {
        let acquired = self.raw.try_lock();

        #[cfg(debug_assertions)]
        if acquired {
            self.record_owner();
        }

        acquired
    }

    unsafe fn unlock(&self) {
        #[cfg(debug_assertions)]
        self.clear_owner();

        unsafe { self.raw.unlock() }
    }
}

// =============================================================================
// LOCKED<T> - data guarded by a RawLockable
// =============================================================================

/// A value guarded by a [`RawLockable`].
///
/// This is what properties use internally: the value, observer list and
/// active-binding slot all live behind one `Locked<PropertySlots<T>>`, so
/// holding the guard is scoped exclusive access to the whole property.
pub type Locked<T> = parking_lot::lock_api::Mutex<RawLockable, T>;

/// Guard type for [`Locked`].
pub type LockedGuard<'a, T> = parking_lot::lock_api::MutexGuard<'a, RawLockable, T>;

// =============================================================================
// LOCKABLE - the mixin
// =============================================================================

/// Exclusive-access mixin for objects that participate in property
/// ownership.
///
/// `acquire` blocks until the caller holds the lock, `release` relinquishes
/// it, `try_acquire` is non-blocking. The lock is non-recursive: nested
/// acquisition by the same thread deadlocks in release builds and panics in
/// debug builds, as does releasing from a non-owning thread.
///
/// Prefer [`ScopedLock`](crate::sync::ScopedLock) over manual
/// acquire/release pairs.
pub struct Lockable {
    raw: RawLockable,
}

impl Lockable {
    /// Create an unlocked lock.
    pub const fn new() -> Self {
        Self {
            raw: RawLockable::INIT,
        }
    }

    /// Block until this thread holds exclusive access.
    pub fn acquire(&self) {
        self.raw.lock();
    }

    /// Attempt to take exclusive access without blocking.
    pub fn try_acquire(&self) -> bool {
        self.raw.try_lock()
    }

    /// Relinquish exclusive access.
    ///
    /// # Contract
    ///
    /// The calling thread must currently own the lock. Debug builds assert
    /// this; release builds trust the caller.
    pub fn release(&self) {
        unsafe { self.raw.unlock() }
    }
}

impl Default for Lockable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let lock = Lockable::new();
        lock.acquire();
        lock.release();
        lock.acquire();
        lock.release();
    }

    #[test]
    fn try_acquire_reports_contention() {
        let lock = std::sync::Arc::new(Lockable::new());
        lock.acquire();

        let contender = lock.clone();
        let handle = std::thread::spawn(move || contender.try_acquire());
        assert!(!handle.join().unwrap());

        lock.release();

        let contender = lock.clone();
        let handle = std::thread::spawn(move || {
            let got = contender.try_acquire();
            if got {
                contender.release();
            }
            got
        });
        assert!(handle.join().unwrap());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "recursive acquisition")]
    fn recursive_acquire_panics_in_debug() {
        let lock = Lockable::new();
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "release by a thread")]
    fn non_owner_release_panics_in_debug() {
        let lock = std::sync::Arc::new(Lockable::new());
        let owner = lock.clone();
        // The owner thread exits still holding the lock.
        std::thread::spawn(move || owner.acquire()).join().unwrap();
        lock.release();
    }

    #[test]
    fn locked_data_roundtrip() {
        let cell: Locked<i32> = Locked::new(1);
        {
            let mut guard = cell.lock();
            *guard = 5;
        }
        assert_eq!(*cell.lock(), 5);
    }

    #[test]
    fn thread_ids_are_distinct() {
        #[cfg(debug_assertions)]
        {
            let here = current_thread_id();
            let there = std::thread::spawn(current_thread_id).join().unwrap();
            assert_ne!(here, there);
        }
    }
}
