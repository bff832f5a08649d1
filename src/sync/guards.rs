// ============================================================================
// prism-props - Scoped guards
// RAII helpers: a lock held for a lexical region, a flag set for one
// ============================================================================

use std::cell::Cell;

use super::lockable::Lockable;

// =============================================================================
// SCOPED LOCK
// =============================================================================

/// Holds a [`Lockable`] for a lexical region.
///
/// Acquires on construction and releases on every exit path, including
/// panics unwinding through the scope.
///
/// # Example
///
/// ```
/// use prism_props::sync::{Lockable, ScopedLock};
///
/// let lock = Lockable::new();
/// {
///     let _guard = ScopedLock::new(&lock);
///     // exclusive access here
/// }
/// assert!(lock.try_acquire());
/// lock.release();
/// ```
pub struct ScopedLock<'a> {
    lock: &'a Lockable,
}

impl<'a> ScopedLock<'a> {
    /// Acquire the lock, blocking until it is held.
    pub fn new(lock: &'a Lockable) -> Self {
        lock.acquire();
        Self { lock }
    }

    /// Acquire the lock without blocking, returning `None` on contention.
    pub fn try_new(lock: &'a Lockable) -> Option<Self> {
        if lock.try_acquire() {
            Some(Self { lock })
        } else {
            None
        }
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

// =============================================================================
// FLAG SCOPE
// =============================================================================

/// Sets a boolean flag for a lexical region and restores the previous value
/// on every exit path.
///
/// The binding core uses this discipline for its thread-local "this write
/// originated from a binding" flag; the generic form here works over any
/// `Cell<bool>` a consumer object owns.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use prism_props::sync::FlagScope;
///
/// let evaluating = Cell::new(false);
/// {
///     let _scope = FlagScope::set(&evaluating);
///     assert!(evaluating.get());
/// }
/// assert!(!evaluating.get());
/// ```
pub struct FlagScope<'a> {
    flag: &'a Cell<bool>,
    prev: bool,
}

impl<'a> FlagScope<'a> {
    /// Set the flag to `true` for the duration of the scope.
    pub fn set(flag: &'a Cell<bool>) -> Self {
        let prev = flag.replace(true);
        Self { flag, prev }
    }

    /// Set the flag to `false` for the duration of the scope.
    pub fn clear(flag: &'a Cell<bool>) -> Self {
        let prev = flag.replace(false);
        Self { flag, prev }
    }
}

impl Drop for FlagScope<'_> {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lock_releases_on_drop() {
        let lock = Lockable::new();
        {
            let _guard = ScopedLock::new(&lock);
            assert!(ScopedLock::try_new(&lock).is_none());
        }
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn scoped_lock_releases_on_panic() {
        let lock = std::sync::Arc::new(Lockable::new());
        let inner = lock.clone();

        let result = std::thread::spawn(move || {
            let _guard = ScopedLock::new(&inner);
            panic!("boom");
        })
        .join();
        assert!(result.is_err());

        // The panicking thread's guard must have released the lock.
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn flag_scope_restores_previous_value() {
        let flag = Cell::new(false);
        {
            let _outer = FlagScope::set(&flag);
            assert!(flag.get());
            {
                let _inner = FlagScope::clear(&flag);
                assert!(!flag.get());
            }
            assert!(flag.get());
        }
        assert!(!flag.get());
    }
}
