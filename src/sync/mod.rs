// ============================================================================
// prism-props - Synchronization primitives
// ============================================================================
//
// The Lockable mixin and its scoped helpers. Every property owns one
// non-recursive lock; the binding core never holds two property locks at
// the same time.
// ============================================================================

pub mod guards;
pub mod lockable;

pub use guards::{FlagScope, ScopedLock};
pub use lockable::{Lockable, Locked, LockedGuard, RawLockable};
