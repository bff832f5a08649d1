// ============================================================================
// prism-props - Type Definitions
// Type-erased traits and enums for the binding graph
// ============================================================================
//
// These traits enable heterogeneous storage in the binding graph.
// Graph operations (notify, subscribe, detach) don't need to know the value
// type T; only reading and writing values does. So observer lists can be
// Vec<Weak<dyn AnyBinding>> and source sets Vec<Arc<dyn AnyProperty>>,
// while the concrete Property<T> and Binding<T> hold the actual values.
// ============================================================================

use std::any::Any;
use std::sync::{Arc, Weak};

use super::error::BindError;
use crate::primitives::group::GroupInner;

// =============================================================================
// ENUMS
// =============================================================================

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Not wired to anything; source writes do not reach the target.
    Detached,
    /// Driving its target; subscribed to every source its expression reads.
    Attached,
    /// An evaluation pass is underway on some thread. Transient; re-entry
    /// queues instead of recursing.
    Evaluating,
    /// A source or the target was destroyed, or the expression failed.
    /// Implicitly detached; never evaluates again.
    Invalid,
}

/// Behavior applied when an external write lands on a bound target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingPolicy {
    /// The write detaches the active binding (the write still proceeds).
    #[default]
    DetachOnWrite,
    /// The write proceeds and the binding stays attached; the next source
    /// change overwrites the manual value.
    KeepOnWrite,
}

/// Equality function type for comparing property values.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default equality using PartialEq.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

// =============================================================================
// TYPE-ERASED TRAITS
// =============================================================================

/// Type-erased property interface for binding graph operations.
///
/// Implemented by `PropertyInner<T>`. Lets a binding hold sources of
/// different value types in one set, and lets properties be published into
/// a registry without knowing their type.
pub trait AnyProperty: Any + Send + Sync {
    /// Register a binding as an observer. Idempotent: at most one entry
    /// per binding.
    fn subscribe(&self, binding: &Arc<dyn AnyBinding>);

    /// Remove a binding from the observer list. Dead weak entries are
    /// pruned along the way.
    fn unsubscribe(&self, binding: &Arc<dyn AnyBinding>);

    /// Drop observer entries whose bindings no longer exist.
    fn prune_observers(&self);

    /// Number of live observers.
    fn observer_count(&self) -> usize;

    /// How many observer entries point at the given binding. Invariant:
    /// never more than one.
    fn counts_observer(&self, binding: &Arc<dyn AnyBinding>) -> usize;

    /// Upcast for downcasting to the concrete `PropertyInner<T>`.
    fn as_any(&self) -> &dyn Any;
}

/// Type-erased binding interface for notification and lifecycle.
///
/// Implemented by `BindingInner<T>`. A property's observer list and
/// active-binding slot hold these weakly; groups hold them strongly.
pub trait AnyBinding: Any + Send + Sync {
    /// A source this binding observes has changed. Evaluates, or queues if
    /// an evaluation pass is already underway.
    fn notify(&self);

    /// Current lifecycle state.
    fn state(&self) -> BindingState;

    /// The policy governing external target writes: the group's policy if
    /// this binding is grouped, its own otherwise.
    fn effective_policy(&self) -> BindingPolicy;

    /// Unwire from every source and release the target slot. Idempotent.
    fn detach(&self);

    /// Apply a detach decision taken by a target write: detaches the whole
    /// group when grouped, just this binding otherwise.
    fn detach_per_policy(&self);

    /// Attach on behalf of the owning group, bypassing the member check.
    fn attach_for_group(&self) -> Result<(), BindError>;

    /// Install or clear group membership.
    fn set_group(&self, group: Option<Weak<GroupInner>>);

    /// A source property identified by its data pointer is being destroyed:
    /// forget it and become invalid.
    fn purge_source(&self, source_ptr: *const ());

    /// Upcast for downcasting to the concrete `BindingInner<T>`.
    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// POINTER IDENTITY HELPERS
// =============================================================================

/// Data-pointer identity of a type-erased property.
pub(crate) fn property_ptr(property: &Arc<dyn AnyProperty>) -> *const () {
    Arc::as_ptr(property) as *const ()
}

/// Data-pointer identity of a weakly held property. Valid for comparison
/// even after the property is dropped.
pub(crate) fn property_weak_ptr(property: &Weak<dyn AnyProperty>) -> *const () {
    Weak::as_ptr(property) as *const ()
}

/// Data-pointer identity of a type-erased binding.
pub(crate) fn binding_ptr(binding: &Arc<dyn AnyBinding>) -> *const () {
    Arc::as_ptr(binding) as *const ()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_to_detach_on_write() {
        assert_eq!(BindingPolicy::default(), BindingPolicy::DetachOnWrite);
    }

    #[test]
    fn default_equals_uses_partial_eq() {
        assert!(default_equals(&3, &3));
        assert!(!default_equals(&3, &4));
        assert!(default_equals(&"a", &"a"));
    }

    #[test]
    fn states_are_distinct() {
        assert_ne!(BindingState::Detached, BindingState::Attached);
        assert_ne!(BindingState::Attached, BindingState::Evaluating);
        assert_ne!(BindingState::Evaluating, BindingState::Invalid);
    }
}
