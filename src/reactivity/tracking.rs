// ============================================================================
// prism-props - Read Tracking
// Source discovery: the reads an expression performs define its source set
// ============================================================================
//
// Source discovery is dynamic. While a binding's expression runs, every
// Property::get on the same thread registers the property into the
// evaluation frame's tentative set and subscribes the binding as an
// observer. Expressions with conditional branches therefore narrow or widen
// their dependency set on every pass; the binding diffs the tentative set
// against the previous one afterwards.
// ============================================================================

use std::sync::{Arc, Weak};

use crate::core::context::with_context;
use crate::core::types::{AnyBinding, AnyProperty};

// =============================================================================
// TRACK READ
// =============================================================================

/// Track a read of a property, registering it as a source of the innermost
/// evaluating binding on this thread.
///
/// Called by `Property::get` before taking the property's lock (subscribing
/// takes the lock itself; the lock is non-recursive).
///
/// Outside an evaluation, or once the current frame has stopped collecting,
/// this is a no-op.
pub fn track_read(property: &Arc<dyn AnyProperty>) {
    let Some(binding) = with_context(|ctx| ctx.record_read(property)) else {
        return;
    };

    // Subscribe-at-read: newcomers are wired immediately, so a pass that
    // fails partway cannot leave a source notifying a binding that never
    // recorded it.
    if let Some(binding) = binding.upgrade() {
        property.subscribe(&binding);
    }
}

// =============================================================================
// EVAL SCOPE
// =============================================================================

/// RAII frame for one evaluation pass.
///
/// Pushed when a pass begins and popped on every exit path. The frame stays
/// on the stack through the write-back so the target can recognize the
/// write as binding-originated, but collection stops before the diff.
pub(crate) struct EvalScope {
    _private: (),
}

impl EvalScope {
    /// Begin an evaluation pass for `binding` on this thread.
    pub fn enter(binding: Weak<dyn AnyBinding>) -> Self {
        with_context(|ctx| ctx.push_frame(binding));
        Self { _private: () }
    }

    /// Stop collecting reads and take the tentative source set.
    pub fn stop_tracking(&self) -> Vec<Arc<dyn AnyProperty>> {
        with_context(|ctx| ctx.stop_collecting())
    }
}

impl Drop for EvalScope {
    fn drop(&mut self) {
        with_context(|ctx| ctx.pop_frame());
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::is_evaluating;
    use crate::primitives::property::property;

    #[test]
    fn track_read_outside_evaluation_does_nothing() {
        let p = property(42);
        track_read(&p.as_any_property());
        assert_eq!(p.observer_count(), 0);
    }

    #[test]
    fn eval_scope_nests_and_unwinds() {
        assert!(!is_evaluating());

        let a = property(1);
        let b = property(2);
        let binding = crate::primitives::binding::bind(&a, move || 0);
        let weak = binding.as_weak_binding();

        {
            let outer = EvalScope::enter(weak.clone());
            assert!(is_evaluating());

            track_read(&b.as_any_property());
            track_read(&b.as_any_property()); // duplicate read

            let tentative = outer.stop_tracking();
            assert_eq!(tentative.len(), 1, "duplicate reads collapse");

            // After stop_tracking, further reads are not collected.
            let c = property(3);
            track_read(&c.as_any_property());
            assert_eq!(c.observer_count(), 0);

            {
                let _inner = EvalScope::enter(weak.clone());
                assert!(is_evaluating());
            }
            assert!(is_evaluating());
        }
        assert!(!is_evaluating());

        // The duplicate-collapsed read subscribed the binding exactly once.
        assert_eq!(b.observer_count(), 1);
    }
}
