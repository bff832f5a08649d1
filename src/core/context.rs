// ============================================================================
// prism-props - Evaluation Context
// Thread-local state for the currently evaluating binding
// ============================================================================
//
// Evaluation is synchronous and runs to completion on one thread, so nested
// evaluations (a binding's write-back triggering a downstream binding) form
// a strict stack. Each frame records which binding is evaluating and the
// tentative source set its reads are building.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

use super::types::{AnyBinding, AnyProperty, property_ptr};

// =============================================================================
// EVALUATION FRAME
// =============================================================================

/// One nested evaluation in progress on this thread.
pub(crate) struct EvalFrame {
    /// The binding whose expression is running.
    pub binding: Weak<dyn AnyBinding>,

    /// Sources read so far by this frame's expression, in read order and
    /// deduplicated by pointer identity.
    pub tentative: Vec<Arc<dyn AnyProperty>>,

    /// While true, reads register into `tentative`. Cleared once the
    /// expression finishes so reads inside dispatch callbacks cannot widen
    /// a source set that has already been diffed.
    pub collecting: bool,
}

// =============================================================================
// EVAL CONTEXT
// =============================================================================

/// Thread-local evaluation context for the binding core.
pub struct EvalContext {
    /// Stack of nested evaluations; the innermost frame is last.
    frames: RefCell<Vec<EvalFrame>>,

    /// Whether the write currently in flight originated from a binding's
    /// write-back (set around `Property::set` during evaluation).
    binding_write: Cell<bool>,
}

impl EvalContext {
    fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            binding_write: Cell::new(false),
        }
    }

    // =========================================================================
    // FRAME STACK
    // =========================================================================

    pub(crate) fn push_frame(&self, binding: Weak<dyn AnyBinding>) {
        self.frames.borrow_mut().push(EvalFrame {
            binding,
            tentative: Vec::new(),
            collecting: true,
        });
    }

    pub(crate) fn pop_frame(&self) {
        self.frames.borrow_mut().pop();
    }

    /// The binding evaluating innermost on this thread, if any.
    pub(crate) fn current_binding(&self) -> Option<Weak<dyn AnyBinding>> {
        self.frames.borrow().last().map(|f| f.binding.clone())
    }

    /// Whether any evaluation is underway on this thread.
    pub fn is_evaluating(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// Depth of nested evaluations on this thread.
    pub fn evaluation_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read against the innermost frame.
    ///
    /// Returns the evaluating binding when the property was newly added to
    /// the tentative set (the caller then subscribes it); `None` when there
    /// is no collecting frame or the property was already recorded.
    pub(crate) fn record_read(
        &self,
        property: &Arc<dyn AnyProperty>,
    ) -> Option<Weak<dyn AnyBinding>> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.last_mut()?;
        if !frame.collecting {
            return None;
        }

        let ptr = property_ptr(property);
        if frame.tentative.iter().any(|p| property_ptr(p) == ptr) {
            return None;
        }
        frame.tentative.push(property.clone());
        Some(frame.binding.clone())
    }

    /// Snapshot and close the innermost frame's tentative source set.
    pub(crate) fn stop_collecting(&self) -> Vec<Arc<dyn AnyProperty>> {
        let mut frames = self.frames.borrow_mut();
        match frames.last_mut() {
            Some(frame) => {
                frame.collecting = false;
                std::mem::take(&mut frame.tentative)
            }
            None => Vec::new(),
        }
    }

    // =========================================================================
    // BINDING-WRITE FLAG
    // =========================================================================

    /// Set the binding-write flag, returning the previous value.
    pub(crate) fn set_binding_write(&self, value: bool) -> bool {
        self.binding_write.replace(value)
    }

    /// Whether the write currently in flight came from a binding.
    pub fn is_binding_write(&self) -> bool {
        self.binding_write.get()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: EvalContext = EvalContext::new();
}

/// Access the thread-local evaluation context.
pub fn with_context<R>(f: impl FnOnce(&EvalContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Whether a binding evaluation is underway on the calling thread.
pub fn is_evaluating() -> bool {
    with_context(|ctx| ctx.is_evaluating())
}

/// Depth of nested binding evaluations on the calling thread.
pub fn evaluation_depth() -> usize {
    with_context(|ctx| ctx.evaluation_depth())
}

// =============================================================================
// BINDING WRITE SCOPE
// =============================================================================

/// Marks writes on the current thread as binding-originated for a lexical
/// region, restoring the previous flag on every exit path.
///
/// This is the thread-local instance of the
/// [`FlagScope`](crate::sync::FlagScope) discipline; it exists separately
/// because the flag lives inside the thread-local context and cannot be
/// borrowed out of it.
pub(crate) struct BindingWriteScope {
    prev: bool,
}

impl BindingWriteScope {
    pub fn enter() -> Self {
        Self {
            prev: with_context(|ctx| ctx.set_binding_write(true)),
        }
    }
}

impl Drop for BindingWriteScope {
    fn drop(&mut self) {
        let prev = self.prev;
        with_context(|ctx| {
            ctx.set_binding_write(prev);
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_idle() {
        with_context(|ctx| {
            assert!(!ctx.is_evaluating());
            assert_eq!(ctx.evaluation_depth(), 0);
            assert!(!ctx.is_binding_write());
        });
    }

    #[test]
    fn binding_write_scope_restores() {
        assert!(!with_context(|ctx| ctx.is_binding_write()));
        {
            let _scope = BindingWriteScope::enter();
            assert!(with_context(|ctx| ctx.is_binding_write()));
            {
                let _nested = BindingWriteScope::enter();
                assert!(with_context(|ctx| ctx.is_binding_write()));
            }
            assert!(with_context(|ctx| ctx.is_binding_write()));
        }
        assert!(!with_context(|ctx| ctx.is_binding_write()));
    }

    #[test]
    fn record_read_without_frame_is_ignored() {
        use crate::primitives::property::property;

        let p = property(1);
        let erased = p.as_any_property();
        let registered = with_context(|ctx| ctx.record_read(&erased));
        assert!(registered.is_none());
    }

    #[test]
    fn stop_collecting_without_frame_is_empty() {
        let taken = with_context(|ctx| ctx.stop_collecting());
        assert!(taken.is_empty());
    }
}
