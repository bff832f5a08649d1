// ============================================================================
// prism-props - Binding Primitive
// Connects N source properties to one target through an expression
// ============================================================================
//
// The evaluation algorithm:
// 1. Guard: only an ATTACHED, enabled binding evaluates. A notification
//    arriving while a pass is underway sets the queued flag and returns -
//    that is the cycle-suppression contract, not an error.
// 2. A pass runs the expression inside an EvalScope; every property read
//    registers into the tentative source set and subscribes this binding.
// 3. The tentative set is diffed against the previous one: dropouts are
//    unsubscribed (newcomers were wired at read time).
// 4. The result is written to the target with the binding-write flag set,
//    which bypasses the detach-on-write policy for this one write.
// 5. On exit, at most one queued notification is drained into a follow-up
//    pass. A flag raised during the follow-up waits for the next trigger.
// ============================================================================

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::context::BindingWriteScope;
use crate::core::error::{BindError, EvalError};
use crate::core::types::{
    AnyBinding, AnyProperty, BindingPolicy, BindingState, property_ptr, property_weak_ptr,
};
use crate::primitives::group::GroupInner;
use crate::primitives::property::Property;
use crate::reactivity::tracking::EvalScope;

type ExprFn<T> = Box<dyn Fn() -> Result<T, EvalError> + Send + Sync>;

// =============================================================================
// BINDING INNER
// =============================================================================

/// State machine and source set, guarded by the binding's own short-lived
/// mutex. Never held across the expression, a target write, or another
/// property's lock acquisition.
struct BindingSlots {
    state: BindingState,
    enabled: bool,
    /// One queued notification, drained on pass exit. Length-one by
    /// construction: re-entrant notifications collapse into this flag.
    queued: bool,
    /// The expression failure that invalidated this binding, if any.
    /// Attach surfaces it to the caller.
    last_error: Option<EvalError>,
    /// The properties the last pass read. Weak: a binding observes its
    /// sources, it does not own them. A source's destruction reaches us
    /// through purge_source.
    sources: Vec<Weak<dyn AnyProperty>>,
}

/// Policy and group membership, on a separate lock so a target write (which
/// holds the target property's lock) can consult them without ordering
/// against the state machine.
struct BindingMeta {
    policy: BindingPolicy,
    group: Option<Weak<GroupInner>>,
}

/// The shared state behind a [`Binding`] handle.
pub struct BindingInner<T: Send + Sync + 'static> {
    target: Property<T>,
    expr: ExprFn<T>,
    slots: Mutex<BindingSlots>,
    meta: Mutex<BindingMeta>,
    self_weak: Weak<BindingInner<T>>,
}

impl<T: Send + Sync + 'static> BindingInner<T> {
    fn ptr(&self) -> *const () {
        self as *const Self as *const ()
    }

    fn weak_dyn(&self) -> Weak<dyn AnyBinding>
    where
        T: Clone,
    {
        let weak: Weak<dyn AnyBinding> = self.self_weak.clone();
        weak
    }

    fn as_dyn(&self) -> Option<Arc<dyn AnyBinding>>
    where
        T: Clone,
    {
        self.self_weak.upgrade().map(|arc| {
            let arc: Arc<dyn AnyBinding> = arc;
            arc
        })
    }
}

impl<T: Clone + Send + Sync + 'static> BindingInner<T> {
    /// Attach, regardless of group membership.
    fn attach_inner(&self) -> Result<(), BindError> {
        {
            let mut slots = self.slots.lock();
            match slots.state {
                BindingState::Attached | BindingState::Evaluating => return Ok(()),
                BindingState::Invalid => return Err(BindError::InvalidBinding),
                BindingState::Detached => {}
            }

            let me = self.as_dyn().ok_or(BindError::InvalidBinding)?;
            self.target.try_seize(&me)?;
            slots.state = BindingState::Attached;
        }

        tracing::debug!("binding attached");
        // Initial evaluation populates the source set and drives the target.
        self.evaluate();

        // A failed first evaluation is an attach failure, surfaced to the
        // caller rather than only through the target's change signal.
        let failed = {
            let slots = self.slots.lock();
            if slots.state == BindingState::Invalid {
                Some(slots.last_error.clone())
            } else {
                None
            }
        };
        match failed {
            Some(Some(error)) => Err(BindError::EvaluationFailed(error)),
            Some(None) => Err(BindError::InvalidBinding),
            None => Ok(()),
        }
    }

    /// Unwire from every source and release the target slot. Idempotent.
    fn detach_inner(&self) {
        let sources = {
            let mut slots = self.slots.lock();
            match slots.state {
                BindingState::Detached | BindingState::Invalid => return,
                BindingState::Attached | BindingState::Evaluating => {}
            }
            slots.state = BindingState::Detached;
            slots.queued = false;
            std::mem::take(&mut slots.sources)
        };

        match self.as_dyn() {
            Some(me) => {
                for source in sources.iter().filter_map(Weak::upgrade) {
                    source.unsubscribe(&me);
                }
            }
            // Mid-drop: our weak refs are already dead, pruning suffices.
            None => {
                for source in sources.iter().filter_map(Weak::upgrade) {
                    source.prune_observers();
                }
            }
        }
        self.target.clear_active_if(self.ptr());
        tracing::debug!("binding detached");
    }

    /// Run the evaluation algorithm: one pass, then at most one drained
    /// follow-up.
    pub(crate) fn evaluate(&self) {
        if !self.run_pass() {
            return;
        }
        let drain = {
            let mut slots = self.slots.lock();
            std::mem::take(&mut slots.queued)
        };
        if drain {
            self.run_pass();
        }
    }

    /// One evaluation pass. Returns false when no pass ran (not attached,
    /// disabled, or a pass was already underway and got queued instead).
    fn run_pass(&self) -> bool {
        let prev_sources = {
            let mut slots = self.slots.lock();
            match slots.state {
                BindingState::Evaluating => {
                    // Re-entrant trigger: the current pass is already
                    // underway. Queue and bail.
                    slots.queued = true;
                    return false;
                }
                BindingState::Attached => {}
                BindingState::Detached | BindingState::Invalid => return false,
            }
            if !slots.enabled {
                return false;
            }
            slots.state = BindingState::Evaluating;
            slots.queued = false;
            slots.sources.clone()
        };

        // The frame stays on the stack through the write-back so the target
        // recognizes the write as binding-originated; collection stops
        // before the diff.
        let scope = EvalScope::enter(self.weak_dyn());
        let result = (self.expr)();
        let tentative = scope.stop_tracking();

        match result {
            Ok(value) => {
                // Dropouts: previous sources the expression no longer read.
                // Newcomers were subscribed during the reads themselves.
                if let Some(me) = self.as_dyn() {
                    for old in prev_sources.iter().filter_map(Weak::upgrade) {
                        let old_ptr = property_ptr(&old);
                        if !tentative.iter().any(|t| property_ptr(t) == old_ptr) {
                            old.unsubscribe(&me);
                        }
                    }
                }

                let detached_mid_pass = {
                    let mut slots = self.slots.lock();
                    if slots.state == BindingState::Evaluating {
                        slots.sources = tentative.iter().map(Arc::downgrade).collect();
                        false
                    } else {
                        true
                    }
                };
                if detached_mid_pass {
                    // A concurrent detach won the state machine; undo the
                    // subscriptions this pass installed and skip the write.
                    if let Some(me) = self.as_dyn() {
                        for source in &tentative {
                            source.unsubscribe(&me);
                        }
                    }
                    return true;
                }

                {
                    let _origin = BindingWriteScope::enter();
                    self.target.set(value);
                }

                let mut slots = self.slots.lock();
                if slots.state == BindingState::Evaluating {
                    slots.state = BindingState::Attached;
                }
                true
            }
            Err(error) => {
                self.fail(error, prev_sources, tentative);
                true
            }
        }
    }

    /// Expression failure: become INVALID, unwire cleanly, report through
    /// the target's change signal. Never unwinds into the notifier.
    fn fail(
        &self,
        error: EvalError,
        prev_sources: Vec<Weak<dyn AnyProperty>>,
        tentative: Vec<Arc<dyn AnyProperty>>,
    ) {
        tracing::error!(error = %error, "binding expression failed; binding invalidated");

        {
            let mut slots = self.slots.lock();
            slots.state = BindingState::Invalid;
            slots.queued = false;
            slots.sources.clear();
            slots.last_error = Some(error.clone());
        }

        if let Some(me) = self.as_dyn() {
            for source in prev_sources
                .iter()
                .filter_map(Weak::upgrade)
                .chain(tentative.iter().cloned())
            {
                source.unsubscribe(&me);
            }
        }
        self.target.clear_active_if(self.ptr());
        self.target.dispatch_error(error);
    }

    fn set_enabled_inner(&self, enabled: bool) {
        let reevaluate = {
            let mut slots = self.slots.lock();
            if slots.enabled == enabled {
                return;
            }
            slots.enabled = enabled;
            enabled && slots.state == BindingState::Attached
        };
        // Re-enabling catches up on whatever was missed while disabled.
        if reevaluate {
            self.evaluate();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AnyBinding for BindingInner<T> {
    fn notify(&self) {
        let run = {
            let mut slots = self.slots.lock();
            match slots.state {
                BindingState::Evaluating => {
                    slots.queued = true;
                    false
                }
                BindingState::Attached => slots.enabled,
                BindingState::Detached | BindingState::Invalid => false,
            }
        };
        if run {
            self.evaluate();
        }
    }

    fn state(&self) -> BindingState {
        self.slots.lock().state
    }

    fn effective_policy(&self) -> BindingPolicy {
        let meta = self.meta.lock();
        match meta.group.as_ref().and_then(Weak::upgrade) {
            Some(group) => group.policy(),
            None => meta.policy,
        }
    }

    fn detach(&self) {
        self.detach_inner();
    }

    fn detach_per_policy(&self) {
        let group = self.meta.lock().group.as_ref().and_then(Weak::upgrade);
        match group {
            // A detach decision on one member detaches the whole group.
            Some(group) => group.detach_members(),
            None => self.detach_inner(),
        }
    }

    fn attach_for_group(&self) -> Result<(), BindError> {
        self.attach_inner()
    }

    fn set_group(&self, group: Option<Weak<GroupInner>>) {
        self.meta.lock().group = group;
    }

    fn purge_source(&self, source_ptr: *const ()) {
        let remaining = {
            let mut slots = self.slots.lock();
            let before = slots.sources.len();
            slots.sources.retain(|s| property_weak_ptr(s) != source_ptr);
            if slots.sources.len() == before {
                return;
            }
            slots.state = BindingState::Invalid;
            slots.queued = false;
            std::mem::take(&mut slots.sources)
        };

        tracing::debug!("source destroyed; binding invalidated");
        if let Some(me) = self.as_dyn() {
            for source in remaining.iter().filter_map(Weak::upgrade) {
                source.unsubscribe(&me);
            }
        }
        self.target.clear_active_if(self.ptr());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Send + Sync + 'static> Drop for BindingInner<T> {
    fn drop(&mut self) {
        // Last strong reference gone: behave as a detach. Weak observer
        // entries pointing here are already dead; prune them and release a
        // stale target slot.
        let sources = std::mem::take(&mut self.slots.get_mut().sources);
        for source in sources.iter().filter_map(Weak::upgrade) {
            source.prune_observers();
        }
        self.target.clear_dead_active();
    }
}

// =============================================================================
// BINDING<T> - The public handle
// =============================================================================

/// A binding driving one target property from the properties its expression
/// reads.
///
/// Created detached by [`bind`] or [`bind_fallible`]; [`attach`](Self::attach)
/// wires it up and evaluates once. The creator's handle (and, transitively,
/// any group) is the strong owner: dropping the last handle of an attached
/// binding tears the wiring down.
///
/// # Example
///
/// ```
/// use prism_props::{bind, property};
///
/// let celsius = property(20.0_f64);
/// let fahrenheit = property(0.0_f64);
///
/// let b = bind(&fahrenheit, {
///     let celsius = celsius.clone();
///     move || celsius.get() * 9.0 / 5.0 + 32.0
/// });
/// b.attach().unwrap();
/// assert_eq!(fahrenheit.get(), 68.0);
///
/// celsius.set(25.0);
/// assert_eq!(fahrenheit.get(), 77.0);
/// ```
pub struct Binding<T: Send + Sync + 'static> {
    inner: Arc<BindingInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Binding<T> {
    fn new(target: Property<T>, expr: ExprFn<T>) -> Self {
        let inner = Arc::new_cyclic(|weak| BindingInner {
            target,
            expr,
            slots: Mutex::new(BindingSlots {
                state: BindingState::Detached,
                enabled: true,
                queued: false,
                last_error: None,
                sources: Vec::new(),
            }),
            meta: Mutex::new(BindingMeta {
                policy: BindingPolicy::default(),
                group: None,
            }),
            self_weak: weak.clone(),
        });
        Self { inner }
    }

    /// Install this binding as its target's active driver and evaluate
    /// once.
    ///
    /// Errors with [`BindError::AlreadyBound`] when another binding holds
    /// the target, [`BindError::InvalidBinding`] after invalidation, and
    /// [`BindError::Grouped`] for group members (the group attaches them).
    /// Attaching an attached binding is a no-op.
    pub fn attach(&self) -> Result<(), BindError> {
        if self.is_grouped() {
            return Err(BindError::Grouped);
        }
        self.inner.attach_inner()
    }

    /// Unwire from every source and release the target. Idempotent; a
    /// detached binding never receives another notification.
    pub fn detach(&self) {
        self.inner.detach_inner();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BindingState {
        AnyBinding::state(&*self.inner)
    }

    /// This binding's own policy (a group's policy overrides it while the
    /// binding is grouped).
    pub fn policy(&self) -> BindingPolicy {
        self.inner.meta.lock().policy
    }

    /// Set the policy applied to subsequent external target writes.
    pub fn set_policy(&self, policy: BindingPolicy) {
        self.inner.meta.lock().policy = policy;
    }

    /// Whether a live group currently governs this binding.
    pub fn is_grouped(&self) -> bool {
        let meta = self.inner.meta.lock();
        meta.group.as_ref().is_some_and(|g| g.upgrade().is_some())
    }

    /// Enable or disable evaluation. A disabled binding stays attached but
    /// ignores source notifications; re-enabling evaluates once.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.set_enabled_inner(enabled);
    }

    /// Whether source notifications currently trigger evaluation.
    pub fn is_enabled(&self) -> bool {
        self.inner.slots.lock().enabled
    }

    /// Number of sources the last evaluation pass read.
    pub fn source_count(&self) -> usize {
        self.inner.slots.lock().sources.len()
    }

    /// This binding as a type-erased graph participant.
    pub fn as_any_binding(&self) -> Arc<dyn AnyBinding> {
        self.inner.clone()
    }

    /// Weak form of [`as_any_binding`](Self::as_any_binding).
    pub fn as_weak_binding(&self) -> Weak<dyn AnyBinding> {
        self.inner.weak_dyn()
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a detached binding computing `target` from the properties
/// `expression` reads.
pub fn bind<T, F>(target: &Property<T>, expression: F) -> Binding<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Binding::new(target.clone(), Box::new(move || Ok(expression())))
}

/// Like [`bind`], for expressions that can fail. A failure invalidates the
/// binding and is reported through the target's change signal.
pub fn bind_fallible<T, F>(target: &Property<T>, expression: F) -> Binding<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
{
    Binding::new(target.clone(), Box::new(expression))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::property::{PropertyEvent, property};

    #[test]
    fn bindings_start_detached() {
        let a = property(1);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || a.get() + 1
        });

        assert_eq!(binding.state(), BindingState::Detached);
        assert_eq!(b.get(), 0, "no evaluation before attach");

        a.set(10);
        assert_eq!(b.get(), 0);
    }

    #[test]
    fn attach_evaluates_and_tracks_sources() {
        let a = property(3);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || a.get() * 2
        });

        binding.attach().unwrap();
        assert_eq!(binding.state(), BindingState::Attached);
        assert_eq!(b.get(), 6);
        assert_eq!(binding.source_count(), 1);
        assert_eq!(a.counts_observer(&binding.as_any_binding()), 1);
        assert!(b.is_bound());
    }

    #[test]
    fn attach_twice_is_a_noop() {
        let a = property(1);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || a.get()
        });

        binding.attach().unwrap();
        binding.attach().unwrap();
        assert_eq!(a.counts_observer(&binding.as_any_binding()), 1);
    }

    #[test]
    fn second_binding_on_same_target_is_rejected() {
        let a = property(1);
        let b = property(0);

        let first = bind(&b, {
            let a = a.clone();
            move || a.get()
        });
        let second = bind(&b, {
            let a = a.clone();
            move || a.get() + 100
        });

        first.attach().unwrap();
        assert!(matches!(second.attach(), Err(BindError::AlreadyBound)));

        // After an explicit detach the slot is free.
        first.detach();
        second.attach().unwrap();
        assert_eq!(b.get(), 101);
    }

    #[test]
    fn detach_stops_propagation_and_is_idempotent() {
        let a = property(1);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || a.get()
        });

        binding.attach().unwrap();
        binding.detach();
        binding.detach();

        assert_eq!(binding.state(), BindingState::Detached);
        assert_eq!(a.observer_count(), 0);
        assert!(!b.is_bound());

        a.set(42);
        assert_eq!(b.get(), 1, "detached binding no longer drives the target");
    }

    #[test]
    fn disabled_binding_ignores_sources_until_reenabled() {
        let a = property(1);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || a.get() * 10
        });
        binding.attach().unwrap();
        assert_eq!(b.get(), 10);

        binding.set_enabled(false);
        a.set(5);
        assert_eq!(b.get(), 10, "disabled binding skipped the update");
        assert_eq!(binding.state(), BindingState::Attached);

        binding.set_enabled(true);
        assert_eq!(b.get(), 50, "re-enabling evaluates once");
    }

    #[test]
    fn self_referential_write_terminates() {
        // The expression writes to its own source: the nested notification
        // is queued, the pass completes, and exactly one follow-up drains.
        let a = property(0);
        let b = property(0);
        let binding = bind(&b, {
            let a = a.clone();
            move || {
                let v = a.get();
                if v < 3 {
                    a.set(v + 1);
                }
                v
            }
        });

        binding.attach().unwrap();
        // Pass 1 reads a=0 and bumps it to 1; the follow-up reads a=1 and
        // bumps it to 2; further queued flags wait for the next trigger.
        assert_eq!(b.get(), 1);
        assert_eq!(a.get(), 2);
        assert_eq!(binding.state(), BindingState::Attached);
    }

    #[test]
    fn failed_expression_invalidates_and_reports() {
        use std::sync::Mutex;

        let a = property(1);
        let b = property(0);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        b.on_change(move |event| {
            if let PropertyEvent::BindingFailed(err) = event {
                sink.lock().unwrap().push(err.to_string());
            }
        });

        let binding = bind_fallible(&b, {
            let a = a.clone();
            move || {
                let v = a.get();
                if v > 1 {
                    Err(Arc::new(std::io::Error::other("divergence")) as EvalError)
                } else {
                    Ok(v)
                }
            }
        });

        binding.attach().unwrap();
        assert_eq!(b.get(), 1);
        assert_eq!(binding.state(), BindingState::Attached);

        a.set(5);
        assert_eq!(binding.state(), BindingState::Invalid);
        assert_eq!(a.observer_count(), 0, "no partially wired observers");
        assert!(!b.is_bound());
        assert_eq!(failures.lock().unwrap().len(), 1);

        // Invalid bindings refuse to attach again.
        assert!(matches!(binding.attach(), Err(BindError::InvalidBinding)));
    }

    #[test]
    fn attach_surfaces_initial_evaluation_failure() {
        let target = property(0);
        let binding = bind_fallible(&target, || {
            Err(Arc::new(std::io::Error::other("no input")) as EvalError)
        });

        let err = binding.attach().unwrap_err();
        assert!(matches!(err, BindError::EvaluationFailed(_)));
        assert_eq!(binding.state(), BindingState::Invalid);
        assert!(!target.is_bound());
    }

    #[test]
    fn dropping_binding_stops_propagation() {
        let a = property(1);
        let b = property(0);
        {
            let binding = bind(&b, {
                let a = a.clone();
                move || a.get()
            });
            binding.attach().unwrap();
            assert_eq!(b.get(), 1);
        }

        a.set(9);
        assert_eq!(b.get(), 1, "dropped binding no longer drives the target");
        assert!(!b.is_bound());
        assert_eq!(a.observer_count(), 0);
    }
}
