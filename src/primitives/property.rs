// ============================================================================
// prism-props - Property Primitive
// A typed cell with change notification, a lock, and a binding slot
// ============================================================================
//
// Locking discipline: one non-recursive lock per property guards the value,
// the observer list, the active-binding slot and the callback table. The
// lock is always released before notifications are dispatched, so a
// binding's expression may freely read other properties from inside a
// dispatch without ordering two property locks against each other.
// ============================================================================

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::core::context::with_context;
use crate::core::error::{BindError, EvalError};
use crate::core::types::{
    AnyBinding, AnyProperty, BindingPolicy, EqualsFn, binding_ptr, default_equals,
};
use crate::reactivity::tracking::track_read;
use crate::sync::Locked;

// =============================================================================
// EVENTS
// =============================================================================

/// A change event delivered to `on_change` observers.
#[derive(Clone)]
pub enum PropertyEvent<T> {
    /// The property took a new value.
    Changed(T),
    /// The property's active binding failed and has been detached. Carried
    /// through the change signal so failures never unwind across the
    /// notification boundary.
    BindingFailed(EvalError),
}

/// Handle for removing a change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

type ChangeFn<T> = Arc<dyn Fn(&PropertyEvent<T>) + Send + Sync>;

// =============================================================================
// PROPERTY INNER
// =============================================================================

/// Everything a property guards under its lock.
struct PropertySlots<T> {
    value: T,

    /// Bindings whose expressions read this property. Weak: orphaned
    /// bindings are pruned on the next dispatch.
    observers: Vec<Weak<dyn AnyBinding>>,

    /// The binding currently driving this property, if any. At most one.
    active: Option<Weak<dyn AnyBinding>>,

    /// User change callbacks, in registration order.
    callbacks: Vec<(u64, ChangeFn<T>)>,

    next_callback: u64,
}

/// The shared state behind a [`Property`] handle.
///
/// Separate from `Property<T>` so it can implement [`AnyProperty`] and be
/// stored as `Arc<dyn AnyProperty>` in binding source sets.
pub struct PropertyInner<T> {
    slots: Locked<PropertySlots<T>>,
    equals: EqualsFn<T>,
}

impl<T: Send + Sync + 'static> PropertyInner<T> {
    fn new(value: T, equals: EqualsFn<T>) -> Self {
        Self {
            slots: Locked::new(PropertySlots {
                value,
                observers: Vec::new(),
                active: None,
                callbacks: Vec::new(),
                next_callback: 0,
            }),
            equals,
        }
    }

    fn ptr(&self) -> *const () {
        self as *const Self as *const ()
    }
}

impl<T: Send + Sync + 'static> AnyProperty for PropertyInner<T> {
    fn subscribe(&self, binding: &Arc<dyn AnyBinding>) {
        let target = binding_ptr(binding);
        let mut slots = self.slots.lock();
        slots.observers.retain(|w| w.upgrade().is_some());
        let present = slots
            .observers
            .iter()
            .any(|w| w.upgrade().is_some_and(|b| binding_ptr(&b) == target));
        if !present {
            slots.observers.push(Arc::downgrade(binding));
        }
    }

    fn unsubscribe(&self, binding: &Arc<dyn AnyBinding>) {
        let target = binding_ptr(binding);
        let mut slots = self.slots.lock();
        slots.observers.retain(|w| match w.upgrade() {
            Some(b) => binding_ptr(&b) != target,
            None => false,
        });
    }

    fn prune_observers(&self) {
        let mut slots = self.slots.lock();
        slots.observers.retain(|w| w.upgrade().is_some());
    }

    fn observer_count(&self) -> usize {
        let slots = self.slots.lock();
        slots
            .observers
            .iter()
            .filter(|w| w.upgrade().is_some())
            .count()
    }

    fn counts_observer(&self, binding: &Arc<dyn AnyBinding>) -> usize {
        let target = binding_ptr(binding);
        let slots = self.slots.lock();
        slots
            .observers
            .iter()
            .filter(|w| w.upgrade().is_some_and(|b| binding_ptr(&b) == target))
            .count()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> Drop for PropertyInner<T> {
    fn drop(&mut self) {
        // Destruction of a property that still has live observers: those
        // bindings lose a source and become invalid. Bindings hold their
        // sources weakly, so this runs as soon as the last user handle is
        // dropped, even while bindings still observe the property.
        let ptr = self as *const Self as *const ();
        let observers = std::mem::take(&mut self.slots.get_mut().observers);
        for weak in observers {
            if let Some(binding) = weak.upgrade() {
                binding.purge_source(ptr);
            }
        }
    }
}

// =============================================================================
// PROPERTY<T> - The public handle
// =============================================================================

/// A reactive property holding a value of type T.
///
/// Properties are the leaves of the binding graph. Reads performed inside a
/// binding's expression register the property as one of that binding's
/// sources; writes notify every observing binding after the lock is
/// released.
///
/// # Example
///
/// ```
/// use prism_props::property;
///
/// let width = property(640);
/// assert_eq!(width.get(), 640);
///
/// width.set(800);
/// assert_eq!(width.get(), 800);
/// ```
pub struct Property<T> {
    inner: Arc<PropertyInner<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Property<T> {
    /// Create a new property with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(value, default_equals)
    }

    /// Create a new property with a custom equality comparator.
    ///
    /// The comparator decides whether a write is a change; writes of equal
    /// values neither notify nor trigger the binding policy.
    pub fn new_with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: Arc::new(PropertyInner::new(value, equals)),
        }
    }

    /// Get the current value (cloning).
    ///
    /// Inside an evaluating binding's expression, this registers the
    /// property as a source of that binding.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        track_read(&self.as_any_property());
        self.inner.slots.lock().value.clone()
    }

    /// Access the current value with a closure (avoids cloning).
    ///
    /// Registers a source like [`get`](Self::get). The closure runs under
    /// the property's lock; it must not read or write properties.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track_read(&self.as_any_property());
        f(&self.inner.slots.lock().value)
    }

    /// Set the property's value.
    ///
    /// Returns true if the value changed per the configured comparator.
    /// Unchanged writes return early: no notification, no policy.
    ///
    /// An external write (one not performed by this property's own active
    /// binding) consults the active binding's effective policy:
    /// `DetachOnWrite` detaches it — the whole group when grouped — and
    /// `KeepOnWrite` leaves it attached. The write proceeds either way.
    pub fn set(&self, value: T) -> bool
    where
        T: Clone,
    {
        // A write is binding-originated when the thread-local flag is set
        // AND the innermost evaluating binding is this property's active
        // binding. The identity check keeps a binding that writes to some
        // unrelated bound property from bypassing that property's policy.
        let evaluating = with_context(|ctx| {
            if ctx.is_binding_write() {
                ctx.current_binding()
            } else {
                None
            }
        });

        let mut to_detach: Option<Arc<dyn AnyBinding>> = None;
        let event = {
            let mut slots = self.inner.slots.lock();
            if (self.inner.equals)(&slots.value, &value) {
                return false;
            }

            let from_active = match (&evaluating, &slots.active) {
                (Some(current), Some(active)) => current.ptr_eq(active),
                _ => false,
            };

            if !from_active {
                match slots.active.as_ref().map(Weak::upgrade) {
                    Some(Some(active)) => match active.effective_policy() {
                        BindingPolicy::DetachOnWrite => {
                            slots.active = None;
                            to_detach = Some(active);
                        }
                        BindingPolicy::KeepOnWrite => {}
                    },
                    Some(None) => slots.active = None, // stale slot
                    None => {}
                }
            }

            slots.value = value;
            PropertyEvent::Changed(slots.value.clone())
        };

        // Lock released: finish the detach fan-out, then dispatch.
        if let Some(binding) = to_detach {
            tracing::debug!("external write detaches active binding");
            binding.detach_per_policy();
        }
        self.dispatch(&event);
        true
    }

    /// Register a change observer. Called after every effective write and
    /// on binding failure, outside the property's lock.
    pub fn on_change(&self, f: impl Fn(&PropertyEvent<T>) + Send + Sync + 'static) -> CallbackId {
        let mut slots = self.inner.slots.lock();
        let id = slots.next_callback;
        slots.next_callback += 1;
        slots.callbacks.push((id, Arc::new(f)));
        CallbackId(id)
    }

    /// Remove a change observer. Returns false if it was already gone.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut slots = self.inner.slots.lock();
        let before = slots.callbacks.len();
        slots.callbacks.retain(|(cb, _)| *cb != id.0);
        slots.callbacks.len() != before
    }

    /// The binding currently driving this property, if any.
    pub fn current_binding(&self) -> Option<Arc<dyn AnyBinding>> {
        let slots = self.inner.slots.lock();
        slots.active.as_ref()?.upgrade()
    }

    /// Whether a live binding currently drives this property.
    pub fn is_bound(&self) -> bool {
        self.current_binding().is_some()
    }

    /// Number of live observing bindings.
    pub fn observer_count(&self) -> usize {
        AnyProperty::observer_count(&*self.inner)
    }

    /// How many observer entries point at the given binding (0 or 1 when
    /// the graph is consistent).
    pub fn counts_observer(&self, binding: &Arc<dyn AnyBinding>) -> usize {
        AnyProperty::counts_observer(&*self.inner, binding)
    }

    /// This property as a type-erased source.
    pub fn as_any_property(&self) -> Arc<dyn AnyProperty> {
        self.inner.clone()
    }

    // =========================================================================
    // Crate-internal: binding slot management and dispatch
    // =========================================================================

    /// Seize the active-binding slot for `candidate`.
    ///
    /// Fails with `AlreadyBound` if another live binding holds the slot;
    /// the previous binding must be detached explicitly first.
    pub(crate) fn try_seize(&self, candidate: &Arc<dyn AnyBinding>) -> Result<(), BindError> {
        let mut slots = self.inner.slots.lock();
        if let Some(active) = slots.active.as_ref().and_then(Weak::upgrade) {
            if binding_ptr(&active) == binding_ptr(candidate) {
                return Ok(());
            }
            return Err(BindError::AlreadyBound);
        }
        slots.active = Some(Arc::downgrade(candidate));
        Ok(())
    }

    /// Clear the active slot if it points at the binding with this data
    /// pointer (or at a dead binding).
    pub(crate) fn clear_active_if(&self, ptr: *const ()) {
        let mut slots = self.inner.slots.lock();
        let clear = match slots.active.as_ref().map(Weak::upgrade) {
            Some(Some(active)) => binding_ptr(&active) == ptr,
            Some(None) => true,
            None => false,
        };
        if clear {
            slots.active = None;
        }
    }

    /// Drop a stale (dead) active slot, leaving a live one in place.
    pub(crate) fn clear_dead_active(&self) {
        let mut slots = self.inner.slots.lock();
        if let Some(active) = slots.active.as_ref()
            && active.upgrade().is_none()
        {
            slots.active = None;
        }
    }

    /// Deliver a binding failure through the change signal.
    pub(crate) fn dispatch_error(&self, error: EvalError) {
        let callbacks: Vec<ChangeFn<T>> = {
            let slots = self.inner.slots.lock();
            slots.callbacks.iter().map(|(_, f)| f.clone()).collect()
        };
        let event = PropertyEvent::BindingFailed(error);
        for callback in callbacks {
            callback(&event);
        }
    }

    /// Dispatch a change to observers and callbacks, outside the lock.
    ///
    /// Collect-then-notify: the observer snapshot is taken under the lock,
    /// then every notification runs lock-free so observers may read and
    /// write properties.
    fn dispatch(&self, event: &PropertyEvent<T>) {
        let (observers, callbacks) = {
            let mut slots = self.inner.slots.lock();
            slots.observers.retain(|w| w.upgrade().is_some());
            let observers: Vec<Arc<dyn AnyBinding>> =
                slots.observers.iter().filter_map(Weak::upgrade).collect();
            let callbacks: Vec<ChangeFn<T>> =
                slots.callbacks.iter().map(|(_, f)| f.clone()).collect();
            (observers, callbacks)
        };

        for binding in observers {
            binding.notify();
        }
        for callback in callbacks {
            callback(event);
        }
    }
}

// =============================================================================
// WEAK PROPERTY
// =============================================================================

/// A weak handle to a property, for expressions and caches that must not
/// keep the property alive.
///
/// An expression capturing only weak handles lets the source die while the
/// binding is attached; the binding is invalidated at that moment, before
/// any further evaluation.
pub struct WeakProperty<T> {
    inner: Weak<PropertyInner<T>>,
}

impl<T> Clone for WeakProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> WeakProperty<T> {
    /// Recover a strong handle, if the property still exists.
    pub fn upgrade(&self) -> Option<Property<T>> {
        self.inner.upgrade().map(|inner| Property { inner })
    }
}

impl<T: Send + Sync + 'static> Property<T> {
    /// A weak handle to this property.
    pub fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a property with the default (PartialEq) comparator.
pub fn property<T: PartialEq + Send + Sync + 'static>(value: T) -> Property<T> {
    Property::new(value)
}

/// Create a property with a custom comparator.
pub fn property_with_equals<T: Send + Sync + 'static>(
    value: T,
    equals: EqualsFn<T>,
) -> Property<T> {
    Property::new_with_equals(value, equals)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::equality::never_equals;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_set_roundtrip() {
        let p = property(1);
        assert_eq!(p.get(), 1);
        assert!(p.set(2));
        assert_eq!(p.get(), 2);
    }

    #[test]
    fn equal_write_is_silent() {
        let p = property(5);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        p.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!p.set(5));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(p.set(6));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_comparator_controls_change() {
        let p = property_with_equals(5, never_equals);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        p.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // Same value, but never_equals forces a change.
        assert!(p.set(5));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_avoids_clone() {
        let p = property(vec![1, 2, 3]);
        let sum = p.with(|v| v.iter().sum::<i32>());
        assert_eq!(sum, 6);
    }

    #[test]
    fn callbacks_receive_new_value() {
        let p = property(String::from("a"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let id = p.on_change(move |event| {
            if let PropertyEvent::Changed(v) = event {
                sink.lock().unwrap().push(v.clone());
            }
        });

        p.set(String::from("b"));
        p.set(String::from("c"));
        assert_eq!(*log.lock().unwrap(), vec!["b".to_string(), "c".to_string()]);

        assert!(p.remove_callback(id));
        assert!(!p.remove_callback(id));
        p.set(String::from("d"));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn unbound_property_has_no_binding() {
        let p = property(0);
        assert!(!p.is_bound());
        assert!(p.current_binding().is_none());
        assert_eq!(p.observer_count(), 0);
    }
}
