// ============================================================================
// prism-props - Binding Group
// Attaches, detaches, and governs a set of bindings as one unit
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::error::BindError;
use crate::core::types::{AnyBinding, BindingPolicy, binding_ptr};
use crate::primitives::binding::Binding;

// =============================================================================
// GROUP INNER
// =============================================================================

struct GroupSlots {
    members: Vec<Arc<dyn AnyBinding>>,
    attached: bool,
    /// Bumped by every [`GroupInner::detach_members`]. An attach in flight
    /// compares epochs to learn that a policy detach fired underneath it.
    epoch: u64,
}

/// Shared state behind a [`BindingGroup`] handle. Members hold a weak back
/// reference; the group strongly owns its members.
pub struct GroupInner {
    slots: Mutex<GroupSlots>,
    /// Governs every member while grouped, overriding per-binding policy.
    policy: Mutex<BindingPolicy>,
    self_weak: Weak<GroupInner>,
}

impl GroupInner {
    pub(crate) fn policy(&self) -> BindingPolicy {
        *self.policy.lock()
    }

    /// Detach every member in one critical section. A policy-triggered
    /// detach of any member lands here, so the group always moves as one.
    pub(crate) fn detach_members(&self) {
        let mut slots = self.slots.lock();
        for member in &slots.members {
            member.detach();
        }
        slots.attached = false;
        slots.epoch = slots.epoch.wrapping_add(1);
        tracing::debug!(members = slots.members.len(), "group detached");
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        // Members outliving the group become self-governed again.
        for member in self.slots.get_mut().members.drain(..) {
            member.set_group(None);
        }
    }
}

// =============================================================================
// BINDING GROUP - The public handle
// =============================================================================

/// A set of bindings attached and detached together.
///
/// Attach is all-or-nothing: if any member fails to attach (its target is
/// already bound, say), the members attached so far are rolled back and the
/// error is returned. While grouped, a member's detach-on-write policy is
/// the group's, and a write that detaches one member detaches them all.
///
/// # Example
///
/// ```
/// use prism_props::{BindingGroup, bind, property};
///
/// let source = property(1);
/// let double = property(0);
/// let square = property(0);
///
/// let group = BindingGroup::new();
/// let s = source.clone();
/// group.add(&bind(&double, move || s.get() * 2)).unwrap();
/// let s = source.clone();
/// group.add(&bind(&square, move || s.get() * s.get())).unwrap();
///
/// group.attach().unwrap();
/// source.set(3);
/// assert_eq!((double.get(), square.get()), (6, 9));
///
/// group.detach();
/// source.set(10);
/// assert_eq!((double.get(), square.get()), (6, 9));
/// ```
pub struct BindingGroup {
    inner: Arc<GroupInner>,
}

impl Clone for BindingGroup {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for BindingGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingGroup {
    /// Create an empty, detached group with the default policy.
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak| GroupInner {
            slots: Mutex::new(GroupSlots {
                members: Vec::new(),
                attached: false,
                epoch: 0,
            }),
            policy: Mutex::new(BindingPolicy::default()),
            self_weak: weak.clone(),
        });
        Self { inner }
    }

    /// Add a binding to this group, taking over its policy governance.
    ///
    /// The binding must not already belong to a group. If the group is
    /// attached, the new member attaches (and evaluates) immediately; on
    /// failure it is not added.
    pub fn add<T>(&self, binding: &Binding<T>) -> Result<(), BindError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if binding.is_grouped() {
            return Err(BindError::Grouped);
        }

        let member = binding.as_any_binding();
        let (attached, epoch) = {
            let slots = self.inner.slots.lock();
            if slots
                .members
                .iter()
                .any(|m| binding_ptr(m) == binding_ptr(&member))
            {
                return Ok(());
            }
            (slots.attached, slots.epoch)
        };

        member.set_group(Some(self.inner.self_weak.clone()));
        // Same constraint as attach: the newcomer's expression may write a
        // member's target and detach the group, so it evaluates unlocked.
        if attached {
            if let Err(err) = member.attach_for_group() {
                member.set_group(None);
                return Err(err);
            }
        }

        let mut slots = self.inner.slots.lock();
        if attached && slots.epoch != epoch {
            // The group detached while the newcomer evaluated; it joins
            // the group detached like its siblings.
            member.detach();
        }
        slots.members.push(member);
        Ok(())
    }

    /// Remove a binding from this group, releasing policy governance.
    ///
    /// The member keeps its current state: an attached member stays
    /// attached, now governed by its own policy. Returns false if the
    /// binding was not a member.
    pub fn remove<T>(&self, binding: &Binding<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let member = binding.as_any_binding();
        let mut slots = self.inner.slots.lock();
        let before = slots.members.len();
        slots.members.retain(|m| binding_ptr(m) != binding_ptr(&member));
        if slots.members.len() == before {
            return false;
        }
        member.set_group(None);
        true
    }

    /// Attach every member, evaluating each once. All-or-nothing: on the
    /// first failure the members attached so far are detached again and
    /// the error is returned.
    pub fn attach(&self) -> Result<(), BindError> {
        // Members evaluate outside the slots lock: an expression may write
        // a sibling's target, and the resulting policy detach re-enters
        // detach_members on this thread.
        let (snapshot, epoch) = {
            let slots = self.inner.slots.lock();
            if slots.attached {
                return Ok(());
            }
            (slots.members.clone(), slots.epoch)
        };

        let mut done: Vec<Arc<dyn AnyBinding>> = Vec::new();
        for member in &snapshot {
            match member.attach_for_group() {
                Ok(()) => done.push(member.clone()),
                Err(err) => {
                    tracing::debug!(error = %err, "group attach rolled back");
                    for attached in done.iter().rev() {
                        attached.detach();
                    }
                    return Err(err);
                }
            }
        }

        let mut slots = self.inner.slots.lock();
        if slots.epoch != epoch {
            // A policy detach fired while members were attaching; it wins.
            drop(slots);
            for member in done.iter().rev() {
                member.detach();
            }
            tracing::debug!("group attach overtaken by a policy detach");
            return Ok(());
        }
        slots.attached = true;
        tracing::debug!(members = slots.members.len(), "group attached");
        Ok(())
    }

    /// Detach every member. Idempotent.
    pub fn detach(&self) {
        self.inner.detach_members();
    }

    /// Whether the group's members are currently attached.
    pub fn is_attached(&self) -> bool {
        self.inner.slots.lock().attached
    }

    /// Number of member bindings.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().members.is_empty()
    }

    /// The policy governing every member while grouped.
    pub fn policy(&self) -> BindingPolicy {
        *self.inner.policy.lock()
    }

    pub fn set_policy(&self, policy: BindingPolicy) {
        *self.inner.policy.lock() = policy;
    }
}

// =============================================================================
// TESTS
// =============================================================================
