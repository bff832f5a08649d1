// ============================================================================
// prism-props - A Reactive Property and Binding Library for Rust
// ============================================================================
//
// Properties are typed, lock-guarded cells with change notification. A
// binding connects the properties its expression reads to one target
// property and recomputes the target whenever a source changes, with
// cycle suppression, write policies, and atomic group lifecycles.
// ============================================================================

pub mod core;
pub mod module;
pub mod primitives;
pub mod reactivity;
pub mod sync;

// Re-export core items at crate root for ergonomic access
pub use core::context::{evaluation_depth, is_evaluating, with_context, EvalContext};
pub use core::error::{BindError, EvalError, RegistryError};
pub use core::types::{
    default_equals, AnyBinding, AnyProperty, BindingPolicy, BindingState, EqualsFn,
};

// Re-export primitives at crate root
pub use primitives::binding::{bind, bind_fallible, Binding};
pub use primitives::group::BindingGroup;
pub use primitives::property::{
    property, property_with_equals, CallbackId, Property, PropertyEvent, WeakProperty,
};

// Re-export reactivity helpers
pub use reactivity::equality::{
    always_equals, equals, f64_equals, never_equals, safe_equals_f32, safe_equals_f64,
};

// Re-export synchronization primitives
pub use sync::{FlagScope, Lockable, Locked, LockedGuard, ScopedLock};

// Re-export the registration surface
pub use module::{register_module, Module, ModuleRegistry};

// =============================================================================
// TESTS
// =============================================================================
