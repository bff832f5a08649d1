// ============================================================================
// prism-props - Primitives
// The observable building blocks: properties, bindings, binding groups
// ============================================================================

pub mod binding;
pub mod group;
pub mod property;

pub use binding::{Binding, bind, bind_fallible};
pub use group::BindingGroup;
pub use property::{
    CallbackId, Property, PropertyEvent, WeakProperty, property, property_with_equals,
};
