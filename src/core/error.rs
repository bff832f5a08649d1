// ============================================================================
// prism-props - Errors
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

/// Failure produced by a binding expression.
///
/// Expressions are opaque user code; their failures are carried as erased
/// errors so they can cross the notification boundary by value.
pub type EvalError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by attach and evaluation.
///
/// Lock contract violations (non-owner release, recursive acquisition) are
/// debug-build panics, not values of this type: they indicate a programming
/// error, never a recoverable condition.
#[derive(Debug, Clone, Error)]
pub enum BindError {
    /// The target property already has an active binding. The previous
    /// binding must be detached explicitly before another may attach.
    #[error("target already has an active binding")]
    AlreadyBound,

    /// The binding's target or one of its sources has been destroyed;
    /// the binding will never evaluate again.
    #[error("binding is invalid: its target or a source has been destroyed")]
    InvalidBinding,

    /// The binding belongs to a group; it attaches and detaches only
    /// through the group.
    #[error("binding belongs to a group; attach and detach it via the group")]
    Grouped,

    /// The binding's expression failed. The binding has been detached and
    /// marked invalid.
    #[error("binding expression failed: {0}")]
    EvaluationFailed(EvalError),
}

/// Errors from the module registration surface.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A property with this name has already been published.
    #[error("a property named `{0}` is already registered")]
    DuplicateProperty(String),
}

// =============================================================================
// TESTS
// =============================================================================
