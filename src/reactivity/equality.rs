// ============================================================================
// prism-props - Equality Functions
// Comparators for the write short-circuit check
// ============================================================================

use crate::core::types::EqualsFn;

/// Strict equality using PartialEq. This is the default for `property()`.
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Always equal: writes never notify. Useful for freezing a property.
pub fn always_equals<T>(_: &T, _: &T) -> bool {
    true
}

/// Never equal: every write notifies, even with an identical value.
/// Use this when identity semantics are needed instead of value equality.
pub fn never_equals<T>(_: &T, _: &T) -> bool {
    false
}

/// NaN-aware equality for f64: NaN compares equal to NaN, so a property
/// stuck at NaN does not notify forever.
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// NaN-aware equality for f32.
pub fn safe_equals_f32(a: &f32, b: &f32) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// Convenience: the NaN-aware comparator as an [`EqualsFn`] for f64
/// properties.
pub fn f64_equals() -> EqualsFn<f64> {
    safe_equals_f64
}

// =============================================================================
// TESTS
// =============================================================================
