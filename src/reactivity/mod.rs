// ============================================================================
// prism-props - Reactivity module
// Read tracking and equality comparators
// ============================================================================

pub mod equality;
pub mod tracking;
