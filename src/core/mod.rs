// ============================================================================
// prism-props - Core module
// ============================================================================

pub mod context;
pub mod error;
pub mod types;
