//! Secret detection and substitution for cryptex
//!
//! - [`registry`]: the thread-safe pattern registry and the process-wide
//!   registration API
//! - [`detect`]: finds pattern matches anywhere inside a JSON value
//! - [`substitute`]: position-safe replacement in both directions

pub mod detect;
pub mod registry;
pub mod substitute;

pub use detect::detect;
pub use registry::{
    PatternRegistry, all_patterns, clear_custom_patterns, get_pattern, list_patterns,
    register_pattern, register_patterns, unregister_pattern,
};
pub use substitute::{
    find_leaks, find_surviving, mask_real_values, resolve_placeholders, substitute,
};
