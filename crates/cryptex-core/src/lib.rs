//! Core domain models for cryptex
//!
//! This crate contains:
//! - The secret pattern model and the built-in seed set
//! - Records passed between detection, substitution and the context cache
//! - The error taxonomy, whose every rendering is scrubbed of secrets

pub mod error;
pub mod pattern;
pub mod scrub;
pub mod snapshot;

pub use error::{Error, ErrorReport, Operation, Result};
pub use pattern::{
    PLACEHOLDER_HASH_LEN, Pattern, PatternDefinition, builtin_patterns, hashed_placeholder,
};
pub use snapshot::{DetectedOccurrence, PlaceholderMap, ResolvedResult, SanitizedSnapshot};
