//! Records exchanged between detection, substitution and the context cache

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Placeholder -> real value
pub type PlaceholderMap = BTreeMap<String, String>;

/// One match of one pattern inside one string
///
/// Offsets are byte offsets into the string the match was found in.
#[derive(Clone, PartialEq, Eq)]
pub struct DetectedOccurrence {
    pub value: String,
    pub pattern_name: String,
    pub placeholder: String,
    pub start: usize,
    pub end: usize,
}

impl fmt::Debug for DetectedOccurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectedOccurrence")
            .field("value", &"<redacted>")
            .field("pattern_name", &self.pattern_name)
            .field("placeholder", &self.placeholder)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

/// Result of one sanitize call, as held by the context cache
#[derive(Clone, Serialize, Deserialize)]
pub struct SanitizedSnapshot {
    /// Input with every detected secret replaced by its placeholder
    pub data: Value,
    /// Never serialized: this is the only place real values live
    #[serde(skip)]
    pub placeholders: PlaceholderMap,
    pub context_id: String,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

impl SanitizedSnapshot {
    pub fn new(data: Value, placeholders: PlaceholderMap, context_id: impl Into<String>) -> Self {
        Self {
            data,
            placeholders,
            context_id: context_id.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn real_value(&self, placeholder: &str) -> Option<&str> {
        self.placeholders.get(placeholder).map(String::as_str)
    }

    pub fn has_secrets(&self) -> bool {
        !self.placeholders.is_empty()
    }
}

impl fmt::Debug for SanitizedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizedSnapshot")
            .field("data", &self.data)
            .field(
                "placeholders",
                &self.placeholders.keys().collect::<Vec<_>>(),
            )
            .field("context_id", &self.context_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Data with placeholders swapped back for real values
#[derive(Debug, Clone)]
pub struct ResolvedResult {
    pub data: Value,
    pub resolved_count: usize,
    pub context_id: String,
}
