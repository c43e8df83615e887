//! Secret detection over arbitrary JSON values
//!
//! Strings are matched against every pattern; arrays and object values are
//! walked recursively. Object keys are never scanned.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cryptex_core::{DetectedOccurrence, PLACEHOLDER_HASH_LEN, Pattern};
use serde_json::Value;

/// Every pattern match inside `value`, in traversal order
///
/// Within one call a placeholder is bound to exactly one secret: the same
/// secret always gets the same placeholder, and a second secret deriving an
/// already-taken placeholder falls back to the hashed form. A placeholder
/// that already appears somewhere in the input counts as taken.
pub fn detect(value: &Value, patterns: &[Arc<Pattern>]) -> Vec<DetectedOccurrence> {
    let mut texts = Vec::new();
    collect_strings(value, &mut texts);
    scan_all(&texts, patterns)
}

/// [`detect`] for a bare string
pub fn detect_in_text(text: &str, patterns: &[Arc<Pattern>]) -> Vec<DetectedOccurrence> {
    scan_all(&[text], patterns)
}

fn collect_strings<'a>(value: &'a Value, texts: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => texts.push(text),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, texts);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, texts);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn scan_all(texts: &[&str], patterns: &[Arc<Pattern>]) -> Vec<DetectedOccurrence> {
    let mut allocator = PlaceholderAllocator::new(texts);
    let mut found = Vec::new();
    for text in texts {
        scan(text, patterns, &mut allocator, &mut found);
    }
    found
}

fn scan(
    text: &str,
    patterns: &[Arc<Pattern>],
    allocator: &mut PlaceholderAllocator<'_>,
    found: &mut Vec<DetectedOccurrence>,
) {
    // Two patterns may match the exact same span; report it once
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    for pattern in patterns {
        for m in pattern.matcher().find_iter(text) {
            if m.as_str().is_empty() || !seen.insert((m.start(), m.end())) {
                continue;
            }
            found.push(DetectedOccurrence {
                value: m.as_str().to_string(),
                pattern_name: pattern.name().to_string(),
                placeholder: allocator.assign(pattern, m.as_str()),
                start: m.start(),
                end: m.end(),
            });
        }
    }
}

struct PlaceholderAllocator<'a> {
    /// Every input string; placeholders found in them are never handed out
    texts: &'a [&'a str],
    by_secret: HashMap<String, String>,
    taken: HashSet<String>,
}

impl<'a> PlaceholderAllocator<'a> {
    fn new(texts: &'a [&'a str]) -> Self {
        Self {
            texts,
            by_secret: HashMap::new(),
            taken: HashSet::new(),
        }
    }

    fn assign(&mut self, pattern: &Pattern, secret: &str) -> String {
        if let Some(placeholder) = self.by_secret.get(secret) {
            return placeholder.clone();
        }

        let mut placeholder = pattern.placeholder_for(secret);
        let mut widths = [PLACEHOLDER_HASH_LEN, 16, 32, 64].into_iter();
        while self.is_taken(&placeholder) {
            match widths.next() {
                Some(width) => placeholder = pattern.hashed_placeholder(secret, width),
                None => break,
            }
        }

        self.taken.insert(placeholder.clone());
        self.by_secret.insert(secret.to_string(), placeholder.clone());
        placeholder
    }

    fn is_taken(&self, placeholder: &str) -> bool {
        self.taken.contains(placeholder) || self.texts.iter().any(|t| t.contains(placeholder))
    }
}
