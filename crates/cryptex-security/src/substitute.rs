//! Position-safe substitution
//!
//! Every direction locates each literal occurrence of each needle and splices
//! replacements in from the end of the string backwards, so earlier offsets
//! stay valid. Resolution keeps the leftmost-longest non-overlapping spans.
//! Redaction (secret -> placeholder) never drops a span: matches that
//! partially overlap are merged and their union is replaced as one secret.

use std::collections::HashSet;

use cryptex_core::{DetectedOccurrence, PLACEHOLDER_HASH_LEN, PlaceholderMap, hashed_placeholder};
use serde_json::Value;

/// Pattern name used for merged spans masked out of a response
const MASKED_NAME: &str = "masked";

/// Replace every detected secret in `value` with its placeholder
///
/// Returns the rewritten value and the placeholder -> secret map. Only
/// replacements that were actually applied are recorded, so every key of the
/// map appears in the output.
pub fn substitute(value: &Value, occurrences: &[DetectedOccurrence]) -> (Value, PlaceholderMap) {
    if occurrences.is_empty() {
        return (value.clone(), PlaceholderMap::new());
    }

    let mut unique = HashSet::new();
    let needles = occurrences
        .iter()
        .filter(|o| unique.insert(o.value.as_str()))
        .map(|o| Needle {
            secret: &o.value,
            placeholder: &o.placeholder,
            name: &o.pattern_name,
        })
        .collect();

    let mut redactor = Redactor::new(value, needles);
    let data = map_strings(value, &mut |text| redactor.redact(text));
    (data, redactor.placeholders)
}

/// Swap placeholders back for real values; returns the number of replacements
pub fn resolve_placeholders(value: &Value, placeholders: &PlaceholderMap) -> (Value, usize) {
    if placeholders.is_empty() {
        return (value.clone(), 0);
    }

    let pairs: Vec<(&str, &str)> = placeholders
        .iter()
        .map(|(placeholder, secret)| (placeholder.as_str(), secret.as_str()))
        .collect();

    let mut count = 0;
    let data = map_strings(value, &mut |text| {
        let (out, hits) = replace_literals(text, &pairs);
        count += hits.len();
        out
    });
    (data, count)
}

/// Replace any real value from `placeholders` that leaked into `value`
///
/// Leaked values that partially overlap are masked together under a fresh
/// `{RESOLVE:MASKED:<hash>}` placeholder.
pub fn mask_real_values(value: &Value, placeholders: &PlaceholderMap) -> Value {
    if placeholders.is_empty() {
        return value.clone();
    }

    let needles = placeholders
        .iter()
        .map(|(placeholder, secret)| Needle {
            secret,
            placeholder,
            name: MASKED_NAME,
        })
        .collect();

    let mut redactor = Redactor::new(value, needles);
    map_strings(value, &mut |text| redactor.redact(text))
}

/// Placeholders whose real value still appears somewhere in `value`
pub fn find_leaks(value: &Value, placeholders: &PlaceholderMap) -> Vec<String> {
    let mut leaked = Vec::new();
    for (placeholder, secret) in placeholders {
        if !secret.is_empty() && contains_text(value, secret) {
            leaked.push(placeholder.clone());
        }
    }
    leaked
}

/// Names of the patterns whose detected value still appears in `value`
pub fn find_surviving(value: &Value, occurrences: &[DetectedOccurrence]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for occurrence in occurrences {
        if names.contains(&occurrence.pattern_name) || occurrence.value.is_empty() {
            continue;
        }
        if contains_text(value, &occurrence.value) {
            names.push(occurrence.pattern_name.clone());
        }
    }
    names
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(text) => text.contains(needle),
        Value::Array(items) => items.iter().any(|item| contains_text(item, needle)),
        Value::Object(map) => map.values().any(|item| contains_text(item, needle)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Rebuild `value` with every string passed through `f`; object keys are kept verbatim
fn map_strings<F: FnMut(&str) -> String>(value: &Value, f: &mut F) -> Value {
    match value {
        Value::String(text) => Value::String(f(text)),
        Value::Array(items) => Value::Array(
            items.iter().map(|item| map_strings(item, f)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), map_strings(item, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

struct Needle<'a> {
    secret: &'a str,
    placeholder: &'a str,
    name: &'a str,
}

/// Secret -> placeholder rewriting that records every placeholder it emits
struct Redactor<'a> {
    input: &'a Value,
    needles: Vec<Needle<'a>>,
    placeholders: PlaceholderMap,
}

impl<'a> Redactor<'a> {
    fn new(input: &'a Value, needles: Vec<Needle<'a>>) -> Self {
        Self {
            input,
            needles,
            placeholders: PlaceholderMap::new(),
        }
    }

    fn redact(&mut self, text: &str) -> String {
        let spans = find_spans(text, self.needles.iter().map(|n| n.secret));
        let clusters = overlap_clusters(spans);

        let mut out = text.to_string();
        for cluster in clusters.iter().rev() {
            let (placeholder, secret) = if cluster.is_merged() {
                let union = &text[cluster.start..cluster.end];
                (self.union_placeholder(cluster.lead, union), union.to_string())
            } else {
                let needle = &self.needles[cluster.lead];
                (needle.placeholder.to_string(), needle.secret.to_string())
            };
            out.replace_range(cluster.start..cluster.end, &placeholder);
            self.placeholders.insert(placeholder, secret);
        }
        out
    }

    /// Hashed placeholder for a merged span, widened until it is unambiguous
    fn union_placeholder(&self, lead: usize, union: &str) -> String {
        let name = self.needles[lead].name;
        let mut placeholder = hashed_placeholder(name, union, PLACEHOLDER_HASH_LEN);
        for width in [16, 32, 64] {
            if self.is_free(&placeholder, union) {
                break;
            }
            placeholder = hashed_placeholder(name, union, width);
        }
        placeholder
    }

    fn is_free(&self, placeholder: &str, union: &str) -> bool {
        let bound_elsewhere = self
            .placeholders
            .get(placeholder)
            .is_some_and(|secret| secret != union)
            || self
                .needles
                .iter()
                .any(|n| n.placeholder == placeholder && n.secret != union);
        !bound_elsewhere && !contains_text(self.input, placeholder)
    }
}

/// A run of transitively overlapping spans
///
/// `lead` is the leftmost (longest at equal starts) span; the cluster is
/// merged when other spans extend past it.
struct Cluster {
    start: usize,
    end: usize,
    lead: usize,
    lead_end: usize,
}

impl Cluster {
    fn is_merged(&self) -> bool {
        self.end != self.lead_end
    }
}

fn overlap_clusters(spans: Vec<(usize, usize, usize)>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for (start, end, idx) in spans {
        match clusters.last_mut() {
            Some(cluster) if start < cluster.end => cluster.end = cluster.end.max(end),
            _ => clusters.push(Cluster {
                start,
                end,
                lead: idx,
                lead_end: end,
            }),
        }
    }
    clusters
}

/// Every literal occurrence of every needle as `(start, end, needle index)`
///
/// Sorted leftmost first; at equal starts the longest needle comes first.
fn find_spans<'n>(
    text: &str,
    needles: impl IntoIterator<Item = &'n str>,
) -> Vec<(usize, usize, usize)> {
    let mut spans = Vec::new();
    for (idx, needle) in needles.into_iter().enumerate() {
        if needle.is_empty() {
            continue;
        }
        for (start, matched) in text.match_indices(needle) {
            spans.push((start, start + matched.len(), idx));
        }
    }
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    spans
}

/// Single-pass literal replacement keeping leftmost-longest spans
///
/// Returns the new string and, for each span replaced, the index of the pair
/// that produced it.
pub(crate) fn replace_literals(text: &str, pairs: &[(&str, &str)]) -> (String, Vec<usize>) {
    let spans = find_spans(text, pairs.iter().map(|(needle, _)| *needle));
    if spans.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let mut kept: Vec<(usize, usize, usize)> = Vec::with_capacity(spans.len());
    let mut cursor = 0;
    for span in spans {
        if span.0 >= cursor {
            cursor = span.1;
            kept.push(span);
        }
    }

    let mut out = text.to_string();
    for &(start, end, idx) in kept.iter().rev() {
        out.replace_range(start..end, pairs[idx].1);
    }

    (out, kept.into_iter().map(|(_, _, idx)| idx).collect())
}
