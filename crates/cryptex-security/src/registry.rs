//! Pattern registry
//!
//! Patterns are kept in registration order behind one mutex. Readers take a
//! snapshot of `Arc<Pattern>`s and match against it without holding the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cryptex_core::{Error, Pattern, Result, builtin_patterns};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

lazy_static! {
    static ref GLOBAL: Arc<PatternRegistry> = Arc::new(PatternRegistry::new());
}

/// Process-wide registry used by the free registration functions
pub fn global() -> Arc<PatternRegistry> {
    Arc::clone(&GLOBAL)
}

pub struct PatternRegistry {
    /// Restored by [`PatternRegistry::clear_custom`]
    seed: Vec<Arc<Pattern>>,
    patterns: Mutex<Vec<Arc<Pattern>>>,
}

impl PatternRegistry {
    /// Registry seeded with the built-in patterns
    pub fn new() -> Self {
        Self::seeded(builtin_patterns().into_iter().map(Arc::new).collect())
    }

    /// Registry seeded with `patterns` instead of the built-ins
    pub fn with_patterns(patterns: Vec<Pattern>) -> Result<Self> {
        let mut seed: Vec<Arc<Pattern>> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if seed.iter().any(|p| p.name() == pattern.name()) {
                return Err(Error::DuplicateName(pattern.name().to_string()));
            }
            seed.push(Arc::new(pattern));
        }
        Ok(Self::seeded(seed))
    }

    fn seeded(seed: Vec<Arc<Pattern>>) -> Self {
        Self {
            patterns: Mutex::new(seed.clone()),
            seed,
        }
    }

    // Entries are immutable `Arc`s, so a poisoned guard still holds a valid list
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Pattern>>> {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compile and register a pattern
    pub fn register(
        &self,
        name: &str,
        regex: &str,
        placeholder_template: &str,
        description: &str,
    ) -> Result<()> {
        self.insert(Pattern::new(name, regex, placeholder_template, description)?)
    }

    /// Register a pattern around an already compiled regex
    pub fn register_regex(
        &self,
        name: &str,
        regex: Regex,
        placeholder_template: &str,
        description: &str,
    ) -> Result<()> {
        self.insert(Pattern::from_regex(name, regex, placeholder_template, description)?)
    }

    pub fn insert(&self, pattern: Pattern) -> Result<()> {
        let mut patterns = self.lock();
        if patterns.iter().any(|p| p.name() == pattern.name()) {
            return Err(Error::DuplicateName(pattern.name().to_string()));
        }
        info!(pattern = pattern.name(), "Registered secret pattern");
        patterns.push(Arc::new(pattern));
        Ok(())
    }

    /// Remove a pattern; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let mut patterns = self.lock();
        let before = patterns.len();
        patterns.retain(|p| p.name() != name);
        let removed = patterns.len() < before;
        if removed {
            info!(pattern = name, "Unregistered secret pattern");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pattern>> {
        self.lock().iter().find(|p| p.name() == name).cloned()
    }

    /// Every pattern, seed first, in registration order
    pub fn list_all(&self) -> Vec<Arc<Pattern>> {
        self.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|p| p.name().to_string()).collect()
    }

    /// Drop everything registered after construction and restore the seed
    pub fn clear_custom(&self) {
        let mut patterns = self.lock();
        *patterns = self.seed.clone();
        debug!(count = patterns.len(), "Restored seed patterns");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a custom pattern in the process-wide registry
pub fn register_pattern(
    name: &str,
    regex: &str,
    placeholder_template: &str,
    description: &str,
) -> Result<()> {
    GLOBAL.register(name, regex, placeholder_template, description)
}

/// Register several `(name, regex, template)` triples; stops at the first failure
pub fn register_patterns(patterns: &[(&str, &str, &str)]) -> Result<()> {
    for (name, regex, template) in patterns {
        GLOBAL.register(name, regex, template, "")?;
    }
    Ok(())
}

pub fn unregister_pattern(name: &str) -> bool {
    GLOBAL.unregister(name)
}

pub fn get_pattern(name: &str) -> Option<Arc<Pattern>> {
    GLOBAL.get(name)
}

/// Sorted names of every pattern in the process-wide registry
pub fn list_patterns() -> Vec<String> {
    let mut names = GLOBAL.names();
    names.sort();
    names
}

pub fn all_patterns() -> Vec<Arc<Pattern>> {
    GLOBAL.list_all()
}

pub fn clear_custom_patterns() {
    GLOBAL.clear_custom();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_seeded_with_builtins() {
        let registry = PatternRegistry::new();
        assert_eq!(registry.len(), 5);
        assert!(registry.get("openai_key").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = PatternRegistry::new();
        registry
            .register(
                "slack_token",
                r"xoxb-[0-9A-Za-z]{51}",
                "{{SLACK_TOKEN}}",
                "Slack bot token",
            )
            .unwrap();

        assert_eq!(registry.len(), 6);
        assert_eq!(registry.names().last().unwrap(), "slack_token");
        assert_eq!(
            registry.get("slack_token").unwrap().description(),
            "Slack bot token"
        );

        assert!(registry.unregister("slack_token"));
        assert!(!registry.unregister("slack_token"));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_register_compiled_regex() {
        let registry = PatternRegistry::new();
        let regex = Regex::new(r"AKIA[0-9A-Z]{16}").unwrap();
        registry
            .register_regex("aws_access_key", regex, "{{AWS_ACCESS_KEY}}", "")
            .unwrap();
        assert!(registry.get("aws_access_key").is_some());
    }

    #[test]
    fn test_duplicate_name() {
        let registry = PatternRegistry::new();
        let err = registry
            .register("openai_key", r"sk-x+", "{{X}}", "")
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "openai_key"));
    }

    #[test]
    fn test_invalid_registration() {
        let registry = PatternRegistry::new();
        assert!(matches!(
            registry.register("bad", "[unclosed", "{{BAD}}", ""),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            registry.register("  ", "abc", "{{BAD}}", ""),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            registry.register("bad", "abc", "", ""),
            Err(Error::InvalidPattern { .. })
        ));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_clear_custom_restores_seed() {
        let registry = PatternRegistry::new();
        registry
            .register("one", "one-[0-9]+", "{{ONE}}", "")
            .unwrap();
        registry
            .register("two", "two-[0-9]+", "{{TWO}}", "")
            .unwrap();
        registry.unregister("github_token");

        registry.clear_custom();

        let names = registry.names();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"github_token".to_string()));
        assert!(!names.contains(&"one".to_string()));
    }

    #[test]
    fn test_custom_seed() {
        let seed = vec![Pattern::new("only", "only-[a-z]+", "{{ONLY}}", "").unwrap()];
        let registry = PatternRegistry::with_patterns(seed).unwrap();
        assert_eq!(registry.names(), vec!["only"]);

        let dup = vec![
            Pattern::new("same", "a+", "{{A}}", "").unwrap(),
            Pattern::new("same", "b+", "{{B}}", "").unwrap(),
        ];
        assert!(PatternRegistry::with_patterns(dup).is_err());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(PatternRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let name = format!("pattern_{}", i);
                    registry
                        .register(&name, &format!("tok{}-[0-9]+", i), "{{TOK}}", "")
                        .unwrap();
                    assert!(registry.get(&name).is_some());
                    registry.list_all().len()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() > 5);
        }
        assert_eq!(registry.len(), 13);
    }

    #[test]
    fn test_global_registration_api() {
        register_pattern(
            "global_api_test_token",
            r"gat-[0-9a-f]{16}",
            "{{GLOBAL_API_TEST}}",
            "",
        )
        .unwrap();
        assert!(list_patterns().contains(&"global_api_test_token".to_string()));
        assert!(get_pattern("global_api_test_token").is_some());
        assert!(matches!(
            register_pattern("global_api_test_token", "x+", "{{X}}", ""),
            Err(Error::DuplicateName(_))
        ));
        assert!(unregister_pattern("global_api_test_token"));
        assert!(get_pattern("global_api_test_token").is_none());

        // Bulk registration stops at the first failure
        register_patterns(&[
            ("global_bulk_one", r"gb1-[0-9]{6}", "{{GLOBAL_BULK_ONE}}"),
            ("global_bulk_two", r"gb2-[0-9]{6}", "{GLOBAL_BULK_TWO}"),
        ])
        .unwrap();
        let err = register_patterns(&[
            ("global_bulk_three", r"gb3-[0-9]{6}", "{{GLOBAL_BULK_THREE}}"),
            ("global_bulk_broken", r"gb4-[", "{{GLOBAL_BULK_BROKEN}}"),
            ("global_bulk_never", r"gb5-[0-9]{6}", "{{GLOBAL_BULK_NEVER}}"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));

        let names = list_patterns();
        for name in ["global_bulk_one", "global_bulk_two", "global_bulk_three"] {
            assert!(names.contains(&name.to_string()));
        }
        assert!(get_pattern("global_bulk_broken").is_none());
        assert!(get_pattern("global_bulk_never").is_none());
        assert!(!get_pattern("global_bulk_two").unwrap().is_literal_template());

        // Clearing restores the built-in seed, including removed built-ins
        assert!(unregister_pattern("file_path"));
        clear_custom_patterns();
        let mut builtin_names: Vec<String> = builtin_patterns()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        builtin_names.sort();
        assert_eq!(list_patterns(), builtin_names);
        assert_eq!(all_patterns().len(), 5);
    }
}
