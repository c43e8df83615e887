//! Secret pattern model
//!
//! A [`Pattern`] pairs a compiled matcher with the placeholder template that
//! stands in for whatever it matches. Patterns are immutable once built.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hex digits of the secret digest carried by a `{RESOLVE:...}` placeholder
pub const PLACEHOLDER_HASH_LEN: usize = 8;

pub const OPENAI_KEY: &str = r"sk-[a-zA-Z0-9]{48}";
pub const ANTHROPIC_KEY: &str = r"sk-ant-[a-zA-Z0-9-]{95,}";
pub const GITHUB_TOKEN: &str = r"ghp_[a-zA-Z0-9]{36}";
pub const FILE_PATH: &str = r"/(?:Users|home)/[^/\s]+(?:/[^/\s]*)*";
pub const DATABASE_URL: &str = r"(?:postgres(?:ql)?|mysql|redis|mongodb(?:\+srv)?)://[^\s]+";

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref BUILTINS: Vec<Pattern> = vec![
        builtin("openai_key", OPENAI_KEY, "{{OPENAI_API_KEY}}", "OpenAI API key"),
        builtin(
            "anthropic_key",
            ANTHROPIC_KEY,
            "{{ANTHROPIC_API_KEY}}",
            "Anthropic API key",
        ),
        builtin(
            "github_token",
            GITHUB_TOKEN,
            "{{GITHUB_TOKEN}}",
            "GitHub personal access token",
        ),
        builtin("file_path", FILE_PATH, "/{USER_HOME}/...", "User file system paths"),
        builtin(
            "database_url",
            DATABASE_URL,
            "{{DATABASE_URL}}",
            "Database connection URLs",
        ),
    ];
}

fn builtin(name: &str, source: &str, template: &str, description: &str) -> Pattern {
    Pattern {
        name: name.to_string(),
        matcher: Regex::new(source).unwrap(),
        placeholder_template: template.to_string(),
        description: description.to_string(),
    }
}

/// The built-in seed set, in registration order
pub fn builtin_patterns() -> Vec<Pattern> {
    BUILTINS.clone()
}

/// Serializable description of a pattern, as found in config files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub name: String,
    pub pattern: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
}

/// A named secret matcher with its placeholder template
#[derive(Debug, Clone)]
pub struct Pattern {
    name: String,
    matcher: Regex,
    placeholder_template: String,
    description: String,
}

impl Pattern {
    /// Compile `source` and validate the pattern
    pub fn new(
        name: impl Into<String>,
        source: &str,
        placeholder_template: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let matcher = Regex::new(source).map_err(|e| Error::InvalidPattern {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Self::from_regex(name, matcher, placeholder_template, description)
    }

    /// Validate a pattern around an already compiled matcher
    pub fn from_regex(
        name: impl Into<String>,
        matcher: Regex,
        placeholder_template: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let placeholder_template = placeholder_template.into();

        if name.trim().is_empty() {
            return Err(Error::InvalidPattern {
                name,
                reason: "pattern name cannot be empty".to_string(),
            });
        }
        if !NAME_RE.is_match(&name) {
            return Err(Error::InvalidPattern {
                name,
                reason: "pattern name must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
            });
        }
        if placeholder_template.trim().is_empty() {
            return Err(Error::InvalidPattern {
                name,
                reason: "placeholder template cannot be empty".to_string(),
            });
        }
        if matcher.is_match("") {
            return Err(Error::InvalidPattern {
                name,
                reason: "regex must not match the empty string".to_string(),
            });
        }

        Ok(Self {
            name,
            matcher,
            placeholder_template,
            description: description.into(),
        })
    }

    pub fn from_definition(def: &PatternDefinition) -> Result<Self> {
        Self::new(
            def.name.clone(),
            &def.pattern,
            def.template.clone(),
            def.description.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &Regex {
        &self.matcher
    }

    pub fn placeholder_template(&self) -> &str {
        &self.placeholder_template
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn definition(&self) -> PatternDefinition {
        PatternDefinition {
            name: self.name.clone(),
            pattern: self.matcher.as_str().to_string(),
            template: self.placeholder_template.clone(),
            description: self.description.clone(),
        }
    }

    /// Templates written as `{{NAME}}` are used verbatim
    pub fn is_literal_template(&self) -> bool {
        self.placeholder_template.contains("{{") && self.placeholder_template.contains("}}")
    }

    /// Placeholder this pattern derives for `secret`
    ///
    /// Literal templates are returned as-is; anything else yields
    /// `{RESOLVE:<NAME>:<hash>}`, where the hash is a prefix of the secret's
    /// BLAKE3 digest, so equal secrets always share a placeholder.
    pub fn placeholder_for(&self, secret: &str) -> String {
        if self.is_literal_template() {
            self.placeholder_template.clone()
        } else {
            self.hashed_placeholder(secret, PLACEHOLDER_HASH_LEN)
        }
    }

    /// The `{RESOLVE:<NAME>:<hash>}` form with `hex_len` digest digits
    pub fn hashed_placeholder(&self, secret: &str, hex_len: usize) -> String {
        hashed_placeholder(&self.name, secret, hex_len)
    }
}

/// `{RESOLVE:<NAME>:<hash>}` for `secret` under the pattern called `name`
pub fn hashed_placeholder(name: &str, secret: &str, hex_len: usize) -> String {
    let digest = blake3::hash(secret.as_bytes()).to_hex();
    let digest = digest.as_str();
    let hex_len = hex_len.clamp(1, digest.len());
    format!("{{RESOLVE:{}:{}}}", name.to_uppercase(), &digest[..hex_len])
}
