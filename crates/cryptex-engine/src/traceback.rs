//! Location scrubbing for error text and stack traces
//!
//! Applied after secret substitution: line numbers, source locations and
//! absolute directory prefixes are masked, and lines dumping local variables
//! are dropped wholesale.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const REDACTED_LOCALS: &str = "<local variables redacted>";

lazy_static! {
    static ref QUOTED_FILE: Regex =
        Regex::new(r#"File "(?:[^"]*/)?([^"/]+/[^"/]+)""#).unwrap();
    static ref LINE_NUMBER: Regex = Regex::new(r"\bline \d+").unwrap();
    static ref SOURCE_LOCATION: Regex = Regex::new(
        r"(\.(?:rs|py|js|ts|go|java|rb|c|cc|cpp|h|hpp)):\d+(?::\d+)?\b"
    )
    .unwrap();
    static ref ABSOLUTE_DIR: Regex =
        Regex::new(r#"(^|[\s"'(\[=])/(?:[^\s"'()\[\]/]+/)+"#).unwrap();
    static ref LOCAL_VARIABLES: Regex = Regex::new(r"(?i)local\s+variables|\blocals\b").unwrap();
}

/// Mask location details in already secret-free text, line by line
pub fn scrub_locations(text: &str) -> String {
    text.split_inclusive('\n')
        .map(|line| {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            format!("{}{}", scrub_line(body), newline)
        })
        .collect()
}

fn scrub_line(line: &str) -> String {
    if LOCAL_VARIABLES.is_match(line) {
        let indent = &line[..line.len() - line.trim_start().len()];
        return format!("{}{}", indent, REDACTED_LOCALS);
    }

    let line = QUOTED_FILE.replace_all(line, r#"File ".../<sanitized_path>/$1""#);
    let line = LINE_NUMBER.replace_all(&line, "line <redacted>");
    let line = SOURCE_LOCATION.replace_all(&line, "$1:<redacted>");
    let line = ABSOLUTE_DIR.replace_all(&line, "$1.../<sanitized_path>/");
    line.into_owned()
}

/// An error with every message in its chain sanitized
///
/// The original error and its trace are not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedError {
    /// Type name of the original error
    pub kind: String,
    pub message: String,
    /// Sanitized `source()` chain, outermost first
    pub causes: Vec<String>,
}

impl SanitizedError {
    pub fn is<E: ?Sized>(&self) -> bool {
        self.kind == std::any::type_name::<E>()
    }
}

impl fmt::Display for SanitizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for SanitizedError {}
