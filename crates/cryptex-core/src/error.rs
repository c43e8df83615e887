//! Error types for cryptex
//!
//! Every rendering of an [`Error`] (its `Display`, its details and its
//! [`ErrorReport`]) is scrubbed, so errors can be logged or serialized
//! without reopening the leak the engine exists to close.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use time::OffsetDateTime;

use crate::scrub::{scrub_details, scrub_message};

pub type Result<T> = std::result::Result<T, Error>;

/// Engine operation measured against a latency ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Sanitization,
    Resolution,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sanitization => "sanitization",
            Self::Resolution => "resolution",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sanitization => write!(f, "Sanitization"),
            Self::Resolution => write!(f, "Resolution"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid pattern '{}': {}", scrubbed(.name), scrubbed(.reason))]
    InvalidPattern { name: String, reason: String },

    #[error("Pattern already registered: {}", scrubbed(.0))]
    DuplicateName(String),

    #[error("Input at {} is {size} bytes, exceeding the {limit} byte limit", scrubbed(.path))]
    InputTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("Context {} not found or expired", scrubbed(.0))]
    ContextNotFound(String),

    #[error(
        "{operation} took {:.2}ms, exceeding {:.2}ms threshold",
        millis(.duration),
        millis(.threshold)
    )]
    PerformanceViolation {
        operation: Operation,
        duration: Duration,
        threshold: Duration,
        context_id: Option<String>,
    },

    #[error("Security breach detected: {}", scrubbed(.breach))]
    SecurityBreach {
        breach: String,
        context_id: Option<String>,
    },

    #[error("Serialization error: {}", scrubbed(.0))]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {}", scrubbed_chain(.0))]
    Other(#[from] anyhow::Error),
}

fn scrubbed(value: &impl fmt::Display) -> String {
    scrub_message(&value.to_string())
}

fn scrubbed_chain(error: &anyhow::Error) -> String {
    scrub_message(&format!("{:#}", error))
}

fn millis(duration: &Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

impl Error {
    /// Stable, machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPattern { .. } => "INVALID_PATTERN",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::InputTooLarge { .. } => "INPUT_TOO_LARGE",
            Self::ContextNotFound(_) => "CONTEXT_NOT_FOUND",
            Self::PerformanceViolation { .. } => "PERFORMANCE_THRESHOLD",
            Self::SecurityBreach { .. } => "SECURITY_VIOLATION",
            Self::Serialization(_) => "SERIALIZATION_FAILED",
            Self::Other(_) => "ENGINE_ERROR",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidPattern { .. } => "InvalidPatternError",
            Self::DuplicateName(_) => "DuplicateNameError",
            Self::InputTooLarge { .. } => "InputTooLargeError",
            Self::ContextNotFound(_) => "ContextNotFoundError",
            Self::PerformanceViolation { .. } => "PerformanceViolation",
            Self::SecurityBreach { .. } => "SecurityBreach",
            Self::Serialization(_) => "SerializationError",
            Self::Other(_) => "EngineError",
        }
    }

    pub fn context_id(&self) -> Option<&str> {
        match self {
            Self::ContextNotFound(id) => Some(id),
            Self::PerformanceViolation { context_id, .. }
            | Self::SecurityBreach { context_id, .. } => context_id.as_deref(),
            _ => None,
        }
    }

    /// Structured diagnostics, unscrubbed; use [`Error::to_report`] for output
    pub fn details(&self) -> Map<String, Value> {
        let details = match self {
            Self::InvalidPattern { name, reason } => json!({
                "pattern_name": name,
                "regex_error": reason,
                "suggestion": "Check the pattern name, template and regex syntax",
            }),
            Self::DuplicateName(name) => json!({
                "pattern_name": name,
                "suggestion": "Unregister the existing pattern first or pick another name",
            }),
            Self::InputTooLarge { path, size, limit } => json!({
                "path": path,
                "size": size,
                "limit": limit,
                "suggestion": "Reduce input size or raise the configured limit",
            }),
            Self::ContextNotFound(_) => json!({
                "operation": "lookup",
                "suggestion": "Check if the context has expired or was manually cleared",
            }),
            Self::PerformanceViolation {
                operation,
                duration,
                threshold,
                ..
            } => json!({
                "operation": operation.as_str(),
                "duration_ms": millis(duration),
                "threshold_ms": millis(threshold),
                "suggestion": match operation {
                    Operation::Sanitization => {
                        "Consider optimizing secret patterns or reducing data size"
                    }
                    Operation::Resolution => "Check if too many placeholders need resolution",
                },
            }),
            Self::SecurityBreach { breach, .. } => json!({
                "breach_type": breach,
                "action": "Operation blocked to prevent secret exposure",
            }),
            Self::Serialization(e) => json!({ "error": e.to_string() }),
            Self::Other(_) => json!({}),
        };
        match details {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Scrubbed, serializable form for logs and API responses
    pub fn to_report(&self) -> ErrorReport {
        let cause = match self {
            Self::Other(e) => e.chain().nth(1).map(|c| scrub_message(&c.to_string())),
            _ => std::error::Error::source(self).map(|c| scrub_message(&c.to_string())),
        };

        ErrorReport {
            error_type: self.error_type().to_string(),
            error_code: self.error_code().to_string(),
            message: self.to_string(),
            context_id: self.context_id().map(scrub_message),
            details: scrub_details(&self.details()),
            cause,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_type: String,
    pub error_code: String,
    pub message: String,
    pub context_id: Option<String>,
    pub details: Map<String, Value>,
    pub cause: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
}
