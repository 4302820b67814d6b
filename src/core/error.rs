use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::Value;

/// Field-level validation messages keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (attribute, messages) in other.errors {
            self.errors.entry(attribute).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, attribute: &str) -> Option<&[String]> {
        self.errors.get(attribute).map(Vec::as_slice)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(attribute, messages)| format!("{}: {}", attribute, messages.join("; ")))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Validation failed for record #{index}: {errors}")]
    ValidationFailed { index: usize, errors: FieldErrors },

    #[error("Stale write on '{table}': {} record(s) are outdated", stale.len())]
    StaleWrite { table: String, stale: Vec<Vec<Value>> },

    #[error("Execution error: {0}")]
    ExecutionFailed(String),

    #[error("Primary key reconciliation failed: {0}")]
    KeyReconciliation(String),

    #[error("Audit log write failed: {0}")]
    LogWriteFailed(Box<BatchError>),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

impl BatchError {
    /// True for the optimistic-concurrency failure a caller may retry after re-fetching.
    pub fn is_stale(&self) -> bool {
        match self {
            Self::StaleWrite { .. } => true,
            Self::LogWriteFailed(inner) => inner.is_stale(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
