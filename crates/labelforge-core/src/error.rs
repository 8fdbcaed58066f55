//! Error types for LabelForge Core.

use std::path::PathBuf;
use thiserror::Error;

/// Why a user-supplied path or configuration was rejected.
///
/// Kept separate from [`CoreError`] so callers can tell "file not found" from
/// "path outside allowed bounds" from "schema validation failure" without
/// matching on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    /// The path is empty or whitespace.
    #[error("path must not be empty")]
    EmptyPath,

    /// The resolved file does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The resolved path escapes the allowed root.
    #[error("path {} is outside the allowed root {}", .path.display(), .root.display())]
    OutsideRoot {
        /// The resolved path.
        path: PathBuf,
        /// The root it had to stay under.
        root: PathBuf,
    },

    /// The file extension is not on the allow-list.
    #[error("extension of {} is not one of: {}", .path.display(), .allowed.join(", "))]
    DisallowedExtension {
        /// The offending path.
        path: PathBuf,
        /// Allowed extensions (lowercase, without dot).
        allowed: Vec<String>,
    },

    /// One or more fields failed validation.
    #[error("validation failed: {}", format_field_errors(.0))]
    Schema(Vec<FieldError>),
}

/// A single field validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field name as it appears in the configuration.
    pub field: String,
    /// Human readable reason.
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Core error type for LabelForge operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Rejected input (paths, options).
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigIssue),

    /// Export-specific failures.
    #[error("export error: {0}")]
    Export(String),

    /// A filesystem operation kept failing after all retries.
    #[error("{operation} failed for {} after {attempts} attempts: {source}", .path.display())]
    RetriesExhausted {
        /// What was being attempted.
        operation: &'static str,
        /// Target path.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
        /// Last error seen.
        #[source]
        source: std::io::Error,
    },

    /// Settings file problems.
    #[error("settings error: {0}")]
    Settings(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_issue_conversion() {
        let issue = ConfigIssue::NotFound(PathBuf::from("/tmp/missing.yaml"));
        let err: CoreError = issue.clone().into();
        match err {
            CoreError::Config(inner) => assert_eq!(inner, issue),
            _ => panic!("Expected Config error variant"),
        }
    }

    #[test]
    fn test_schema_message_lists_fields() {
        let issue = ConfigIssue::Schema(vec![
            FieldError::new("epochs", "must be >= 1"),
            FieldError::new("model", "unknown model"),
        ]);
        let msg = issue.to_string();
        assert!(msg.contains("epochs: must be >= 1"));
        assert!(msg.contains("model: unknown model"));
    }

    #[test]
    fn test_core_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
