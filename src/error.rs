//! Crate error type.
//!
//! Every fallible operation returns [`Result`]. Validation collects all
//! violations before failing so `wwapi validate` reports them together.

use crate::core::parser::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{} validation error(s):\n{}", .0.len(), join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("dependency cycle detected involving: {0}")]
    Cycle(String),

    #[error("unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("asset {}: {reason}", path.display())]
    Asset { path: PathBuf, reason: String },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0} resource(s) failed")]
    ApplyFailed(u32),

    #[error("{0} drift finding(s)")]
    Drift(usize),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap an I/O error with the path and the attempted action.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Unknown {
            kind,
            name: name.into(),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_validation_lists_every_message() {
        let err = Error::Validation(vec![
            ValidationError {
                message: "first".to_string(),
            },
            ValidationError {
                message: "second".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 validation error(s)"));
        assert!(text.contains("  first"));
        assert!(text.contains("  second"));
    }

    #[test]
    fn test_error_io_mentions_path() {
        let err = Error::io(
            "read",
            "/nope/wwapi.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.to_string(), "cannot read /nope/wwapi.yaml: missing");
    }

    #[test]
    fn test_error_unknown() {
        let err = Error::unknown("stack", "Ghost");
        assert_eq!(err.to_string(), "unknown stack 'Ghost'");
    }
}
