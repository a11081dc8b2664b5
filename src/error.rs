use thiserror::Error;

use crate::llm::LlmError;
use crate::schema::Ontology;
use crate::validate::Violation;

/// Main error type for ontokg
#[derive(Error, Debug)]
pub enum OntoKgError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Graph sink database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM call errors that were not absorbed by a retry policy
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// A checkpoint already exists under this key with different content
    #[error("Checkpoint conflict: '{key}' already holds a different artifact")]
    CheckpointConflict { key: String },

    /// A checkpoint file exists but fails its schema or digest check
    #[error("Invalid checkpoint '{key}': {reason}")]
    InvalidCheckpoint { key: String, reason: String },

    /// The committee did not produce a valid ontology within the round budget.
    /// `draft` is the last draft that passed validation.
    #[error("Ontology did not converge after {rounds} rounds ({} unresolved violations)", violations.len())]
    OntologyConvergence {
        rounds: usize,
        draft: Box<Ontology>,
        violations: Vec<Violation>,
    },

    /// Every chunk of an epoch failed
    #[error("Extraction failed: epoch {epoch} completed no chunks ({} failures)", failures.len())]
    ExtractionFailed { epoch: usize, failures: Vec<String> },

    /// An external resource failed; carries enough context to resume later
    #[error("External failure in run {run_id}, stage {stage}, index {index}: {source}")]
    External {
        run_id: String,
        stage: String,
        index: usize,
        #[source]
        source: Box<OntoKgError>,
    },

    /// An artifact failed conformance validation and cannot be persisted
    #[error("Conformance error: {0}")]
    Conformance(String),

    /// A run was resumed with a configuration different from its frozen snapshot
    #[error("Configuration mismatch for run {0}: start a new run instead")]
    ConfigMismatch(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<toml::de::Error> for OntoKgError {
    fn from(err: toml::de::Error) -> Self {
        OntoKgError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for OntoKgError {
    fn from(err: toml::ser::Error) -> Self {
        OntoKgError::Config(err.to_string())
    }
}

impl OntoKgError {
    /// Wrap an error with run/stage/index context so the caller can resume later.
    pub fn external(run_id: &str, stage: &str, index: usize, source: OntoKgError) -> Self {
        OntoKgError::External {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            index,
            source: Box::new(source),
        }
    }
}

/// Convenient Result type using OntoKgError
pub type Result<T> = std::result::Result<T, OntoKgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OntoKgError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OntoKgError = io_err.into();
        assert!(matches!(err, OntoKgError::Io(_)));
    }

    #[test]
    fn test_checkpoint_conflict_names_key() {
        let err = OntoKgError::CheckpointConflict {
            key: "fiction/ontology".to_string(),
        };
        assert!(err.to_string().contains("fiction/ontology"));
    }

    #[test]
    fn test_external_carries_context() {
        let err = OntoKgError::external(
            "20260101_120000_abcdef",
            "kg",
            3,
            OntoKgError::Llm(LlmError::Unavailable("connection refused".to_string())),
        );
        let msg = err.to_string();
        assert!(msg.contains("20260101_120000_abcdef"));
        assert!(msg.contains("kg"));
        assert!(msg.contains("3"));
    }
}
