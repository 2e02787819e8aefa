//! Error types for the ContainifyCI engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid {field} ({value}): {message}")]
    Validation {
        field: String,
        value: String,
        message: String,
    },

    #[error("build stage '{op}' failed for {language}")]
    Build {
        op: String,
        language: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("container {op} failed{}: {detail}", subject_suffix(.container_id, .image))]
    Container {
        op: String,
        container_id: Option<String>,
        image: Option<String>,
        detail: String,
    },

    #[error("cache {op} failed for {language} at {path:?}")]
    Cache {
        op: String,
        language: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration plugin failed: {0}")]
    Plugin(String),

    #[error("step '{step}' failed")]
    Step {
        step: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("run canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn subject_suffix(container_id: &Option<String>, image: &Option<String>) -> String {
    match (container_id, image) {
        (Some(id), _) => format!(" for container {}", short_id(id)),
        (None, Some(image)) => format!(" for image {}", image),
        (None, None) => String::new(),
    }
}

/// First 12 characters of a container id, the way runtimes print them.
pub fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

impl EngineError {
    /// Container-operation failure without a known container id.
    pub fn container(op: &str, image: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::Container {
            op: op.to_string(),
            container_id: None,
            image: Some(image.into()),
            detail: detail.into(),
        }
    }

    /// Container-operation failure for a known container id.
    pub fn container_id(op: &str, id: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::Container {
            op: op.to_string(),
            container_id: Some(id.into()),
            image: None,
            detail: detail.into(),
        }
    }

    /// Wrap an error as a named build-pipeline stage failure.
    pub fn build_stage(op: &str, language: &str, source: EngineError) -> Self {
        EngineError::Build {
            op: op.to_string(),
            language: language.to_string(),
            source: Box::new(source),
        }
    }

    /// Wrap an error with the name of the step that produced it.
    pub fn step(step: &str, source: EngineError) -> Self {
        match source {
            // Keep the innermost step attribution.
            err @ EngineError::Step { .. } => err,
            other => EngineError::Step {
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn validation(field: &str, value: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.to_string(),
            value: value.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_step_wrapping_preserves_cause() {
        let inner = EngineError::container("pull", "alpine:latest", "no such image");
        let wrapped = EngineError::step("golang", inner);

        assert!(wrapped.to_string().contains("golang"));
        let cause = wrapped.source().expect("step error carries a cause");
        assert!(cause.to_string().contains("alpine:latest"));
    }

    #[test]
    fn test_step_wrapping_is_not_nested() {
        let inner = EngineError::step("golang", EngineError::Canceled);
        let rewrapped = EngineError::step("outer", inner);

        assert!(rewrapped.to_string().contains("golang"));
        assert!(!rewrapped.to_string().contains("outer"));
    }

    #[test]
    fn test_container_error_formats_short_id() {
        let err = EngineError::container_id("stop", "0123456789abcdef0123", "gone");
        assert!(err.to_string().contains("0123456789ab"));
        assert!(!err.to_string().contains("0123456789abcdef0123"));
    }

    #[test]
    fn test_build_stage_chain() {
        let err = EngineError::build_stage(
            "build_intermediate",
            "golang",
            EngineError::container("build", "containifyci/golang:abc", "exit 1"),
        );
        assert!(err.to_string().contains("build_intermediate"));
        assert!(err.source().is_some());
    }
}
