//! Error types for onlinepf.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failure class: bad input, model failures, or stream I/O.
//!
//! Stream exhaustion is not an error. Sources report it with `Ok(None)`
//! and the runner turns it into a clean termination.

use std::io;

use thiserror::Error;

/// Validation errors for configuration and textual input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Particle population must contain at least one particle")]
    EmptyPopulation,

    #[error("Resampling multiplier must be at least 1, got {multiplier}")]
    InvalidMultiplier {
        multiplier: usize,
    },

    #[error("Malformed statement '{statement}': {reason}")]
    MalformedStatement {
        statement: String,
        reason: String,
    },

    #[error("Invalid literal '{literal}'")]
    InvalidLiteral {
        literal: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised by a model-evaluation engine.
///
/// These are fatal for a run: evidence that references something the
/// model does not define cannot be applied to any particle.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Undefined entity '{name}' referenced by '{term}'")]
    UndefinedEntity {
        name: String,
        term: String,
    },

    #[error("Type mismatch for '{term}': expected {expected}, found {found}")]
    TypeMismatch {
        term: String,
        expected: String,
        found: String,
    },

    #[error("Model returned invalid likelihood {value} for '{evidence}'")]
    InvalidLikelihood {
        value: f64,
        evidence: String,
    },

    #[error("Model evaluation failed: {message}")]
    Evaluation {
        message: String,
    },
}

/// I/O errors on the evidence source or the output channels.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to read evidence stream: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to {channel} channel: {source}")]
    Write {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("The {channel} channel is closed")]
    Closed {
        channel: String,
    },

    #[error("Failed to open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Top-level error type for onlinepf.
#[derive(Debug, Error)]
pub enum PfError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PfError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a model error.
    #[must_use]
    pub const fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the run cannot continue after this error.
    ///
    /// Only malformed configuration is reported before a run starts; every
    /// error surfacing during a step ends the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(e) => !matches!(e, ValidationError::InvalidConfig { .. }),
            Self::Model(_) | Self::Stream(_) | Self::Internal { .. } => true,
        }
    }
}

/// Result type alias for onlinepf operations.
pub type PfResult<T> = Result<T, PfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_multiplier() {
        let err = ValidationError::InvalidMultiplier { multiplier: 0 };
        let msg = format!("{err}");
        assert!(msg.contains("at least 1"));
        assert!(msg.contains('0'));
    }

    #[test]
    fn test_validation_error_statement() {
        let err = ValidationError::MalformedStatement {
            statement: "obs X".to_string(),
            reason: "missing '='".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("obs X"));
        assert!(msg.contains("missing '='"));
    }

    #[test]
    fn test_model_error_undefined_entity() {
        let err = ModelError::UndefinedEntity {
            name: "Foo".to_string(),
            term: "Foo(@3)".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Undefined entity 'Foo'"));
        assert!(msg.contains("Foo(@3)"));
    }

    #[test]
    fn test_stream_error_write() {
        let err = StreamError::Write {
            channel: "results".to_string(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "closed"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("results"));
        assert!(msg.contains("closed"));
    }

    #[test]
    fn test_pf_error_from_validation() {
        let pf_err: PfError = ValidationError::EmptyPopulation.into();
        assert!(pf_err.is_validation());
        assert!(pf_err.is_fatal());
    }

    #[test]
    fn test_pf_error_from_model() {
        let pf_err: PfError = ModelError::Evaluation {
            message: "boom".to_string(),
        }
        .into();
        assert!(pf_err.is_model());
        assert!(pf_err.is_fatal());
    }

    #[test]
    fn test_pf_error_config_is_not_fatal_mid_run() {
        let pf_err: PfError = ValidationError::InvalidConfig {
            reason: "bad".to_string(),
        }
        .into();
        assert!(!pf_err.is_fatal());
    }

    #[test]
    fn test_pf_error_internal() {
        let err = PfError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
