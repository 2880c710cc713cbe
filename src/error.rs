//! Error types for the parameter core.
//!
//! Every failure a script author can cause falls into one of four kinds. The
//! kind survives the trip through the Rhai engine so diagnostics can report
//! it exactly (see [`crate::script_diagnostics`]).

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the parameter tree, registry and rebuild pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A root name or slot key is empty or collides with another identifier.
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: String },

    /// No parameter matches the requested path.
    #[error("parameter not found: {path}")]
    NotFound { path: String },

    /// A value does not satisfy the declared type, bounds or limits.
    #[error("constraint violation at {path}: {reason}")]
    ConstraintViolation { path: String, reason: String },

    /// A user build function failed.
    #[error("build failure in {context}: {message}")]
    BuildFailure { context: String, message: String },
}

impl ParamError {
    pub fn invalid_identifier(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn constraint(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn build_failure(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildFailure {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ParamError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            ParamError::NotFound { .. } => ErrorKind::NotFound,
            ParamError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            ParamError::BuildFailure { .. } => ErrorKind::BuildFailure,
        }
    }
}

/// Payload-free discriminant of [`ParamError`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidIdentifier,
    NotFound,
    ConstraintViolation,
    BuildFailure,
}

/// Rejection from a geometry kernel (bad dimensions, unsupported input).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("{op}: {what} must be positive and finite, got {value}")]
    NonPositive {
        op: &'static str,
        what: &'static str,
        value: f64,
    },

    #[error("{op}: {reason}")]
    Unsupported { op: &'static str, reason: String },
}

impl From<KernelError> for ParamError {
    fn from(err: KernelError) -> Self {
        ParamError::build_failure("geometry kernel", err.to_string())
    }
}

pub type Result<T, E = ParamError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(ParamError::not_found("a.b").kind(), ErrorKind::NotFound);
        assert_eq!(
            ParamError::constraint("Shape", "not in limits").kind(),
            ErrorKind::ConstraintViolation
        );
    }

    #[test]
    fn test_kernel_error_becomes_build_failure() {
        let err: ParamError = KernelError::NonPositive {
            op: "box",
            what: "width",
            value: -1.0,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::BuildFailure);
        assert!(err.to_string().contains("width must be positive"));
    }
}
