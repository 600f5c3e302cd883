//! Bundle processing errors.

use std::fmt;

use octofhir_core::HookError;
use octofhir_storage::StorageError;

use crate::model::ResponseBundle;
use crate::outcome::{IssueSeverity, OperationOutcome, OutcomeIssue};

/// Errors raised while validating or executing a bundle entry.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Malformed bundle or entry shape.
    #[error("{0}")]
    Structural(String),

    /// The resource payload failed validation.
    #[error("Input resource failed validation: {}", summarize(.issues))]
    ValidationFailed { issues: Vec<OutcomeIssue> },

    #[error("Resource type '{actual}' does not match type specified in request URI: {expected}")]
    TypeMismatch { expected: String, actual: String },

    #[error("{0}")]
    InvalidInput(String),

    /// A search or history parameter could not be parsed.
    #[error("{0}")]
    InvalidQuery(String),

    /// The If-Match version does not match the current version.
    #[error("{0}")]
    Conflict(String),

    #[error("Resource '{resource}' not found")]
    NotFound { resource: String },

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("Duplicate local identifier encountered in bundled request entry: {0}")]
    DuplicateLocalReference(String),

    #[error("Local reference '{0}' is undefined in the request bundle")]
    UnresolvedLocalReference(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Interceptor failed: {0}")]
    Interceptor(#[from] HookError),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(issues: &[OutcomeIssue]) -> String {
    issues
        .iter()
        .filter_map(|i| i.diagnostics.as_deref())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BundleError {
    #[must_use]
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    #[must_use]
    pub fn validation_failed(issues: Vec<OutcomeIssue>) -> Self {
        Self::ValidationFailed { issues }
    }

    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    #[must_use]
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[must_use]
    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::MethodNotAllowed(msg.into())
    }

    #[must_use]
    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Storage(e) => e.is_version_conflict() || e.is_already_exists(),
            _ => false,
        }
    }

    /// HTTP status for the response entry (or the whole bundle) this error ends.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Structural(_)
            | Self::ValidationFailed { .. }
            | Self::TypeMismatch { .. }
            | Self::InvalidInput(_)
            | Self::InvalidQuery(_)
            | Self::UnsupportedOperation(_)
            | Self::DuplicateLocalReference(_)
            | Self::UnresolvedLocalReference(_) => 400,
            Self::Conflict(_) => 409,
            Self::NotFound { .. } => 404,
            Self::MethodNotAllowed(_) => 405,
            Self::PreconditionFailed(_) => 412,
            Self::Storage(e) => match e {
                StorageError::NotFound { .. } => 404,
                StorageError::VersionConflict { .. } | StorageError::AlreadyExists { .. } => 409,
                StorageError::InvalidResource { .. } => 400,
                StorageError::TransactionError { .. } | StorageError::Internal { .. } => 500,
            },
            Self::Interceptor(e) if e.is_rejection() => 400,
            Self::Interceptor(_) | Self::Internal(_) => 500,
        }
    }

    /// FHIR issue type code for the OperationOutcome.
    #[must_use]
    pub fn issue_code(&self) -> &'static str {
        match self {
            Self::Structural(_) => "structure",
            Self::ValidationFailed { .. }
            | Self::TypeMismatch { .. }
            | Self::InvalidInput(_)
            | Self::InvalidQuery(_) => "invalid",
            Self::Conflict(_) => "conflict",
            Self::NotFound { .. } => "not-found",
            Self::MethodNotAllowed(_) | Self::UnsupportedOperation(_) => "not-supported",
            Self::PreconditionFailed(_) => "multiple-matches",
            Self::DuplicateLocalReference(_) => "duplicate",
            Self::UnresolvedLocalReference(_) => "processing",
            Self::Storage(e) => match e {
                StorageError::NotFound { .. } => "not-found",
                StorageError::VersionConflict { .. } | StorageError::AlreadyExists { .. } => {
                    "conflict"
                }
                StorageError::InvalidResource { .. } => "invalid",
                StorageError::TransactionError { .. } => "transient",
                StorageError::Internal { .. } => "exception",
            },
            Self::Interceptor(e) if e.is_rejection() => "business-rule",
            Self::Interceptor(_) | Self::Internal(_) => "exception",
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.status() {
            404 => ErrorCategory::NotFound,
            409 | 412 => ErrorCategory::Conflict,
            405 => ErrorCategory::NotAllowed,
            s if s >= 500 => ErrorCategory::Internal,
            _ => ErrorCategory::Client,
        }
    }

    /// Validation failures list every issue; other errors produce a single
    /// `error` issue.
    #[must_use]
    pub fn to_operation_outcome(&self) -> OperationOutcome {
        match self {
            Self::ValidationFailed { issues } if !issues.is_empty() => {
                OperationOutcome::new(issues.clone())
            }
            _ => {
                let severity = if self.status() >= 500 {
                    IssueSeverity::Fatal
                } else {
                    IssueSeverity::Error
                };
                OperationOutcome::single(severity, self.issue_code(), self.to_string())
            }
        }
    }
}

/// Coarse error classes for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Client,
    NotFound,
    NotAllowed,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::NotFound => write!(f, "not_found"),
            Self::NotAllowed => write!(f, "not_allowed"),
            Self::Conflict => write!(f, "conflict"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A bundle that failed as a whole.
///
/// Carries the response bundle as far as it was filled in, so callers can
/// report which entry broke the bundle.
#[derive(Debug, thiserror::Error)]
#[error("Bundle processing failed: {error}")]
pub struct BundleFailure {
    #[source]
    pub error: BundleError,
    pub response: ResponseBundle,
}

impl BundleFailure {
    pub fn new(error: BundleError, response: ResponseBundle) -> Self {
        Self { error, response }
    }

    /// Overall status: 404 and server errors pass through, everything else
    /// is reported as 400.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self.error.status() {
            404 => 404,
            s if s >= 500 => s,
            _ => 400,
        }
    }

    #[must_use]
    pub fn to_operation_outcome(&self) -> OperationOutcome {
        self.error.to_operation_outcome()
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
