use thiserror::Error;

/// Core error types for OctoFHIR primitives
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid FHIR ID: {0}")]
    InvalidId(String),

    #[error("Invalid FHIR DateTime: {0}")]
    InvalidDateTime(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

impl CoreError {
    /// Create a new InvalidId error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a new InvalidDateTime error
    pub fn invalid_date_time(datetime: impl Into<String>) -> Self {
        Self::InvalidDateTime(datetime.into())
    }

    /// Create a new InvalidReference error
    pub fn invalid_reference(reference: impl Into<String>) -> Self {
        Self::InvalidReference(reference.into())
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
