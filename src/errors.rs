use serde::Serialize;

/// Central error type for ledger, registry, and workflow operations.
///
/// Errors raised by the inventory ledger, the capacity registry, or the
/// unique-unit registry are surfaced verbatim through the workflow step that
/// invoked them; workflows never swallow a failed mutation.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Convenience constructor for missing-entity errors.
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Stable machine-readable code for each error kind.
    ///
    /// The view/API layer maps these to status codes and user-facing
    /// messages; the core only guarantees the codes stay distinct and stable.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::EventError(_) => "event_error",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }
}
