//! Error types for the care pathway engine.
//!
//! Validation, not-found and conflict errors are surfaced to the caller
//! synchronously and never retried by the engine. External delivery errors
//! are recorded on the owning entity and retried by the relevant sweep.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CarePathwayError {
    /// Malformed input, e.g. a non-numeric operand in a numeric decision rule
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal state transition or a stale concurrent write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Notification or compensation provider failure
    #[error("External delivery error: {service} - {reason}")]
    ExternalDelivery { service: String, reason: String },

    /// A compensation action ran out of retries and needs a manual decision
    #[error("Compensation action {action_id} for order {order_id} exhausted its retries")]
    CompensationExhausted { action_id: Uuid, order_id: Uuid },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CarePathwayError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn external(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalDelivery {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Only provider failures drive retry counters
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalDelivery { .. })
    }

    /// Errors caused by the request itself rather than by the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for CarePathwayError {
    fn from(error: serde_json::Error) -> Self {
        CarePathwayError::Event(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for CarePathwayError {
    fn from(error: config::ConfigError) -> Self {
        CarePathwayError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CarePathwayError>;
