//! Engine-level errors.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::ValidationError;

/// Errors returned by the sleep and feeding managers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Client input was malformed; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced session, timer or record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request is well-formed but conflicts with current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record store failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl EngineError {
    /// Stable snake_case name of the error category, for wire responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            err @ StoreError::Backend(_) => Self::Store(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflicts_surface_as_engine_conflicts() {
        let err: EngineError = StoreError::Conflict("stale timer".into()).into();
        assert!(matches!(err, EngineError::Conflict(ref m) if m == "stale timer"));

        let err: EngineError = StoreError::NotFound {
            entity: "feeding record",
            id: "r1".into(),
        }
        .into();
        assert_eq!(err.to_string(), "feeding record not found: r1");
        assert_eq!(err.kind(), "not_found");
    }
}
