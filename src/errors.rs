//! Typed error taxonomy for the ordering and transfer engine.
//!
//! Every service operation returns `Result<T, EngineError>`. The variants map
//! one-to-one onto the client-visible error kinds (`NotFound`, `Forbidden`,
//! `BadRequest`, `Validation`, `Conflict`) plus the storage and plumbing
//! failures that surface as a generic internal error.

use thiserror::Error;

/// Errors from the board engine (reorder, transfer, audit, import).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed on '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing or invalid caller identity")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for the kinds a caller can act on (everything except storage and
    /// plumbing failures).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::LockPoisoned | Self::Other(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_entity_and_id() {
        let err = EngineError::not_found("Card", "c-42");
        match &err {
            EngineError::NotFound { entity, id } => {
                assert_eq!(*entity, "Card");
                assert_eq!(id, "c-42");
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Card c-42 not found");
    }

    #[test]
    fn validation_names_the_field() {
        let err = EngineError::validation("columns", "duplicate id");
        assert!(err.to_string().contains("'columns'"));
        assert!(err.to_string().contains("duplicate id"));
    }

    #[test]
    fn database_errors_convert_and_are_not_client_errors() {
        let err: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EngineError::Database(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn client_kinds_are_client_errors() {
        assert!(EngineError::Forbidden("x".into()).is_client_error());
        assert!(EngineError::BadRequest("x".into()).is_client_error());
        assert!(EngineError::Conflict("x".into()).is_client_error());
        assert!(EngineError::Unauthorized.is_client_error());
        assert!(!EngineError::LockPoisoned.is_client_error());
    }

    #[test]
    fn anyhow_errors_convert_to_other() {
        let err: EngineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, EngineError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
