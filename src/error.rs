// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the adaptation engine.
///
/// `Validation` and `NotFound` map to client errors. Generation failures are
/// not raised through this type; they are recorded on the adaptation row
/// and returned to the caller as a FAILED state with a retry hint.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed on '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external service '{service}' failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("illegal transition for {entity}: cannot {action} from {from}")]
    State {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("sqlite error: {0}")]
    Database(rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn state(entity: &'static str, from: impl Into<String>, action: &'static str) -> Self {
        EngineError::State {
            entity,
            from: from.into(),
            action,
        }
    }

    /// Stable code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            EngineError::State { .. } => "STATE_ERROR",
            EngineError::Database(_) | EngineError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ExternalService { .. } | EngineError::Conflict(_)
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                EngineError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => EngineError::Database(err),
        }
    }
}

/// Failures reported by the generative content model.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("model rate limited")]
    RateLimited,
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        EngineError::ExternalService {
            service: "generative-model".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(EngineError::validation("x", "y").code(), "VALIDATION_ERROR");
        assert_eq!(EngineError::not_found("Lesson", "1").code(), "NOT_FOUND");
        assert_eq!(
            EngineError::state("Assessment", "completed", "submit").code(),
            "STATE_ERROR"
        );
        let ext: EngineError = ModelError::RateLimited.into();
        assert_eq!(ext.code(), "EXTERNAL_SERVICE_ERROR");
        assert!(ext.is_retryable());
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: EngineError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Conflict(_)), "got {err:?}");
    }
}
