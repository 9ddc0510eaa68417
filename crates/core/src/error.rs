//! Error taxonomy shared by every store in the crate.
//!
//! The storage layer wraps driver failures into these kinds and never retries
//! internally. Callers decide whether to re-fetch and reapply.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by store, scheduler and engine operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity does not exist, or belongs to another tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Stale version, illegal state transition, or a single-use value already consumed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input, including invalid plan graphs.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller's context was cancelled before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification used by callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Cancelled,
    Internal,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Database(_) | StoreError::Serialization(_) | StoreError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Status code an API layer should answer with. Internal details stay server-side.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Cancelled | ErrorKind::Internal => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            match code.code {
                ErrorCode::OperationInterrupted => return StoreError::Cancelled,
                ErrorCode::ConstraintViolation
                    if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return StoreError::Conflict(err.to_string());
                }
                _ => {}
            }
        }
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping_follows_kind() {
        assert_eq!(StoreError::not_found("run", "r-1").http_status(), 404);
        assert_eq!(StoreError::Conflict("stale".into()).http_status(), 409);
        assert_eq!(StoreError::Validation("cycle".into()).http_status(), 400);
        assert_eq!(StoreError::Database("disk".into()).http_status(), 500);
        assert_eq!(StoreError::Cancelled.http_status(), 500);
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .map_err(StoreError::from)
            .unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");
    }
}
