//! Error types for chatvault-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("external_id {external_id} for '{slug}' is already claimed by '{claimed_by}'")]
    IdentityConflict {
        external_id: i64,
        slug: String,
        claimed_by: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error only invalidates the current conversation or message
    /// rather than the connection or the run.
    pub fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput(_) | Error::IdentityConflict { .. } | Error::NotFound(_)
        )
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conflict_is_unit_scoped() {
        let err = Error::IdentityConflict {
            external_id: 7,
            slug: "b".to_string(),
            claimed_by: "a".to_string(),
        };
        assert!(err.is_unit_scoped());
        assert_eq!(
            err.to_string(),
            "external_id 7 for 'b' is already claimed by 'a'"
        );
    }

    #[test]
    fn config_error_is_not_unit_scoped() {
        assert!(!Error::Config("bad zone".to_string()).is_unit_scoped());
        assert!(!Error::Database(sqlx::Error::PoolClosed).is_unit_scoped());
    }
}
