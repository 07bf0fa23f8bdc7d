//! Error taxonomy for the ingestion pipeline and document store.
//!
//! Every stage reports failures as an [`IngestError`] carrying the
//! user-visible message. The orchestrator only inspects the variant to
//! short-circuit; the boundary converts the error into the uniform
//! `{"status": "ERROR", "errors": [...]}` shape via
//! [`ActionResponse`](crate::models::ActionResponse).

use thiserror::Error;

/// A pipeline or store failure.
///
/// The `Display` output is exactly the message shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Bad, missing, or oversized input. Fixable by the caller.
    #[error("{0}")]
    Validation(String),
    /// The text-extraction backend failed.
    #[error("{0}")]
    Extraction(String),
    /// The target search index is missing or unreachable.
    #[error("{0}")]
    IndexNotReady(String),
    /// A write to the persistence layer failed.
    #[error("{0}")]
    Database(String),
    /// A read matched no records.
    #[error("{0}")]
    NotFound(String),
}

impl IngestError {
    /// Machine-readable code, used in logs and HTTP status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation_error",
            IngestError::Extraction(_) => "extraction_error",
            IngestError::IndexNotReady(_) => "index_not_ready",
            IngestError::Database(_) => "database_error",
            IngestError::NotFound(_) => "not_found",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            IngestError::Validation(m)
            | IngestError::Extraction(m)
            | IngestError::IndexNotReady(m)
            | IngestError::Database(m)
            | IngestError::NotFound(m) => m,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Database(format!("database error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message() {
        let err = IngestError::Validation("No file was provided.".to_string());
        assert_eq!(err.to_string(), "No file was provided.");
        assert_eq!(err.message(), "No file was provided.");
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn sqlx_errors_map_to_database() {
        let err: IngestError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, IngestError::Database(_)));
    }
}
