//! Document record storage.
//!
//! The [`DocumentStore`] trait covers every persistence operation the
//! ingestion flows and the HTTP server need: creating a record when a
//! document is attached to a thread, listing a thread's active documents,
//! soft-deleting, and replacing the chunk rows produced for a document.
//!
//! Writes trigger cache revalidation scoped to the thread's chat page via
//! the [`Revalidate`](crate::cache::Revalidate) handle each backend holds.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create`](DocumentStore::create) | Persist a new record for a thread |
//! | [`create_with_chunks`](DocumentStore::create_with_chunks) | Record and chunks in one write |
//! | [`list_by_thread`](DocumentStore::list_by_thread) | Active records, oldest first |
//! | [`soft_delete`](DocumentStore::soft_delete) | Mark a record deleted |
//! | [`replace_chunks`](DocumentStore::replace_chunks) | Swap a document's chunk rows |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::{ChatDocumentRecord, Chunk};

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

pub(crate) const SAVE_FAILED: &str = "Failed to save the document to the database.";
pub(crate) const NO_DOCUMENTS: &str = "No documents found.";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a fresh record named `name` for `thread_id`.
    ///
    /// `user_id` is stored as given; callers pass the output of
    /// [`hash_user_id`].
    async fn create(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<ChatDocumentRecord, IngestError>;

    /// Persist a record together with its chunk rows.
    ///
    /// Either both are stored or neither is, and revalidation only happens
    /// once both are visible.
    async fn create_with_chunks(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
        chunks: &[String],
    ) -> Result<ChatDocumentRecord, IngestError>;

    /// Active records of a thread ordered by creation time.
    ///
    /// An empty listing is reported as `NotFound`.
    async fn list_by_thread(&self, thread_id: &str) -> Result<Vec<ChatDocumentRecord>, IngestError>;

    /// Mark a record deleted and return it.
    async fn soft_delete(&self, thread_id: &str, id: &str)
        -> Result<ChatDocumentRecord, IngestError>;

    /// Replace every chunk row of `document_id` with `chunks`.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), IngestError>;
}

/// Stable user identifier: SHA-256 hex of the lower-cased email.
pub fn hash_user_id(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn not_found_document(id: &str) -> IngestError {
    IngestError::NotFound(format!("Document '{}' was not found.", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_hash_ignores_case() {
        let a = hash_user_id("Alice@Example.com");
        let b = hash_user_id("alice@example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_user_id("bob@example.com"));
    }
}
