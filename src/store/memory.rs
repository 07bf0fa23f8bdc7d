//! In-memory [`DocumentStore`] for tests and embedding.
//!
//! Records are kept in insertion order behind `std::sync::RwLock`; chunks
//! are grouped by document id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{not_found_document, DocumentStore, NO_DOCUMENTS};
use crate::cache::{NoopRevalidate, Revalidate, RevalidateScope};
use crate::chunk::to_chunks;
use crate::error::IngestError;
use crate::models::{ChatDocumentRecord, Chunk, CHAT_DOCUMENT_TYPE};

pub struct InMemoryDocumentStore {
    records: RwLock<Vec<ChatDocumentRecord>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    revalidate: Arc<dyn Revalidate>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_revalidate(Arc::new(NoopRevalidate))
    }

    pub fn with_revalidate(revalidate: Arc<dyn Revalidate>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            chunks: RwLock::new(HashMap::new()),
            revalidate,
        }
    }

    /// Stored chunks of a document, in index order.
    pub fn chunks_of(&self, document_id: &str) -> Vec<Chunk> {
        self.chunks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(document_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<ChatDocumentRecord, IngestError> {
        self.create_with_chunks(thread_id, user_id, name, &[]).await
    }

    async fn create_with_chunks(
        &self,
        thread_id: &str,
        user_id: &str,
        name: &str,
        chunks: &[String],
    ) -> Result<ChatDocumentRecord, IngestError> {
        let record = ChatDocumentRecord {
            id: Uuid::new_v4().to_string(),
            chat_thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            doc_type: CHAT_DOCUMENT_TYPE.to_string(),
            is_deleted: false,
            name: name.to_string(),
        };
        {
            // Lock order: chunks, then records.
            let mut stored = self.chunks.write().unwrap_or_else(|e| e.into_inner());
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if !chunks.is_empty() {
                stored.insert(record.id.clone(), to_chunks(&record.id, chunks));
            }
            records.push(record.clone());
        }

        self.revalidate
            .revalidate(&RevalidateScope::chat_thread(thread_id));
        Ok(record)
    }

    async fn list_by_thread(&self, thread_id: &str) -> Result<Vec<ChatDocumentRecord>, IngestError> {
        let mut found: Vec<ChatDocumentRecord> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| {
                r.doc_type == CHAT_DOCUMENT_TYPE && r.chat_thread_id == thread_id && !r.is_deleted
            })
            .cloned()
            .collect();

        if found.is_empty() {
            return Err(IngestError::NotFound(NO_DOCUMENTS.to_string()));
        }
        // Stable: equal timestamps keep insertion order.
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn soft_delete(
        &self,
        thread_id: &str,
        id: &str,
    ) -> Result<ChatDocumentRecord, IngestError> {
        let deleted = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let record = records
                .iter_mut()
                .find(|r| r.id == id && r.chat_thread_id == thread_id && !r.is_deleted)
                .ok_or_else(|| not_found_document(id))?;
            record.is_deleted = true;
            record.clone()
        };

        self.revalidate
            .revalidate(&RevalidateScope::chat_thread(thread_id));
        Ok(deleted)
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), IngestError> {
        self.chunks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(document_id.to_string(), chunks.to_vec());
        Ok(())
    }
}
