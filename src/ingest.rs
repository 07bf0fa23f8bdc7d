//! Ingestion orchestration.
//!
//! Turns an uploaded file into overlapping text chunks in three stages,
//! stopping at the first failure:
//!
//! ```text
//! IndexCheck ──▶ Load (upload gate + extractor) ──▶ Chunk ──▶ OK
//! ```
//!
//! There is no partial success and no retry. [`Pipeline::upload_document`]
//! extends the flow by recording the document against a chat thread and
//! storing its chunks for embedding.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::credential::Credential;
use crate::document_intelligence::{self, DocumentIntelligenceExtractor};
use crate::error::IngestError;
use crate::extract::{LocalExtractor, TextExtractor};
use crate::index::{self, IndexReadiness, LocalIndex, SearchServiceIndex};
use crate::models::{ActionResponse, CrackedDocument, UploadForm, UploadedDocument};
use crate::store::{hash_user_id, DocumentStore};
use crate::upload::validate_upload;

/// Display name used when an upload carries no file name.
pub const UNTITLED_DOCUMENT: &str = "untitled";

/// The collaborators of one ingestion flow.
///
/// Cheap to clone; every field is shared and holds no per-call state.
#[derive(Clone)]
pub struct Pipeline {
    extractor: Arc<dyn TextExtractor>,
    index: Arc<dyn IndexReadiness>,
    chunking: ChunkingConfig,
    max_upload_size: u64,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        index: Arc<dyn IndexReadiness>,
        chunking: ChunkingConfig,
        max_upload_size: u64,
    ) -> Self {
        Self {
            extractor,
            index,
            chunking,
            max_upload_size,
        }
    }

    /// Build the configured extractor and index check.
    ///
    /// Credentials for remote backends are resolved here, once.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        Self::from_config_with_env(config, pool, |key| std::env::var(key).ok())
    }

    pub fn from_config_with_env<F>(config: &Config, pool: SqlitePool, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_mi = config.auth.use_managed_identities;

        let extractor: Arc<dyn TextExtractor> = match config.extraction.provider.as_str() {
            "document-intelligence" => {
                let credential =
                    Credential::resolve(use_mi, document_intelligence::API_KEY_VAR, &env)?;
                Arc::new(DocumentIntelligenceExtractor::new(
                    &config.extraction,
                    credential,
                )?)
            }
            _ => Arc::new(LocalExtractor::new()),
        };

        let index: Arc<dyn IndexReadiness> = match config.search.provider.as_str() {
            "azure" => {
                let credential = Credential::resolve(use_mi, index::API_KEY_VAR, &env)?;
                Arc::new(SearchServiceIndex::new(&config.search, credential)?)
            }
            _ => Arc::new(LocalIndex::new(pool)),
        };

        Ok(Self::new(
            extractor,
            index,
            config.chunking.clone(),
            config.upload.max_document_size,
        ))
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Validate, extract, and chunk one upload.
    ///
    /// A document with no extractable text yields an empty chunk list.
    pub async fn crack_document(&self, form: UploadForm) -> Result<Vec<String>, IngestError> {
        // IndexCheck
        self.index.ensure_ready().await.inspect_err(|e| {
            warn!(stage = "index_check", error = %e, "ingestion stopped");
        })?;

        // Load
        let file = validate_upload(form, self.max_upload_size).inspect_err(|e| {
            warn!(stage = "upload", error = %e, "ingestion stopped");
        })?;
        info!(
            extractor = self.extractor.name(),
            content_type = %file.content_type,
            bytes = file.size,
            "extracting document"
        );
        let paragraphs = self
            .extractor
            .extract_paragraphs(&file)
            .await
            .inspect_err(|e| {
                warn!(stage = "extract", error = %e, "ingestion stopped");
            })?;

        if paragraphs.is_empty() {
            info!("document has no extractable text");
            return Ok(Vec::new());
        }

        // Chunk
        let text = paragraphs.join("\n");
        let chunks = chunk_text(&text, &self.chunking);
        info!(
            paragraphs = paragraphs.len(),
            chunks = chunks.len(),
            "document cracked"
        );
        Ok(chunks)
    }

    /// [`crack_document`](Self::crack_document) in the tagged result shape.
    pub async fn crack(&self, form: UploadForm) -> ActionResponse<CrackedDocument> {
        self.crack_document(form)
            .await
            .map(|chunks| CrackedDocument { chunks })
            .into()
    }

    /// Crack an upload, record it on `thread_id`, and store its chunks.
    ///
    /// The record is named after the uploaded file. Nothing is recorded if
    /// cracking or storing the chunks fails.
    pub async fn upload_document(
        &self,
        store: &dyn DocumentStore,
        thread_id: &str,
        user_email: &str,
        form: UploadForm,
    ) -> Result<UploadedDocument, IngestError> {
        let name = form
            .file
            .as_ref()
            .and_then(|f| f.file_name.clone())
            .unwrap_or_else(|| UNTITLED_DOCUMENT.to_string());

        let chunks = self.crack_document(form).await?;
        let document = store
            .create_with_chunks(thread_id, &hash_user_id(user_email), &name, &chunks)
            .await?;

        Ok(UploadedDocument { document, chunks })
    }
}
