//! Search index readiness checks.
//!
//! Ingestion refuses to start until the index that will receive the chunks
//! exists. [`LocalIndex`] checks the SQLite chunk table created by
//! `chatdoc init`; [`SearchServiceIndex`] asks the remote search service
//! whether the configured index is defined. Creating a remote index is not
//! attempted: its schema is owned elsewhere.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

use crate::config::SearchConfig;
use crate::credential::{Credential, SEARCH_SCOPE};
use crate::error::IngestError;

/// Environment variable holding the search API key when managed identities are off.
pub const API_KEY_VAR: &str = "AZURE_SEARCH_API_KEY";

/// No-argument precondition consulted before every ingestion.
#[async_trait]
pub trait IndexReadiness: Send + Sync {
    async fn ensure_ready(&self) -> Result<(), IngestError>;
}

/// The SQLite `chunks` table used as the local index.
pub struct LocalIndex {
    pool: SqlitePool,
}

impl LocalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexReadiness for LocalIndex {
    async fn ensure_ready(&self) -> Result<(), IngestError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IngestError::IndexNotReady(format!("chunk index check failed: {}", e)))?;

        if exists {
            Ok(())
        } else {
            Err(IngestError::IndexNotReady(
                "chunk index is not initialized; run `chatdoc init`".to_string(),
            ))
        }
    }
}

/// A named index on the remote search service.
pub struct SearchServiceIndex {
    http: reqwest::Client,
    endpoint: String,
    index_name: String,
    api_version: String,
    credential: Credential,
}

impl SearchServiceIndex {
    pub fn new(config: &SearchConfig, credential: Credential) -> Result<Self> {
        let endpoint = config
            .endpoint()
            .ok_or_else(|| anyhow!("search.service_name required for the azure search provider"))?;
        let index_name = config
            .index_name
            .clone()
            .ok_or_else(|| anyhow!("search.index_name required for the azure search provider"))?;
        Self::with_endpoint(endpoint, index_name, config, credential)
    }

    /// Like [`new`](Self::new) with an explicit base URL.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
        config: &SearchConfig,
        credential: Credential,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            api_version: config.api_version.clone(),
            credential,
        })
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={}",
            self.endpoint, self.index_name, self.api_version
        )
    }
}

#[async_trait]
impl IndexReadiness for SearchServiceIndex {
    async fn ensure_ready(&self) -> Result<(), IngestError> {
        let not_ready = |msg: String| {
            warn!(index = %self.index_name, "{}", msg);
            IngestError::IndexNotReady(msg)
        };

        let request = self
            .credential
            .authorize(self.http.get(self.index_url()), "api-key", SEARCH_SCOPE)
            .await
            .map_err(|e| not_ready(format!("search credential unavailable: {:#}", e)))?;
        let response = request
            .send()
            .await
            .map_err(|e| not_ready(format!("search service unreachable: {}", e)))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(not_ready(format!(
                "search index '{}' does not exist",
                self.index_name
            ))),
            s => Err(not_ready(format!(
                "search index '{}' check returned {}",
                self.index_name, s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_search_service() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(
            "/indexes/{name}",
            get(|Path(name): Path<String>| async move {
                match name.as_str() {
                    "chat" => AxumStatus::OK,
                    "broken" => AxumStatus::INTERNAL_SERVER_ERROR,
                    _ => AxumStatus::NOT_FOUND,
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        base
    }

    fn index(base: &str, name: &str) -> SearchServiceIndex {
        SearchServiceIndex::with_endpoint(
            base,
            name,
            &SearchConfig::default(),
            Credential::ApiKey("k".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn existing_remote_index_is_ready() {
        let base = spawn_search_service().await;
        assert!(index(&base, "chat").ensure_ready().await.is_ok());
    }

    #[tokio::test]
    async fn missing_remote_index_is_not_ready() {
        let base = spawn_search_service().await;
        let err = index(&base, "other").ensure_ready().await.unwrap_err();
        assert_eq!(
            err,
            IngestError::IndexNotReady("search index 'other' does not exist".to_string())
        );
    }

    #[tokio::test]
    async fn server_error_is_not_ready() {
        let base = spawn_search_service().await;
        let err = index(&base, "broken").ensure_ready().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn local_index_requires_migrations() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let local = LocalIndex::new(pool.clone());
        assert!(matches!(
            local.ensure_ready().await,
            Err(IngestError::IndexNotReady(_))
        ));

        crate::migrate::create_schema(&pool).await.unwrap();
        assert!(local.ensure_ready().await.is_ok());
    }
}
