//! HTTP server for document ingestion and thread document records.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents/crack` | Multipart `file` → overlapping chunks |
//! | `POST` | `/threads/{thread_id}/documents` | Record a named document |
//! | `GET`  | `/threads/{thread_id}/documents` | Active documents of a thread |
//! | `DELETE` | `/threads/{thread_id}/documents/{id}` | Soft-delete a record |
//! | `POST` | `/threads/{thread_id}/uploads` | Crack, record, and store chunks |
//!
//! Calls that act for a user read the caller's email from the
//! `x-user-email` header; only its hash is stored.
//!
//! # Error Contract
//!
//! Every response body uses the tagged result shape:
//!
//! ```json
//! { "status": "ERROR", "errors": [{ "message": "No file was provided." }] }
//! ```
//!
//! Status codes: validation `400`, not found `404`, database `500`,
//! extraction `502`, index not ready `503`.
//!
//! # Upload size
//!
//! The request body limit is the upload ceiling plus 1 MiB, so the upload
//! gate rather than the transport rejects files that are slightly too large.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::cache::ListingCache;
use crate::config::Config;
use crate::db;
use crate::error::IngestError;
use crate::ingest::Pipeline;
use crate::models::{
    ActionResponse, ChatDocumentRecord, CrackedDocument, Payload, UploadForm, UploadedDocument,
    UploadedFile,
};
use crate::store::{hash_user_id, DocumentStore, SqliteDocumentStore};

/// Header carrying the caller's email address.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

const BODY_LIMIT_HEADROOM: usize = 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    store: Arc<dyn DocumentStore>,
    /// Thread listings; the store revalidates entries on every write.
    listings: Arc<ListingCache>,
}

impl AppState {
    /// `store` must revalidate `listings` on writes, or listings go stale.
    pub fn new(pipeline: Pipeline, store: Arc<dyn DocumentStore>, listings: Arc<ListingCache>) -> Self {
        Self {
            pipeline,
            store,
            listings,
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated. The database must have been
/// initialized with `chatdoc init`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let listings = Arc::new(ListingCache::new());
    let store = Arc::new(SqliteDocumentStore::new(pool.clone(), listings.clone()));
    let pipeline = Pipeline::from_config(config, pool)?;

    let app = router(AppState::new(pipeline, store, listings));

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "chatdoc server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router for `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.pipeline.max_upload_size())
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_HEADROOM);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents/crack", post(handle_crack))
        .route(
            "/threads/{thread_id}/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route(
            "/threads/{thread_id}/documents/{id}",
            delete(handle_delete_document),
        )
        .route("/threads/{thread_id}/uploads", post(handle_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// An error rendered as the tagged `ERROR` shape with a matching status.
struct AppError {
    status: StatusCode,
    message: String,
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Extraction(_) => StatusCode::BAD_GATEWAY,
            IngestError::IndexNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: ActionResponse<()> = ActionResponse::error(self.message);
        (self.status, Json(body)).into_response()
    }
}

type HandlerResult<T> = Result<Json<ActionResponse<T>>, AppError>;

fn ok<T>(payload: T) -> HandlerResult<T> {
    Ok(Json(ActionResponse::Ok(payload)))
}

fn user_email(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::Validation(format!("The {} header is required.", USER_EMAIL_HEADER))
                .into()
        })
}

/// Collect the `file` field of a multipart body into an [`UploadForm`].
///
/// Other fields are ignored. A body without a `file` field yields an empty
/// form, which the upload gate rejects.
async fn read_upload_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, AppError> {
    let mut multipart = multipart.map_err(|e| AppError {
        status: e.status(),
        message: e.body_text(),
    })?;

    let multipart_error = |e: axum::extract::multipart::MultipartError| AppError {
        status: e.status(),
        message: e.body_text(),
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let mut file = UploadedFile::new(bytes.to_vec(), content_type);
        if let Some(name) = file_name {
            file = file.with_file_name(name);
        }
        return Ok(UploadForm::with_file(file));
    }

    Ok(UploadForm::empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents/crack ============

async fn handle_crack(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult<CrackedDocument> {
    let form = read_upload_form(multipart).await?;
    let chunks = state.pipeline.crack_document(form).await?;
    ok(CrackedDocument { chunks })
}

// ============ /threads/{thread_id}/documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    name: String,
}

async fn handle_create_document(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    request: Result<Json<CreateDocumentRequest>, JsonRejection>,
) -> HandlerResult<Payload<ChatDocumentRecord>> {
    let email = user_email(&headers)?;
    let Json(request) = request.map_err(|e| AppError {
        status: e.status(),
        message: e.body_text(),
    })?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(IngestError::Validation("Document name must not be empty.".to_string()).into());
    }

    let record = state
        .store
        .create(&thread_id, &hash_user_id(&email), name)
        .await?;
    ok(Payload { response: record })
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> HandlerResult<Payload<Vec<ChatDocumentRecord>>> {
    if let Some(records) = state.listings.get(&thread_id) {
        return ok(Payload { response: records });
    }

    let generation = state.listings.generation();
    let records = state.store.list_by_thread(&thread_id).await?;
    state.listings.put(&thread_id, generation, records.clone());
    ok(Payload { response: records })
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path((thread_id, id)): Path<(String, String)>,
) -> HandlerResult<Payload<ChatDocumentRecord>> {
    let record = state.store.soft_delete(&thread_id, &id).await?;
    ok(Payload { response: record })
}

// ============ POST /threads/{thread_id}/uploads ============

async fn handle_upload(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult<Payload<UploadedDocument>> {
    let email = user_email(&headers)?;
    let form = read_upload_form(multipart).await?;
    let uploaded = state
        .pipeline
        .upload_document(state.store.as_ref(), &thread_id, &email, form)
        .await?;
    ok(Payload { response: uploaded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::extract::LocalExtractor;
    use crate::index::IndexReadiness;
    use crate::models::Chunk;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ReadyIndex;

    #[async_trait]
    impl IndexReadiness for ReadyIndex {
        async fn ensure_ready(&self) -> Result<(), IngestError> {
            Ok(())
        }
    }

    /// Lands one write between reading a listing and returning it.
    struct InterleavedStore {
        inner: InMemoryDocumentStore,
        interleaved: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for InterleavedStore {
        async fn create(
            &self,
            thread_id: &str,
            user_id: &str,
            name: &str,
        ) -> Result<ChatDocumentRecord, IngestError> {
            self.inner.create(thread_id, user_id, name).await
        }

        async fn create_with_chunks(
            &self,
            thread_id: &str,
            user_id: &str,
            name: &str,
            chunks: &[String],
        ) -> Result<ChatDocumentRecord, IngestError> {
            self.inner
                .create_with_chunks(thread_id, user_id, name, chunks)
                .await
        }

        async fn list_by_thread(
            &self,
            thread_id: &str,
        ) -> Result<Vec<ChatDocumentRecord>, IngestError> {
            let listed = self.inner.list_by_thread(thread_id).await;
            if !self.interleaved.swap(true, Ordering::SeqCst) {
                self.inner.create(thread_id, "u", "late.pdf").await?;
            }
            listed
        }

        async fn soft_delete(
            &self,
            thread_id: &str,
            id: &str,
        ) -> Result<ChatDocumentRecord, IngestError> {
            self.inner.soft_delete(thread_id, id).await
        }

        async fn replace_chunks(
            &self,
            document_id: &str,
            chunks: &[Chunk],
        ) -> Result<(), IngestError> {
            self.inner.replace_chunks(document_id, chunks).await
        }
    }

    async fn listed_names(state: &AppState, thread_id: &str) -> Vec<String> {
        match handle_list_documents(State(state.clone()), Path(thread_id.to_string())).await {
            Ok(Json(ActionResponse::Ok(payload))) => {
                payload.response.into_iter().map(|r| r.name).collect()
            }
            _ => panic!("listing {} failed", thread_id),
        }
    }

    #[tokio::test]
    async fn write_during_listing_is_not_hidden_by_the_cache() {
        let listings = Arc::new(ListingCache::new());
        let store = Arc::new(InterleavedStore {
            inner: InMemoryDocumentStore::with_revalidate(listings.clone()),
            interleaved: AtomicBool::new(false),
        });
        store.create("t1", "u", "first.pdf").await.unwrap();

        let pipeline = Pipeline::new(
            Arc::new(LocalExtractor::new()),
            Arc::new(ReadyIndex),
            ChunkingConfig::default(),
            1000,
        );
        let state = AppState::new(pipeline, store, listings.clone());

        // The create landed after the read, so this listing is already stale.
        assert_eq!(listed_names(&state, "t1").await, vec!["first.pdf"]);
        assert!(listings.get("t1").is_none());

        assert_eq!(
            listed_names(&state, "t1").await,
            vec!["first.pdf", "late.pdf"]
        );
        assert!(listings.get("t1").is_some());
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        let cases = [
            (IngestError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (IngestError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (IngestError::Database("d".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (IngestError::Extraction("e".into()), StatusCode::BAD_GATEWAY),
            (IngestError::IndexNotReady("i".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn missing_user_header_is_a_validation_error() {
        let err = user_email(&HeaderMap::new()).err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "The x-user-email header is required.");
    }
}
