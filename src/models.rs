//! Core data models used throughout the ingestion backend.
//!
//! These types represent uploads, persisted document records, chunks, and
//! the tagged result shape returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::IngestError;

/// Type tag stored on every chat document record.
pub const CHAT_DOCUMENT_TYPE: &str = "CHAT_DOCUMENT";

/// A file received from a caller, before validation.
///
/// Consumed once by the upload gate and the extractor; never persisted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    /// Size as declared by the submission, in bytes.
    pub size: u64,
    /// Declared media type, e.g. `application/pdf`.
    pub content_type: String,
    pub file_name: Option<String>,
}

impl UploadedFile {
    /// Builds an upload whose declared size is the payload length.
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            size: bytes.len() as u64,
            bytes,
            content_type: content_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// A form-style submission carrying at most one `file` field.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
}

impl UploadForm {
    pub fn with_file(file: UploadedFile) -> Self {
        Self { file: Some(file) }
    }

    pub fn empty() -> Self {
        Self { file: None }
    }
}

/// Persistent record that a named document was attached to a chat thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDocumentRecord {
    pub id: String,
    pub chat_thread_id: String,
    /// Hashed user identifier, see [`hash_user_id`](crate::store::hash_user_id).
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub is_deleted: bool,
    pub name: String,
}

/// A chunk of extracted document text, ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A single user-visible error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Uniform tagged result returned across the pipeline boundary.
///
/// Serializes as `{"status": "OK", ...payload}` or
/// `{"status": "ERROR", "errors": [{"message": "..."}]}`. The payload type
/// must serialize as a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum ActionResponse<T> {
    #[serde(rename = "OK")]
    Ok(T),
    #[serde(rename = "ERROR")]
    Error { errors: Vec<ErrorMessage> },
}

impl<T> ActionResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ActionResponse::Ok(_))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ActionResponse::Error {
            errors: vec![ErrorMessage {
                message: message.into(),
            }],
        }
    }
}

impl<T> From<Result<T, IngestError>> for ActionResponse<T> {
    fn from(result: Result<T, IngestError>) -> Self {
        match result {
            Ok(payload) => ActionResponse::Ok(payload),
            Err(err) => ActionResponse::error(err.to_string()),
        }
    }
}

/// OK payload of an ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrackedDocument {
    pub chunks: Vec<String>,
}

/// OK payload wrapping a store result under `response`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload<T> {
    pub response: T,
}

/// OK payload of the combined upload flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedDocument {
    pub document: ChatDocumentRecord,
    pub chunks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_response_flattens_payload_next_to_status() {
        let resp: ActionResponse<CrackedDocument> = Ok::<_, IngestError>(CrackedDocument {
            chunks: vec!["a".to_string(), "b".to_string()],
        })
        .into();
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"status": "OK", "chunks": ["a", "b"]}));
    }

    #[test]
    fn error_response_carries_message_list_only() {
        let resp: ActionResponse<CrackedDocument> =
            Err::<CrackedDocument, _>(IngestError::Validation("No file was provided.".to_string()))
                .into();
        assert!(!resp.is_ok());
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"status": "ERROR", "errors": [{"message": "No file was provided."}]})
        );
        assert!(value.get("chunks").is_none());
    }

    #[test]
    fn record_serializes_with_camel_case_and_type_tag() {
        let record = ChatDocumentRecord {
            id: "d1".to_string(),
            chat_thread_id: "t1".to_string(),
            user_id: "u1".to_string(),
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
            doc_type: CHAT_DOCUMENT_TYPE.to_string(),
            is_deleted: false,
            name: "report.pdf".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["chatThreadId"], "t1");
        assert_eq!(value["type"], "CHAT_DOCUMENT");
        assert_eq!(value["isDeleted"], false);
    }

    #[test]
    fn uploaded_file_declares_payload_length() {
        let file = UploadedFile::new(vec![0u8; 42], "text/plain").with_file_name("a.txt");
        assert_eq!(file.size, 42);
        assert_eq!(file.file_name.as_deref(), Some("a.txt"));
    }
}
