//! Remote paragraph extraction via the Document Intelligence "read" model.
//!
//! The service runs analysis as a long-running operation:
//!
//! 1. `POST {endpoint}/formrecognizer/documentModels/{model}:analyze` with the
//!    raw bytes answers `202 Accepted` and an `Operation-Location` header.
//! 2. `GET` that location until `status` is `succeeded` or `failed`, waiting
//!    `Retry-After` seconds (or the configured interval) between polls.
//! 3. `analyzeResult.paragraphs[].content` is the paragraph list.
//!
//! There is no overall deadline; callers bound the wait by dropping the
//! future. Failures are not retried.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::credential::{Credential, COGNITIVE_SERVICES_SCOPE};
use crate::error::IngestError;
use crate::extract::TextExtractor;
use crate::models::UploadedFile;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
/// Environment variable holding the API key when managed identities are off.
pub const API_KEY_VAR: &str = "AZURE_DOCUMENT_INTELLIGENCE_KEY";

pub struct DocumentIntelligenceExtractor {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_version: String,
    poll_interval: Duration,
    credential: Credential,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    paragraphs: Option<Vec<Paragraph>>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl DocumentIntelligenceExtractor {
    pub fn new(config: &ExtractionConfig, credential: Credential) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("extraction.endpoint required for document-intelligence"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build Document Intelligence HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_version: config.api_version.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            credential,
        })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            self.endpoint, self.model, self.api_version
        )
    }

    async fn analyze(&self, file: &UploadedFile) -> Result<Vec<String>> {
        let request = self
            .http
            .post(self.analyze_url())
            .header(CONTENT_TYPE, file.content_type.as_str())
            .body(file.bytes.clone());
        let response = self
            .credential
            .authorize(request, KEY_HEADER, COGNITIVE_SERVICES_SCOPE)
            .await?
            .send()
            .await
            .context("analyze request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("analyze request returned {}: {}", status, body);
        }
        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("analyze response is missing the Operation-Location header"))?;
        let mut delay = retry_after(response.headers()).unwrap_or(self.poll_interval);

        debug!(operation = %operation_url, "document analysis started");

        loop {
            tokio::time::sleep(delay).await;

            let request = self.http.get(&operation_url);
            let response = self
                .credential
                .authorize(request, KEY_HEADER, COGNITIVE_SERVICES_SCOPE)
                .await?
                .send()
                .await
                .context("analyze status request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("analyze status request returned {}: {}", status, body);
            }
            delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
            let operation: AnalyzeOperation = response
                .json()
                .await
                .context("analyze status response was not valid JSON")?;

            if let Some(paragraphs) = paragraphs_from_operation(operation)? {
                info!(paragraphs = paragraphs.len(), "document analysis succeeded");
                return Ok(paragraphs);
            }
        }
    }
}

#[async_trait]
impl TextExtractor for DocumentIntelligenceExtractor {
    fn name(&self) -> &str {
        "document-intelligence"
    }

    async fn extract_paragraphs(&self, file: &UploadedFile) -> Result<Vec<String>, IngestError> {
        self.analyze(file)
            .await
            .map_err(|e| IngestError::Extraction(format!("Document extraction failed: {:#}", e)))
    }
}

/// `Some(paragraphs)` once finished, `None` while still running.
fn paragraphs_from_operation(operation: AnalyzeOperation) -> Result<Option<Vec<String>>> {
    match operation.status.as_str() {
        "succeeded" => Ok(Some(
            operation
                .analyze_result
                .and_then(|r| r.paragraphs)
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.content)
                .collect(),
        )),
        "failed" | "canceled" => {
            let detail = operation
                .error
                .map(|e| match e.code {
                    Some(code) => format!("{}: {}", code, e.message),
                    None => e.message,
                })
                .unwrap_or_else(|| "no error detail".to_string());
            bail!("analysis {}: {}", operation.status, detail)
        }
        _ => Ok(None),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn operation(json: &str) -> AnalyzeOperation {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn running_operation_is_not_finished() {
        let op = operation(r#"{"status": "running"}"#);
        assert!(paragraphs_from_operation(op).unwrap().is_none());
    }

    #[test]
    fn succeeded_operation_yields_paragraphs_in_order() {
        let op = operation(
            r#"{"status": "succeeded", "analyzeResult": {"paragraphs": [{"content": "b"}, {"content": "a"}]}}"#,
        );
        assert_eq!(
            paragraphs_from_operation(op).unwrap(),
            Some(vec!["b".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn succeeded_without_paragraphs_is_empty() {
        let op = operation(r#"{"status": "succeeded", "analyzeResult": {}}"#);
        assert_eq!(paragraphs_from_operation(op).unwrap(), Some(vec![]));
    }

    #[test]
    fn failed_operation_carries_service_message() {
        let op = operation(
            r#"{"status": "failed", "error": {"code": "InvalidContent", "message": "corrupt"}}"#,
        );
        let err = paragraphs_from_operation(op).unwrap_err();
        assert_eq!(err.to_string(), "analysis failed: InvalidContent: corrupt");
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }

    async fn spawn_mock_service(polls_before_done: usize) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let polls = Arc::new(AtomicUsize::new(0));
        let location = format!("{}/operations/1", base);

        let app = Router::new()
            .route(
                "/formrecognizer/documentModels/prebuilt-read:analyze",
                post(move |headers: axum::http::HeaderMap| {
                    let location = location.clone();
                    async move {
                        if headers.get(KEY_HEADER).map(|v| v != "key").unwrap_or(true) {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        (StatusCode::ACCEPTED, [("operation-location", location)]).into_response()
                    }
                }),
            )
            .route(
                "/operations/1",
                get(move || {
                    let polls = polls.clone();
                    async move {
                        let n = polls.fetch_add(1, Ordering::SeqCst);
                        if n < polls_before_done {
                            axum::Json(serde_json::json!({"status": "running"}))
                        } else {
                            axum::Json(serde_json::json!({
                                "status": "succeeded",
                                "analyzeResult": {"paragraphs": [
                                    {"content": "Title"},
                                    {"content": "Body text."}
                                ]}
                            }))
                        }
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        base
    }

    fn extractor_for(endpoint: &str, key: &str) -> DocumentIntelligenceExtractor {
        let config = ExtractionConfig {
            provider: "document-intelligence".to_string(),
            endpoint: Some(format!("{}/", endpoint)),
            poll_interval_ms: 1,
            ..ExtractionConfig::default()
        };
        DocumentIntelligenceExtractor::new(&config, Credential::ApiKey(key.to_string())).unwrap()
    }

    #[tokio::test]
    async fn polls_until_succeeded() {
        let base = spawn_mock_service(2).await;
        let extractor = extractor_for(&base, "key");
        let file = UploadedFile::new(b"%PDF-".to_vec(), "application/pdf");
        let paragraphs = extractor.extract_paragraphs(&file).await.unwrap();
        assert_eq!(paragraphs, vec!["Title", "Body text."]);
    }

    #[tokio::test]
    async fn rejected_request_is_an_extraction_error() {
        let base = spawn_mock_service(0).await;
        let extractor = extractor_for(&base, "wrong");
        let file = UploadedFile::new(b"%PDF-".to_vec(), "application/pdf");
        let err = extractor.extract_paragraphs(&file).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
        assert!(err.to_string().contains("401"));
    }
}
