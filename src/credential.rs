//! Credentials for cloud services.
//!
//! A [`Credential`] is resolved once at startup: either a static API key
//! read from the environment, or a [`TokenProvider`] that yields bearer
//! tokens on demand. Clients receive the resolved value by construction and
//! never re-read the environment per request.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// OAuth scope for Cognitive Services (Document Intelligence).
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
/// OAuth scope for the search service.
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";

/// Yields bearer tokens for a scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String>;
}

#[derive(Clone)]
pub enum Credential {
    ApiKey(String),
    TokenProvider(Arc<dyn TokenProvider>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey(***)"),
            Credential::TokenProvider(_) => f.write_str("Credential::TokenProvider"),
        }
    }
}

impl Credential {
    /// Resolve a credential for one service.
    ///
    /// With managed identities the environment token (`AZURE_ACCESS_TOKEN`)
    /// wins if present, otherwise the Azure CLI is asked for a token.
    /// Without them, `api_key_var` must be set.
    pub fn resolve<F>(use_managed_identities: bool, api_key_var: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if use_managed_identities {
            return Ok(match env(EnvTokenProvider::VAR) {
                Some(token) if !token.trim().is_empty() => {
                    Credential::TokenProvider(Arc::new(EnvTokenProvider::new(token)))
                }
                _ => Credential::TokenProvider(Arc::new(AzureCliTokenProvider)),
            });
        }
        match env(api_key_var) {
            Some(key) if !key.trim().is_empty() => Ok(Credential::ApiKey(key)),
            _ => bail!("{} is not set in the environment", api_key_var),
        }
    }

    /// Attach this credential to a request.
    ///
    /// API keys go in `key_header`; tokens become `Authorization: Bearer`.
    pub async fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        key_header: &str,
        scope: &str,
    ) -> Result<reqwest::RequestBuilder> {
        match self {
            Credential::ApiKey(key) => Ok(builder.header(key_header, key)),
            Credential::TokenProvider(provider) => {
                let token = provider.token(scope).await?;
                Ok(builder.bearer_auth(token))
            }
        }
    }
}

/// A token captured from the environment at startup.
pub struct EnvTokenProvider {
    token: String,
}

impl EnvTokenProvider {
    pub const VAR: &'static str = "AZURE_ACCESS_TOKEN";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn token(&self, _scope: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Fetches tokens with `az account get-access-token`.
pub struct AzureCliTokenProvider;

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self, scope: &str) -> Result<String> {
        let output = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--scope",
                scope,
                "--query",
                "accessToken",
                "--output",
                "tsv",
            ])
            .output()
            .await
            .context("Failed to run the Azure CLI (az)")?;
        if !output.status.success() {
            bail!(
                "Failed to obtain an access token: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            bail!("Failed to obtain an access token: empty response from az");
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_read_from_named_variable() {
        let cred = Credential::resolve(false, "AZURE_SEARCH_API_KEY", |key| {
            (key == "AZURE_SEARCH_API_KEY").then(|| "secret".to_string())
        })
        .unwrap();
        assert!(matches!(cred, Credential::ApiKey(ref k) if k == "secret"));
        assert_eq!(format!("{:?}", cred), "Credential::ApiKey(***)");
    }

    #[test]
    fn missing_api_key_is_a_startup_error() {
        let err = Credential::resolve(false, "AZURE_SEARCH_API_KEY", |_| None).unwrap_err();
        assert!(err.to_string().contains("AZURE_SEARCH_API_KEY"));
    }

    #[tokio::test]
    async fn managed_identity_prefers_environment_token() {
        let cred = Credential::resolve(true, "UNUSED", |key| {
            (key == EnvTokenProvider::VAR).then(|| "tok".to_string())
        })
        .unwrap();
        match cred {
            Credential::TokenProvider(provider) => {
                assert_eq!(provider.token(SEARCH_SCOPE).await.unwrap(), "tok");
            }
            other => panic!("expected token provider, got {:?}", other),
        }
    }

    #[test]
    fn managed_identity_without_token_falls_back_to_cli() {
        let cred = Credential::resolve(true, "UNUSED", |_| None).unwrap();
        assert!(matches!(cred, Credential::TokenProvider(_)));
    }

    #[tokio::test]
    async fn authorize_sets_key_header() {
        let client = reqwest::Client::new();
        let cred = Credential::ApiKey("k".to_string());
        let request = cred
            .authorize(client.get("http://localhost/"), "api-key", SEARCH_SCOPE)
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()["api-key"], "k");
    }

    #[tokio::test]
    async fn authorize_sets_bearer_token() {
        let client = reqwest::Client::new();
        let cred = Credential::TokenProvider(Arc::new(EnvTokenProvider::new("abc")));
        let request = cred
            .authorize(client.get("http://localhost/"), "api-key", SEARCH_SCOPE)
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }
}
