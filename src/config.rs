//! TOML configuration with environment overrides.
//!
//! Every section has defaults, so an empty file is a valid local setup.
//! After parsing, a fixed set of environment variables may override file
//! values (see [`apply_env_overrides`]). Invariants that would make the pipeline
//! misbehave, such as an overlap that does not leave a positive stride, are
//! rejected here rather than per call.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default upload ceiling in bytes. Files must be strictly smaller.
pub const DEFAULT_MAX_UPLOAD_DOCUMENT_SIZE: u64 = 20_000_000;
/// Default chunk length, in chars.
pub const DEFAULT_CHUNK_SIZE: usize = 2300;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/chatdoc.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_document_size: DEFAULT_MAX_UPLOAD_DOCUMENT_SIZE,
        }
    }
}

fn default_max_document_size() -> u64 {
    DEFAULT_MAX_UPLOAD_DOCUMENT_SIZE
}

/// Overlap chunking parameters, measured in chars (Unicode scalar values).
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Defaults to 25% of `chunk_size`.
    #[serde(default)]
    pub overlap: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: None,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl ChunkingConfig {
    pub fn overlap(&self) -> usize {
        self.overlap.unwrap_or(self.chunk_size / 4)
    }

    /// Advance between successive chunk starts. Positive once validated.
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `local` or `document-intelligence`.
    #[serde(default = "default_local")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_extraction_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout. There is no overall extraction deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_local(),
            endpoint: None,
            model: default_model(),
            api_version: default_extraction_api_version(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_local() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "prebuilt-read".to_string()
}
fn default_extraction_api_version() -> String {
    "2023-07-31".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `local` or `azure`.
    #[serde(default = "default_local")]
    pub provider: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_local(),
            service_name: None,
            index_name: None,
            endpoint_suffix: default_endpoint_suffix(),
            api_version: default_search_api_version(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_endpoint_suffix() -> String {
    "search.windows.net".to_string()
}
fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}
fn default_search_timeout_secs() -> u64 {
    10
}

impl SearchConfig {
    /// `https://{service}.{suffix}`, when a service name is configured.
    pub fn endpoint(&self) -> Option<String> {
        self.service_name
            .as_ref()
            .map(|name| format!("https://{}.{}", name, self.endpoint_suffix))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Use a token provider instead of API keys for cloud services.
    #[serde(default)]
    pub use_managed_identities: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Read, parse, apply environment overrides, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Like [`load_config`], but a missing file means "defaults plus environment".
pub fn load_config_or_env(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        parse_config("", |key| std::env::var(key).ok())
    }
}

/// Parse config text, then apply overrides from `env` and validate.
pub fn parse_config<F>(content: &str, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Apply environment variables on top of file values.
///
/// | Variable | Field |
/// |----------|-------|
/// | `MAX_UPLOAD_DOCUMENT_SIZE` | `upload.max_document_size` |
/// | `USE_MANAGED_IDENTITIES` | `auth.use_managed_identities` (`"true"` only) |
/// | `AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT` | `extraction.endpoint` |
/// | `AZURE_SEARCH_NAME` | `search.service_name` |
/// | `AZURE_SEARCH_INDEX_NAME` | `search.index_name` |
/// | `AZURE_SEARCH_ENDPOINT_SUFFIX` | `search.endpoint_suffix` |
pub fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = env("MAX_UPLOAD_DOCUMENT_SIZE") {
        config.upload.max_document_size = raw.trim().parse().with_context(|| {
            format!("MAX_UPLOAD_DOCUMENT_SIZE must be a byte count, got '{}'", raw)
        })?;
    }
    if let Some(raw) = env("USE_MANAGED_IDENTITIES") {
        config.auth.use_managed_identities = raw.trim() == "true";
    }
    if let Some(endpoint) = env("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT") {
        config.extraction.endpoint = Some(endpoint);
    }
    if let Some(name) = env("AZURE_SEARCH_NAME") {
        config.search.service_name = Some(name);
    }
    if let Some(index) = env("AZURE_SEARCH_INDEX_NAME") {
        config.search.index_name = Some(index);
    }
    if let Some(suffix) = env("AZURE_SEARCH_ENDPOINT_SUFFIX") {
        config.search.endpoint_suffix = suffix;
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_document_size == 0 {
            bail!("upload.max_document_size must be > 0");
        }

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap() >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap(),
                self.chunking.chunk_size
            );
        }

        if self.extraction.poll_interval_ms == 0 {
            bail!("extraction.poll_interval_ms must be > 0");
        }

        match self.extraction.provider.as_str() {
            "local" => {}
            "document-intelligence" => {
                if self.extraction.endpoint.is_none() {
                    bail!("extraction.endpoint must be set when provider is 'document-intelligence'");
                }
            }
            other => bail!(
                "Unknown extraction provider: '{}'. Must be local or document-intelligence.",
                other
            ),
        }

        match self.search.provider.as_str() {
            "local" => {}
            "azure" => {
                if self.search.service_name.is_none() || self.search.index_name.is_none() {
                    bail!("search.service_name and search.index_name must be set when provider is 'azure'");
                }
            }
            other => bail!(
                "Unknown search provider: '{}'. Must be local or azure.",
                other
            ),
        }

        Ok(())
    }
}
