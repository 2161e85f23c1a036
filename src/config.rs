use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where progress and final-status reports go. Reports are best-effort:
/// an unreachable sink never fails a task.
#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    /// Base URL of the status endpoint; reports POST to
    /// `{base_url}/worker/status`. Empty disables reporting.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_status_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_status_timeout_secs(),
        }
    }
}

fn default_status_timeout_secs() -> u64 {
    10
}

/// Layout parser service settings (nlm-ingestor-style HTTP API).
#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    /// Base URL of the layout parsing service. Empty means only the
    /// flat-reader path is available.
    #[serde(default)]
    pub ingestor_url: String,
    #[serde(default = "default_parser_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            ingestor_url: String::new(),
            timeout_secs: default_parser_timeout_secs(),
        }
    }
}

fn default_parser_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Per-level target sizes in characters, largest first. Each level of
    /// the hierarchical split uses the size at its index.
    #[serde(default = "default_chunk_sizes")]
    pub chunk_sizes: Vec<usize>,
    /// Overlap in characters shared by all levels.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_sizes: default_chunk_sizes(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_sizes() -> Vec<usize> {
    vec![4096, 2048, 1024]
}

fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results kept after reranking. Context preparation for Q&A always
    /// over-fetches `top_k * 2` candidates from the index.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Character budget for assembled Q&A context.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_length: default_max_context_length(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

fn default_max_context_length() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.1
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_sizes.is_empty() {
        anyhow::bail!("chunking.chunk_sizes must not be empty");
    }
    if config.chunking.chunk_sizes.iter().any(|&s| s == 0) {
        anyhow::bail!("chunking.chunk_sizes entries must be > 0");
    }
    let smallest = *config.chunking.chunk_sizes.iter().min().unwrap();
    if config.chunking.chunk_overlap >= smallest {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than the smallest chunk size ({})",
            config.chunking.chunk_overlap,
            smallest
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_length == 0 {
        anyhow::bail!("retrieval.max_context_length must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(chunking: &str) -> String {
        format!(
            r#"
[db]
path = "/tmp/strata.sqlite"

{chunking}
"#
        )
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config: Config = toml::from_str(&base_config("")).unwrap();
        assert_eq!(config.chunking.chunk_sizes, vec![4096, 2048, 1024]);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.embedding.provider, "disabled");
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_empty_chunk_sizes() {
        let config: Config =
            toml::from_str(&base_config("[chunking]\nchunk_sizes = []")).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_smallest_size() {
        let config: Config = toml::from_str(&base_config(
            "[chunking]\nchunk_sizes = [512, 128]\nchunk_overlap = 128",
        ))
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let config: Config = toml::from_str(&base_config(
            "[embedding]\nprovider = \"openai\"",
        ))
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
