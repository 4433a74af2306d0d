use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkerOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per vector store.
    pub base_dir: PathBuf,
    /// Directory holding one JSON record per job.
    pub jobs_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_block_size")]
    pub min_block_size: usize,
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
    #[serde(default = "default_fallback_chunk_size")]
    pub fallback_chunk_size: usize,
    #[serde(default = "default_fallback_overlap")]
    pub fallback_overlap: usize,
    #[serde(default = "default_marking_window")]
    pub marking_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            min_block_size: default_min_block_size(),
            max_block_size: default_max_block_size(),
            fallback_chunk_size: default_fallback_chunk_size(),
            fallback_overlap: default_fallback_overlap(),
            marking_window: default_marking_window(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_options(&self) -> ChunkerOptions {
        ChunkerOptions {
            min_block_size: self.min_block_size,
            max_block_size: self.max_block_size,
            fallback_chunk_size: self.fallback_chunk_size,
            fallback_overlap: self.fallback_overlap,
            marking_window: self.marking_window,
        }
    }
}

fn default_min_block_size() -> usize {
    20
}
fn default_max_block_size() -> usize {
    2000
}
fn default_fallback_chunk_size() -> usize {
    1000
}
fn default_fallback_overlap() -> usize {
    200
}
fn default_marking_window() -> usize {
    70
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_batch_retries")]
    pub batch_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            batch_retries: default_batch_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
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
fn default_batch_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Size of the worker pool running create/update operations. Bounded
    /// independently of request concurrency.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            workers: default_workers(),
            default_page_size: default_page_size(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_score_threshold() -> f32 {
    0.25
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.min_block_size == 0 {
        anyhow::bail!("chunking.min_block_size must be > 0");
    }
    if config.chunking.fallback_chunk_size == 0 {
        anyhow::bail!("chunking.fallback_chunk_size must be > 0");
    }
    if config.chunking.fallback_overlap >= config.chunking.fallback_chunk_size {
        anyhow::bail!("chunking.fallback_overlap must be smaller than fallback_chunk_size");
    }
    if config.chunking.max_block_size < config.chunking.min_block_size {
        anyhow::bail!("chunking.max_block_size must be >= min_block_size");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.provider == "openai" || config.embedding.provider == "ollama" {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate jobs
    if config.jobs.workers == 0 {
        anyhow::bail!("jobs.workers must be > 0");
    }

    // Validate query
    if !(0.0..=1.0).contains(&config.query.score_threshold) {
        anyhow::bail!("query.score_threshold must be in [0.0, 1.0]");
    }

    Ok(config)
}
