use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub library: LibraryConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    pub oracle: Option<OracleConfig>,
    pub embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Library location and storage
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Root directory of the document library. Paths stored in the database are
    /// relative to this directory.
    pub root: PathBuf,
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Days a soft-deleted document is kept before it is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Paragraph size limits and segmentation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Hard paragraph ceiling, in characters.
    #[serde(default = "default_max_paragraph_chars")]
    pub max_paragraph_chars: usize,
    /// Preferred paragraph size used to derive the number of breaks requested.
    #[serde(default = "default_target_chunk_chars")]
    pub target_chunk_chars: usize,
    /// Blocks shorter than this (in characters) are dropped by the block parser.
    #[serde(default = "default_min_block_chars")]
    pub min_block_chars: usize,
    #[serde(default = "default_snap_window_chars")]
    pub snap_window_chars: usize,
    /// Accepted drift between input and segmented output, as a fraction (0.001 = 0.1%).
    #[serde(default = "default_integrity_tolerance")]
    pub integrity_tolerance: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Language codes whose documents are segmented instead of rejected when oversized.
    #[serde(default = "default_ai_languages")]
    pub ai_languages: Vec<String>,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_paragraph_chars: default_max_paragraph_chars(),
            target_chunk_chars: default_target_chunk_chars(),
            min_block_chars: default_min_block_chars(),
            snap_window_chars: default_snap_window_chars(),
            integrity_tolerance: default_integrity_tolerance(),
            max_depth: default_max_depth(),
            ai_languages: default_ai_languages(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

impl SegmentationConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn requires_ai_segmentation(&self, language: &str) -> bool {
        let language = language.trim().to_lowercase();
        self.ai_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&language))
    }
}

/// Supported chat/embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

/// LLM used as segmentation and marker oracle
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Ask the oracle for sentence markers on newly inserted paragraphs.
    #[serde(default = "default_add_markers")]
    pub add_markers: bool,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Persistence batching
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_statement_batch_size")]
    pub statement_batch_size: usize,
    #[serde(default = "default_marker_batch_size")]
    pub marker_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            statement_batch_size: default_statement_batch_size(),
            marker_batch_size: default_marker_batch_size(),
        }
    }
}

/// File watcher windows
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_add_window_ms")]
    pub add_window_ms: u64,
    #[serde(default = "default_delete_window_secs")]
    pub delete_window_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            add_window_ms: default_add_window_ms(),
            delete_window_secs: default_delete_window_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_paragraph_chars() -> usize {
    1500
}

fn default_target_chunk_chars() -> usize {
    750
}

fn default_min_block_chars() -> usize {
    3
}

fn default_snap_window_chars() -> usize {
    40
}

fn default_integrity_tolerance() -> f64 {
    0.001
}

fn default_max_depth() -> usize {
    4
}

fn default_ai_languages() -> Vec<String> {
    vec!["ar".to_string(), "fa".to_string()]
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_add_markers() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_statement_batch_size() -> usize {
    100
}

fn default_marker_batch_size() -> usize {
    10
}

fn default_add_window_ms() -> u64 {
    2000
}

fn default_delete_window_secs() -> u64 {
    60
}

fn default_reconcile_interval_secs() -> u64 {
    600
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in SIFTER_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("SIFTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Load and validate a configuration file at an explicit path
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.library.root.is_dir() {
            anyhow::bail!(
                "library.root must be an existing directory: {}",
                self.library.root.display()
            );
        }

        let seg = &self.segmentation;
        if seg.max_paragraph_chars == 0 {
            anyhow::bail!("segmentation.max_paragraph_chars must be greater than 0");
        }
        if seg.target_chunk_chars == 0 || seg.target_chunk_chars > seg.max_paragraph_chars {
            anyhow::bail!(
                "segmentation.target_chunk_chars must be between 1 and max_paragraph_chars"
            );
        }
        if !(0.0..1.0).contains(&seg.integrity_tolerance) {
            anyhow::bail!("segmentation.integrity_tolerance must be in [0, 1)");
        }

        if self.ingest.statement_batch_size == 0 {
            anyhow::bail!("ingest.statement_batch_size must be greater than 0");
        }

        if let Some(embeddings) = &self.embeddings {
            if embeddings.batch_size == 0 {
                anyhow::bail!("embeddings.batch_size must be greater than 0");
            }
        }

        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.library.db_path
    }

    pub fn library_root(&self) -> &Path {
        &self.library.root
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.library.retention_days))
    }
}

/// Resolve an API key from the environment variable named in config.
pub fn api_key_from_env(var: Option<&str>) -> Result<Option<String>> {
    match var {
        None => Ok(None),
        Some(name) => std::env::var(name)
            .map(Some)
            .with_context(|| format!("Environment variable {} not set", name)),
    }
}
