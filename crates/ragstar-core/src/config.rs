//! Ragstar configuration
//!
//! Loaded once at process start. Priority: environment variables >
//! config.toml > defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};
use crate::types::RepositoryDescriptor;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagstarConfig {
    /// Summarization model (Ollama)
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Embedding API configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Repository content fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Index build behavior
    #[serde(default)]
    pub build: BuildConfig,

    /// Hybrid ranking behavior
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Vector store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Repositories indexed by `ragstar build` when none are given
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,

    /// Base directory for config and data, resolved at load time
    #[serde(skip)]
    pub root: PathBuf,
}

/// Summarization model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Ollama generate endpoint
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Ollama pull endpoint, derived from `ollama_url` when unset
    #[serde(default)]
    pub pull_url: Option<String>,

    #[serde(default = "default_ollama_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summarize_timeout")]
    pub timeout_secs: u64,

    /// Maximum prompt context length in characters
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            pull_url: None,
            model: default_ollama_model(),
            temperature: default_temperature(),
            timeout_secs: default_summarize_timeout(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

impl SummarizerConfig {
    pub fn pull_url(&self) -> String {
        match self.pull_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => derive_pull_url(&self.ollama_url),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Map `.../api/generate` to `.../api/pull`
pub fn derive_pull_url(generate_url: &str) -> String {
    let trimmed = generate_url.trim_end_matches('/');
    match trimmed.strip_suffix("/api/generate") {
        Some(base) => format!("{base}/api/pull"),
        None => format!("{trimmed}/api/pull"),
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_ollama_model() -> String {
    "mistral".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_summarize_timeout() -> u64 {
    180
}

fn default_max_prompt_chars() -> usize {
    120_000
}

/// Embedding API configuration (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key, only needed for hosted providers
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimensions (replaced by the dimension the API actually returns)
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_embed_timeout() -> u64 {
    60
}

/// Repository content fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// GitHub REST API base URL
    #[serde(default = "default_github_api")]
    pub api_base: String,

    /// Token for private repositories and higher rate limits
    #[serde(default)]
    pub github_token: Option<String>,

    /// Maximum number of files assembled into the content blob
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum size of the content blob in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Characters kept from each root documentation file
    #[serde(default = "default_max_file_preview_chars")]
    pub max_file_preview_chars: usize,

    /// Characters kept from the README
    #[serde(default = "default_max_readme_chars")]
    pub max_readme_chars: usize,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            github_token: None,
            max_files: default_max_files(),
            max_bytes: default_max_bytes(),
            max_file_preview_chars: default_max_file_preview_chars(),
            max_readme_chars: default_max_readme_chars(),
            timeout_secs: default_fetch_timeout(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_max_files() -> usize {
    30
}

fn default_max_bytes() -> usize {
    3 * 1024 * 1024
}

fn default_max_file_preview_chars() -> usize {
    2000
}

fn default_max_readme_chars() -> usize {
    8000
}

fn default_fetch_timeout() -> u64 {
    60
}

/// Index build behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Repositories processed concurrently within one job
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Hybrid ranking behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,

    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,

    /// BM25 term frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f64,

    /// BM25 length normalization
    #[serde(default = "default_b")]
    pub b: f64,

    /// Candidates fetched from each source per requested result
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Lower bound on candidates fetched from each source
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,

    /// Summary characters included in search hits
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Default result limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            bm25_weight: default_bm25_weight(),
            dense_weight: default_dense_weight(),
            k1: default_k1(),
            b: default_b(),
            candidate_multiplier: default_candidate_multiplier(),
            min_candidates: default_min_candidates(),
            preview_chars: default_preview_chars(),
            default_limit: default_limit(),
        }
    }
}

impl RankingConfig {
    /// Number of candidates to request from each source for `top_k` results
    pub fn candidate_k(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.candidate_multiplier.max(1))
            .max(self.min_candidates)
            .max(top_k)
    }
}

fn default_bm25_weight() -> f64 {
    0.6
}

fn default_dense_weight() -> f64 {
    0.4
}

fn default_k1() -> f64 {
    1.5
}

fn default_b() -> f64 {
    0.75
}

fn default_candidate_multiplier() -> usize {
    4
}

fn default_min_candidates() -> usize {
    20
}

fn default_preview_chars() -> usize {
    200
}

fn default_limit() -> usize {
    5
}

/// Vector store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Lancedb,
    Memory,
}

impl Default for StoreBackend {
    fn default() -> Self {
        if cfg!(feature = "lancedb") {
            StoreBackend::Lancedb
        } else {
            StoreBackend::Memory
        }
    }
}

impl FromStr for StoreBackend {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lancedb" | "lance" => Ok(StoreBackend::Lancedb),
            "memory" | "json" => Ok(StoreBackend::Memory),
            other => Err(SearchError::Config(format!("unknown store backend: {other}"))),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database directory (lancedb) or file (memory)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Table / collection name
    #[serde(default)]
    pub table: Option<String>,
}

impl StoreConfig {
    /// Get the store path, using a default under `root` if not specified
    pub fn get_path(&self, root: &Path) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        match self.backend {
            StoreBackend::Lancedb => root.join("lancedb"),
            StoreBackend::Memory => root.join("vectors.json"),
        }
    }

    pub fn table_name(&self) -> &str {
        self.table
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("repositories")
    }
}

/// A repository listed in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
}

impl RagstarConfig {
    /// Load configuration from the process environment and config file
    pub fn load() -> SearchResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration with an explicit environment lookup
    pub fn load_with<F>(env: F) -> SearchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = env("RAGSTAR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(default_root);
        let config_path = env("RAGSTAR_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("config.toml"));

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            log::debug!("[Config] No config file at {}", config_path.display());
            Self::default()
        };
        config.root = root;
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> SearchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SearchError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str::<RagstarConfig>(&content)
            .map_err(|e| SearchError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply environment overrides on top of file values
    pub fn apply_env<F>(&mut self, env: &F) -> SearchResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("RAGSTAR_DB_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(backend) = env("RAGSTAR_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(table) = env("RAGSTAR_COLLECTION") {
            self.store.table = Some(table);
        }
        if let Some(url) = env("RAGSTAR_OLLAMA_URL") {
            self.summarizer.ollama_url = url;
        }
        if let Some(url) = env("RAGSTAR_OLLAMA_PULL_URL") {
            self.summarizer.pull_url = Some(url);
        }
        if let Some(model) = env("RAGSTAR_OLLAMA_MODEL") {
            self.summarizer.model = model;
        }
        if let Some(secs) = parse_env(env, "RAGSTAR_OLLAMA_TIMEOUT")? {
            self.summarizer.timeout_secs = secs;
        }
        if let Some(chars) = parse_env(env, "RAGSTAR_MAX_PROMPT_CHARS")? {
            self.summarizer.max_prompt_chars = chars;
        }
        if let Some(files) = parse_env(env, "RAGSTAR_MAX_FILES")? {
            self.fetch.max_files = files;
        }
        if let Some(chars) = parse_env(env, "RAGSTAR_MAX_FILE_PREVIEW_CHARS")? {
            self.fetch.max_file_preview_chars = chars;
        }
        if let Some(token) = env("RAGSTAR_GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.fetch.github_token = Some(token);
        }
        if let Some(concurrency) = parse_env(env, "RAGSTAR_BUILD_CONCURRENCY")? {
            self.build.concurrency = concurrency;
        }
        if let Some(api_base) = env("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }
        if let Some(api_key) = env("EMBEDDING_API_KEY").filter(|k| !k.is_empty()) {
            self.embedding.api_key = Some(api_key);
        }
        if let Some(model) = env("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> SearchResult<()> {
        let ranking = &self.ranking;
        for (name, weight) in [
            ("bm25_weight", ranking.bm25_weight),
            ("dense_weight", ranking.dense_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::Config(format!(
                    "ranking.{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        if !ranking.k1.is_finite() || ranking.k1 < 0.0 {
            return Err(SearchError::Config("ranking.k1 must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&ranking.b) {
            return Err(SearchError::Config("ranking.b must be within [0, 1]".into()));
        }
        if self.build.concurrency == 0 {
            return Err(SearchError::Config("build.concurrency must be >= 1".into()));
        }
        if self.summarizer.max_prompt_chars == 0 {
            return Err(SearchError::Config(
                "summarizer.max_prompt_chars must be >= 1".into(),
            ));
        }
        if self.fetch.max_files == 0 {
            return Err(SearchError::Config("fetch.max_files must be >= 1".into()));
        }
        Ok(())
    }

    /// Repositories listed in the config file
    pub fn descriptors(&self) -> SearchResult<Vec<RepositoryDescriptor>> {
        self.repositories
            .iter()
            .map(|entry| RepositoryDescriptor::new(entry.name.as_deref(), &entry.url))
            .collect()
    }

    /// Copy without secrets, safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.fetch.github_token = None;
        config.embedding.api_key = None;
        config
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.get_path(&self.root)
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> SearchResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SearchError::Config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ragstar"))
        .unwrap_or_else(|| PathBuf::from(".ragstar"))
}
