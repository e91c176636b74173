//! Error types for the build pipeline and ranking

use thiserror::Error;

/// Content fetch stage failure
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),
    #[error("unsupported repository host: {0}")]
    UnsupportedHost(String),
    #[error("repository has no README or root documentation")]
    Empty,
    #[error("fetch returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("fetch transport error: {0}")]
    Transport(String),
    #[error("fetch timed out")]
    Timeout,
}

impl FetchError {
    pub fn cause(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) | FetchError::UnsupportedHost(_) => "input",
            FetchError::Empty => "empty",
            FetchError::Status { .. } => "status",
            FetchError::Transport(_) => "transport",
            FetchError::Timeout => "timeout",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Summarization stage failure
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarizer timed out")]
    Timeout,
    #[error("summarizer transport error: {0}")]
    Transport(String),
    #[error("summarizer model error: {0}")]
    Model(String),
}

impl SummarizeError {
    pub fn cause(&self) -> &'static str {
        match self {
            SummarizeError::Timeout => "timeout",
            SummarizeError::Transport(_) => "transport",
            SummarizeError::Model(_) => "model",
        }
    }
}

impl From<reqwest::Error> for SummarizeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SummarizeError::Timeout
        } else {
            SummarizeError::Transport(e.to_string())
        }
    }
}

/// Embedding stage failure
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding transport error: {0}")]
    Transport(String),
    #[error("embedding API error: {0}")]
    Api(String),
    #[error("embedding API returned no vector")]
    Empty,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedError {
    pub fn cause(&self) -> &'static str {
        match self {
            EmbedError::Timeout => "timeout",
            EmbedError::Transport(_) => "transport",
            EmbedError::Api(_) => "api",
            EmbedError::Empty => "empty",
            EmbedError::DimensionMismatch { .. } => "dimension",
        }
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbedError::Timeout
        } else {
            EmbedError::Transport(e.to_string())
        }
    }
}

/// Vector store / record store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store error: {0}")]
    Backend(String),
    #[cfg(feature = "lancedb")]
    #[error("lancedb error: {0}")]
    Lance(#[from] lancedb::Error),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persist task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn cause(&self) -> &'static str {
        match self {
            StoreError::Backend(_) => "backend",
            #[cfg(feature = "lancedb")]
            StoreError::Lance(_) => "backend",
            StoreError::Io(_) => "io",
            StoreError::Json(_) => "serialization",
            StoreError::Task(_) => "task",
        }
    }
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Summarize(#[from] SummarizeError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid repository descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SearchResult<T> = Result<T, SearchError>;
