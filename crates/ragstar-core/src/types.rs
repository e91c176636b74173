//! Common types for the build pipeline and ranking

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SearchError, SearchResult};

/// A repository requested for indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Unique key of the repository in the corpus
    pub name: String,
    /// Repository URL handed to the content fetcher
    pub url: String,
}

impl RepositoryDescriptor {
    /// Build a descriptor, deriving the name from the URL when none is given
    /// (or the given one is blank).
    pub fn new(name: Option<&str>, url: &str) -> SearchResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SearchError::InvalidDescriptor("url is required".into()));
        }
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => derive_repo_name(url)?,
        };
        Ok(Self {
            name,
            url: url.to_string(),
        })
    }

    /// Build a descriptor whose name is derived from the URL
    pub fn from_url(url: &str) -> SearchResult<Self> {
        Self::new(None, url)
    }
}

/// Derive a repository name from its URL.
///
/// The name is the second non-empty path segment, i.e. the segment right
/// after the owner/organization, with a trailing `.git` removed:
/// `https://github.com/HKUDS/LightRAG.git` -> `LightRAG`. Extra segments,
/// query strings and fragments are ignored. Fewer than two segments is an
/// error.
pub fn derive_repo_name(raw: &str) -> SearchResult<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| SearchError::InvalidDescriptor(format!("{raw}: {e}")))?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let segment = segments.get(1).ok_or_else(|| {
        SearchError::InvalidDescriptor(format!(
            "{raw}: expected a path of the form /<owner>/<repository>"
        ))
    })?;

    let name = segment.strip_suffix(".git").unwrap_or(segment);
    if name.is_empty() {
        return Err(SearchError::InvalidDescriptor(format!(
            "{raw}: empty repository segment"
        )));
    }
    Ok(name.to_string())
}

/// The persisted summary of one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Primary key
    pub repo_name: String,
    pub url: String,
    pub summary_text: String,
    /// Dense embedding of `summary_text`
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding_vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl SummaryRecord {
    pub fn summary_length(&self) -> usize {
        self.summary_text.chars().count()
    }
}

/// Pipeline stage at which a repository failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Summarize,
    Embed,
    Persist,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Summarize => "summarize",
            FailureStage::Embed => "embed",
            FailureStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Result of one repository's fetch -> summarize -> embed -> persist run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PipelineOutcome {
    Success {
        record: SummaryRecord,
    },
    Failed {
        repo_name: String,
        stage: FailureStage,
        /// Short cause class, e.g. "timeout" or "transport"
        cause: String,
        message: String,
    },
    /// The job was cancelled before this repository started
    Cancelled {
        repo_name: String,
    },
}

impl PipelineOutcome {
    pub fn repo_name(&self) -> &str {
        match self {
            PipelineOutcome::Success { record } => &record.repo_name,
            PipelineOutcome::Failed { repo_name, .. } => repo_name,
            PipelineOutcome::Cancelled { repo_name } => repo_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success { .. })
    }

    pub fn failed_stage(&self) -> Option<FailureStage> {
        match self {
            PipelineOutcome::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Progress event of a streaming build
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildEvent {
    Start {
        total: usize,
    },
    Progress {
        /// Position of the descriptor in the request
        index: usize,
        repo_name: String,
        outcome: PipelineOutcome,
    },
    Complete {
        succeeded: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Running outcome counts of a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildTally {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BuildTally {
    pub fn record(&mut self, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Success { .. } => self.succeeded += 1,
            PipelineOutcome::Failed { .. } => self.failed += 1,
            PipelineOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }

    pub fn complete_event(&self) -> BuildEvent {
        BuildEvent::Complete {
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
        }
    }
}

/// Result of a batch build
#[derive(Debug, Clone, Serialize)]
pub struct BuildJob {
    pub requested: Vec<RepositoryDescriptor>,
    /// One outcome per requested descriptor, in request order
    pub outcomes: Vec<PipelineOutcome>,
    pub tally: BuildTally,
    pub elapsed_ms: u64,
}

impl BuildJob {
    /// Outcomes keyed by repository name. A name requested more than once
    /// maps to its last outcome.
    pub fn results(&self) -> HashMap<&str, &PipelineOutcome> {
        self.outcomes
            .iter()
            .map(|outcome| (outcome.repo_name(), outcome))
            .collect()
    }

    pub fn outcome(&self, repo_name: &str) -> Option<&PipelineOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|outcome| outcome.repo_name() == repo_name)
    }
}

/// How a ranked result was matched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Keyword,
    #[serde(rename = "vector+keyword")]
    Hybrid,
}

/// One ranked repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRepo {
    pub repo_name: String,
    /// Weighted blend of the normalized scores
    pub score: f64,
    /// Normalized lexical score (0-1)
    pub bm25_score: f64,
    /// Normalized dense score (0-1)
    pub dense_score: f64,
    pub matched_by: MatchType,
}

/// Search options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchOptions {
    /// The search query
    pub query: String,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Weight of the lexical score
    pub bm25_weight: Option<f64>,
    /// Weight of the dense score
    pub dense_weight: Option<f64>,
}

/// A ranked repository hydrated with its stored record
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub repo_name: String,
    pub url: String,
    pub score: f64,
    pub bm25_score: f64,
    pub dense_score: f64,
    pub matched_by: MatchType,
    /// Leading part of the summary
    pub summary: String,
}

/// Search results response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub count: usize,
}

impl SearchResults {
    pub fn empty(query: String) -> Self {
        Self {
            query,
            results: vec![],
            count: 0,
        }
    }
}
