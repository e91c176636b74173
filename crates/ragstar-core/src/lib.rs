//! Ragstar core: find the repository that best matches an intent query.
//!
//! Repositories are fetched, summarized by a language model, embedded, and
//! stored as one [`SummaryRecord`] each. Queries are ranked by blending a
//! local BM25 score with the dense similarity reported by the vector store.
//!
//! - [`BuildOrchestrator`] runs the per-repository pipeline and streams
//!   ordered [`BuildEvent`]s.
//! - [`HybridRanker`] merges lexical and dense candidates.
//! - [`Ragstar`] wires both from a [`RagstarConfig`].


pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod lexical;
pub mod orchestrator;
pub mod ranker;
pub mod record_store;
pub mod summarizer;
pub mod types;
pub mod vector_store;

pub use config::{RagstarConfig, StoreBackend};
pub use embedding::{Embedder, EmbeddingClient};
pub use engine::{IndexStats, Ragstar};
pub use error::{EmbedError, FetchError, SearchError, SearchResult, StoreError, SummarizeError};
pub use fetch::{ContentFetcher, FetchLimits, GithubFetcher};
pub use lexical::{tokenize, Bm25Params, LexicalIndex};
pub use orchestrator::{BuildOrchestrator, BuildSettings};
pub use ranker::{HybridRanker, RankOptions};
pub use record_store::SummaryRecordStore;
pub use summarizer::{OllamaSummarizer, Summarizer};
pub use types::{
    derive_repo_name, BuildEvent, BuildJob, BuildTally, FailureStage, MatchType, PipelineOutcome,
    RankedRepo, RepositoryDescriptor, SearchHit, SearchOptions, SearchResults, SummaryRecord,
};
pub use vector_store::{open_store, DenseHit, MemoryVectorStore, ScoreKind, VectorStore};

#[cfg(feature = "lancedb")]
pub use vector_store::LanceDbStore;

pub use tokio_util::sync::CancellationToken;
