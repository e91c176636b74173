//! Dense retrieval adapter
//!
//! The nearest-neighbor store is external; this module only fixes the
//! contract the core consumes and ships two backends for it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RagstarConfig, StoreBackend};
use crate::error::{SearchResult, StoreError};
use crate::types::SummaryRecord;

#[cfg(feature = "lancedb")]
mod lance;
mod memory;

#[cfg(feature = "lancedb")]
pub use lance::LanceDbStore;
pub use memory::MemoryVectorStore;

/// Orientation of the scores a store returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Larger is more similar
    Similarity,
    /// Smaller is more similar
    Distance,
}

/// One nearest-neighbor result
#[derive(Debug, Clone, PartialEq)]
pub struct DenseHit {
    pub repo_name: String,
    /// Raw store score, oriented per [`VectorStore::score_kind`]
    pub score: f32,
}

/// Nearest-neighbor store holding summary records as vector metadata.
///
/// `upsert` must replace the record for a name in a single write: a failed
/// call leaves the previous record intact.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record keyed by `record.repo_name`
    async fn upsert(&self, record: &SummaryRecord) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, repo_name: &str) -> Result<bool, StoreError>;

    /// Remove every record
    async fn clear(&self) -> Result<(), StoreError>;

    async fn get(&self, repo_name: &str) -> Result<Option<SummaryRecord>, StoreError>;

    /// All records, in no particular order
    async fn list(&self) -> Result<Vec<SummaryRecord>, StoreError>;

    /// Nearest records to `embedding`, best first
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DenseHit>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    fn score_kind(&self) -> ScoreKind;
}

/// Open the backend selected in `config`
pub async fn open_store(config: &RagstarConfig) -> SearchResult<Arc<dyn VectorStore>> {
    let path = config.store_path();
    match config.store.backend {
        #[cfg(feature = "lancedb")]
        StoreBackend::Lancedb => {
            let store = LanceDbStore::open(&path, config.store.table_name()).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "lancedb"))]
        StoreBackend::Lancedb => Err(crate::error::SearchError::Config(
            "store backend 'lancedb' requires the lancedb feature".to_string(),
        )),
        StoreBackend::Memory => {
            log::info!("[Store] Using memory store at {}", path.display());
            Ok(Arc::new(MemoryVectorStore::open(&path)?))
        }
    }
}
