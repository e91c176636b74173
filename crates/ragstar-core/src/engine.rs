//! Engine facade wiring configuration to the build and search components

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{RagstarConfig, StoreBackend};
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::SearchResult;
use crate::fetch::{ContentFetcher, GithubFetcher};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::orchestrator::{BuildOrchestrator, BuildSettings};
use crate::ranker::{HybridRanker, RankOptions};
use crate::record_store::SummaryRecordStore;
use crate::summarizer::{OllamaSummarizer, Summarizer};
use crate::types::{
    BuildEvent, BuildJob, RankedRepo, RepositoryDescriptor, SearchOptions, SearchResults,
    SummaryRecord,
};
use crate::vector_store::{open_store, VectorStore};

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Records in the vector store
    pub records: usize,
    /// Documents in the lexical index
    pub lexical_documents: usize,
    pub vocabulary_size: usize,
    pub avg_doc_len: f64,
    pub backend: StoreBackend,
    pub store_path: PathBuf,
}

/// Ragstar engine: build orchestration and hybrid search over one store
pub struct Ragstar {
    config: Arc<RagstarConfig>,
    store: Arc<SummaryRecordStore>,
    orchestrator: BuildOrchestrator,
    ranker: HybridRanker,
}

impl Ragstar {
    /// Build the configured collaborators and open the configured store
    pub async fn open(config: RagstarConfig) -> SearchResult<Self> {
        let fetcher = Arc::new(GithubFetcher::new(config.fetch.clone())?);
        let summarizer = Arc::new(OllamaSummarizer::new(config.summarizer.clone())?);
        let embedder = Arc::new(EmbeddingClient::new(config.embedding.clone())?);
        let dense = open_store(&config).await?;

        Self::with_components(config, fetcher, summarizer, embedder, dense).await
    }

    /// Assemble an engine from explicit collaborators. The lexical index is
    /// rebuilt from the records already in `dense`.
    pub async fn with_components(
        config: RagstarConfig,
        fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        dense: Arc<dyn VectorStore>,
    ) -> SearchResult<Self> {
        config.validate()?;

        let lexical = Arc::new(LexicalIndex::new(Bm25Params {
            k1: config.ranking.k1,
            b: config.ranking.b,
        }));
        let store = Arc::new(SummaryRecordStore::new(dense, lexical));
        let restored = store.rebuild_lexical().await?;
        log::info!("[Store] Loaded {} summary records", restored);

        let orchestrator = BuildOrchestrator::new(
            fetcher,
            summarizer,
            Arc::clone(&embedder),
            Arc::clone(&store),
            BuildSettings::from_config(&config),
        );
        let ranker = HybridRanker::new(Arc::clone(&store), embedder, config.ranking.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            orchestrator,
            ranker,
        })
    }

    pub fn config(&self) -> &RagstarConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &BuildOrchestrator {
        &self.orchestrator
    }

    pub fn ranker(&self) -> &HybridRanker {
        &self.ranker
    }

    pub async fn build_all(&self, descriptors: Vec<RepositoryDescriptor>) -> BuildJob {
        self.orchestrator.build_all(descriptors).await
    }

    pub async fn build_all_with_progress<F>(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        cancel: CancellationToken,
        on_event: F,
    ) -> BuildJob
    where
        F: FnMut(&BuildEvent),
    {
        self.orchestrator
            .build_all_with_progress(descriptors, cancel, on_event)
            .await
    }

    pub fn stream_build(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, BuildEvent> {
        self.orchestrator.stream_build(descriptors, cancel)
    }

    pub async fn rank(&self, query: &str, options: RankOptions) -> SearchResult<Vec<RankedRepo>> {
        self.ranker.rank(query, options).await
    }

    pub async fn search(&self, options: SearchOptions) -> SearchResult<SearchResults> {
        self.ranker.search(options).await
    }

    pub fn default_rank_options(&self) -> RankOptions {
        self.ranker.default_options()
    }

    pub async fn get(&self, repo_name: &str) -> SearchResult<Option<SummaryRecord>> {
        Ok(self.store.get(repo_name).await?)
    }

    pub async fn list(&self) -> SearchResult<Vec<SummaryRecord>> {
        Ok(self.store.list().await?)
    }

    pub async fn delete(&self, repo_name: &str) -> SearchResult<bool> {
        Ok(self.store.delete(repo_name).await?)
    }

    /// Remove every record. Destructive: callers gate this themselves.
    pub async fn delete_all(&self) -> SearchResult<()> {
        Ok(self.store.delete_all().await?)
    }

    pub async fn rebuild_lexical_index(&self) -> SearchResult<usize> {
        Ok(self.store.rebuild_lexical().await?)
    }

    pub async fn stats(&self) -> SearchResult<IndexStats> {
        let lexical = self.store.lexical();
        Ok(IndexStats {
            records: self.store.count().await?,
            lexical_documents: lexical.len(),
            vocabulary_size: lexical.vocabulary_size(),
            avg_doc_len: lexical.avg_doc_len(),
            backend: self.config.store.backend,
            store_path: self.config.store_path(),
        })
    }
}
