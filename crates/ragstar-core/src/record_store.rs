//! Summary record store
//!
//! Records live in the vector store's metadata; the lexical index is a
//! derived view over them. Every mutation goes through one async write lock
//! and touches the dense store first, so the lexical index only ever changes
//! after the dense write succeeded.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::lexical::LexicalIndex;
use crate::types::SummaryRecord;
use crate::vector_store::VectorStore;

pub struct SummaryRecordStore {
    dense: Arc<dyn VectorStore>,
    lexical: Arc<LexicalIndex>,
    write_lock: Mutex<()>,
}

impl SummaryRecordStore {
    pub fn new(dense: Arc<dyn VectorStore>, lexical: Arc<LexicalIndex>) -> Self {
        Self {
            dense,
            lexical,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dense(&self) -> &Arc<dyn VectorStore> {
        &self.dense
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    /// Replace the record for `record.repo_name` in both representations
    pub async fn upsert(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.dense.upsert(record).await?;
        self.lexical.upsert(&record.repo_name, &record.summary_text);
        log::debug!("[Store] Persisted {}", record.repo_name);
        Ok(())
    }

    pub async fn get(&self, repo_name: &str) -> Result<Option<SummaryRecord>, StoreError> {
        self.dense.get(repo_name).await
    }

    /// All records sorted by name
    pub async fn list(&self) -> Result<Vec<SummaryRecord>, StoreError> {
        let mut records = self.dense.list().await?;
        records.sort_by(|a, b| a.repo_name.cmp(&b.repo_name));
        Ok(records)
    }

    /// Remove one record. Returns whether it existed.
    pub async fn delete(&self, repo_name: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let existed = self.dense.delete(repo_name).await?;
        self.lexical.delete(repo_name);
        if existed {
            log::info!("[Store] Deleted {}", repo_name);
        }
        Ok(existed)
    }

    /// Remove every record
    pub async fn delete_all(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.dense.clear().await?;
        self.lexical.clear();
        log::warn!("[Store] Deleted all records");
        Ok(())
    }

    /// Rebuild the lexical index from the stored records
    pub async fn rebuild_lexical(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let records = self.dense.list().await?;
        self.lexical.rebuild(
            records
                .iter()
                .map(|r| (r.repo_name.as_str(), r.summary_text.as_str())),
        );
        Ok(records.len())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.dense.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::Bm25Params;
    use crate::vector_store::{DenseHit, MemoryVectorStore, ScoreKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(name: &str, summary: &str) -> SummaryRecord {
        SummaryRecord {
            repo_name: name.to_string(),
            url: format!("https://github.com/org/{name}"),
            summary_text: summary.to_string(),
            embedding_vector: vec![0.1, 0.2, 0.3],
            created_at: Utc::now(),
        }
    }

    /// Memory store whose writes can be switched off
    struct FlakyStore {
        inner: MemoryVectorStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError::Backend("store unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn upsert(&self, record: &SummaryRecord) -> Result<(), StoreError> {
            self.check()?;
            self.inner.upsert(record).await
        }
        async fn delete(&self, repo_name: &str) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.delete(repo_name).await
        }
        async fn clear(&self) -> Result<(), StoreError> {
            self.check()?;
            self.inner.clear().await
        }
        async fn get(&self, repo_name: &str) -> Result<Option<SummaryRecord>, StoreError> {
            self.inner.get(repo_name).await
        }
        async fn list(&self) -> Result<Vec<SummaryRecord>, StoreError> {
            self.inner.list().await
        }
        async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DenseHit>, StoreError> {
            self.inner.query(embedding, top_k).await
        }
        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }
        fn score_kind(&self) -> ScoreKind {
            ScoreKind::Similarity
        }
    }

    fn store() -> SummaryRecordStore {
        SummaryRecordStore::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(LexicalIndex::new(Bm25Params::default())),
        )
    }

    #[tokio::test]
    async fn test_upsert_updates_both_views() {
        let store = store();
        store.upsert(&record("b", "graph database")).await.unwrap();
        store.upsert(&record("a", "vector search")).await.unwrap();

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.repo_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(store.lexical().contains("a"));
        assert_eq!(store.lexical().query("vector", 5)[0].0, "a");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_prior_record() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryVectorStore::new(),
            fail_writes: AtomicBool::new(false),
        });
        let store = SummaryRecordStore::new(flaky.clone(), Arc::new(LexicalIndex::default()));
        store.upsert(&record("x", "vector search")).await.unwrap();

        flaky.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.upsert(&record("x", "graph traversal")).await.is_err());

        assert_eq!(store.get("x").await.unwrap().unwrap().summary_text, "vector search");
        assert_eq!(store.lexical().document_frequency("vector"), 1);
        assert_eq!(store.lexical().document_frequency("graph"), 0);

        assert!(store.delete_all().await.is_err());
        assert_eq!(store.lexical().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let store = store();
        store.upsert(&record("a", "vector search")).await.unwrap();
        store.upsert(&record("b", "vector store")).await.unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.lexical().contains("a"));

        store.delete_all().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.lexical().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_lexical_matches_incremental() {
        let dense: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        let incremental = SummaryRecordStore::new(dense.clone(), Arc::new(LexicalIndex::default()));
        incremental.upsert(&record("a", "vector search vector")).await.unwrap();
        incremental.upsert(&record("b", "graph store")).await.unwrap();
        incremental.upsert(&record("a", "hybrid search")).await.unwrap();

        let rebuilt = SummaryRecordStore::new(dense, Arc::new(LexicalIndex::default()));
        assert_eq!(rebuilt.rebuild_lexical().await.unwrap(), 2);
        assert_eq!(
            rebuilt.lexical().query("search vector graph", 5),
            incremental.lexical().query("search vector graph", 5)
        );
    }
}
