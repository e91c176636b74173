//! In-memory vector store with optional JSON persistence

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{DenseHit, ScoreKind, VectorStore};
use crate::error::StoreError;
use crate::types::SummaryRecord;

/// Brute-force cosine similarity store
pub struct MemoryVectorStore {
    records: RwLock<BTreeMap<String, SummaryRecord>>,
    /// Serializes writers; readers only take `records` for the final swap
    write_lock: Mutex<()>,
    persist_path: Option<PathBuf>,
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVectorStore {
    /// Volatile store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            persist_path: None,
        }
    }

    /// Store persisted to a JSON file, loading it if present
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let records = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let list: Vec<SummaryRecord> = serde_json::from_str(&data)?;
            list.into_iter()
                .map(|record| (record.repo_name.clone(), record))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
            persist_path: Some(path.to_path_buf()),
        })
    }

    /// Write `records` to disk off the runtime (temp file + rename, so
    /// readers never see a half-written file)
    async fn persist(&self, records: &BTreeMap<String, SummaryRecord>) -> Result<(), StoreError> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };
        let list: Vec<&SummaryRecord> = records.values().collect();
        let data = serde_json::to_vec(&list)?;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, data)?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Apply `change` to a copy and swap it in only once it is on disk
    async fn mutate<F, T>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, SummaryRecord>) -> T + Send,
        T: Send,
    {
        let _writer = self.write_lock.lock().await;
        let mut next = self.records.read().clone();
        let result = change(&mut next);
        self.persist(&next).await?;
        *self.records.write() = next;
        Ok(result)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        if record.embedding_vector.is_empty() {
            return Err(StoreError::Backend(format!(
                "record {} has no embedding",
                record.repo_name
            )));
        }
        self.mutate(|records| {
            records.insert(record.repo_name.clone(), record.clone());
        })
        .await
    }

    async fn delete(&self, repo_name: &str) -> Result<bool, StoreError> {
        if !self.records.read().contains_key(repo_name) {
            return Ok(false);
        }
        self.mutate(|records| records.remove(repo_name).is_some())
            .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|records| records.clear()).await
    }

    async fn get(&self, repo_name: &str) -> Result<Option<SummaryRecord>, StoreError> {
        Ok(self.records.read().get(repo_name).cloned())
    }

    async fn list(&self) -> Result<Vec<SummaryRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DenseHit>, StoreError> {
        let records = self.records.read();

        let mut scored: Vec<(f32, &SummaryRecord)> = records
            .values()
            .map(|r| (cosine_similarity(embedding, &r.embedding_vector), r))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.repo_name.cmp(&b.1.repo_name))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, r)| DenseHit {
                repo_name: r.repo_name.clone(),
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().len())
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, vector: Vec<f32>) -> SummaryRecord {
        SummaryRecord {
            repo_name: name.to_string(),
            url: format!("https://github.com/org/{name}"),
            summary_text: format!("{name} summary"),
            embedding_vector: vector,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = MemoryVectorStore::new();
        store.upsert(&record("east", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("north", vec![0.0, 1.0])).await.unwrap();
        store.upsert(&record("northeast", vec![0.7, 0.7])).await.unwrap();

        let hits = store.query(&[1.0, 0.1], 2).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.repo_name.as_str()).collect();
        assert_eq!(names, vec!["east", "northeast"]);
        assert_eq!(store.score_kind(), ScoreKind::Similarity);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_reports() {
        let store = MemoryVectorStore::new();
        store.upsert(&record("x", vec![1.0, 0.0])).await.unwrap();
        let mut replacement = record("x", vec![0.0, 1.0]);
        replacement.summary_text = "second".into();
        store.upsert(&replacement).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("x").await.unwrap().unwrap().summary_text, "second");
        assert!(store.delete("x").await.unwrap());
        assert!(!store.delete("x").await.unwrap());
        assert!(store.get("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_record_without_embedding() {
        let store = MemoryVectorStore::new();
        assert!(store.upsert(&record("x", vec![])).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("vectors.json");

        let store = MemoryVectorStore::open(&path).unwrap();
        store.upsert(&record("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("b", vec![0.0, 1.0])).await.unwrap();
        store.delete("a").await.unwrap();
        drop(store);

        let reopened = MemoryVectorStore::open(&path).unwrap();
        let names: Vec<String> = reopened
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.repo_name)
            .collect();
        assert_eq!(names, vec!["b"]);
        assert!(!path.with_extension("json.tmp").exists());

        reopened.clear().await.unwrap();
        assert_eq!(MemoryVectorStore::open(&path).unwrap().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let store = MemoryVectorStore::open(&path).unwrap();
        store.upsert(&record("a", vec![1.0, 0.0])).await.unwrap();

        // A directory in the temp file's place makes the next write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        assert!(store.upsert(&record("b", vec![0.0, 1.0])).await.is_err());
        assert!(store.delete("a").await.is_err());

        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("a").await.unwrap().is_some());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let store = std::sync::Arc::new(MemoryVectorStore::open(&path).unwrap());

        let writers: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .upsert(&record(&format!("repo-{i}"), vec![1.0, i as f32]))
                        .await
                })
            })
            .collect();
        for writer in futures::future::join_all(writers).await {
            writer.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 20);
        assert_eq!(MemoryVectorStore::open(&path).unwrap().count().await.unwrap(), 20);
    }
}
