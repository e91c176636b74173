//! LanceDB vector store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    types::Float32Type, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use parking_lot::Mutex;

use super::{DenseHit, ScoreKind, VectorStore};
use crate::error::StoreError;
use crate::types::SummaryRecord;

const KEY_COLUMN: &str = "repo_name";
const VECTOR_COLUMN: &str = "vector";

/// LanceDB table of summary records, one row per repository
pub struct LanceDbStore {
    db_path: PathBuf,
    table_name: String,
    db: Connection,
    /// Created lazily from the first record's vector dimension
    table: Mutex<Option<Table>>,
}

impl LanceDbStore {
    /// Connect to the database directory and open the table if it exists
    pub async fn open(db_path: &Path, table_name: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(db_path)?;

        let db = connect(db_path.to_string_lossy().as_ref()).execute().await?;

        let table_names = db.table_names().execute().await?;
        let table = if table_names.iter().any(|name| name == table_name) {
            Some(db.open_table(table_name).execute().await?)
        } else {
            None
        };

        log::info!(
            "[Store] Opened LanceDB at {} (table {}: {})",
            db_path.display(),
            table_name,
            if table.is_some() { "existing" } else { "new" }
        );

        Ok(Self {
            db_path: db_path.to_path_buf(),
            table_name: table_name.to_string(),
            db,
            table: Mutex::new(table),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn current_table(&self) -> Option<Table> {
        self.table.lock().clone()
    }

    fn create_schema(dimensions: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(KEY_COLUMN, DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("summary_text", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
            Field::new("summary_length", DataType::UInt32, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimensions as i32,
                ),
                false,
            ),
        ]))
    }

    fn record_to_batch(record: &SummaryRecord, schema: Arc<Schema>) -> Result<RecordBatch, StoreError> {
        let dimensions = record.embedding_vector.len();
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            std::iter::once(Some(
                record.embedding_vector.iter().copied().map(Some).collect::<Vec<_>>(),
            )),
            dimensions as i32,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![record.repo_name.as_str()])),
                Arc::new(StringArray::from(vec![record.url.as_str()])),
                Arc::new(StringArray::from(vec![record.summary_text.as_str()])),
                Arc::new(StringArray::from(vec![record.created_at.to_rfc3339()])),
                Arc::new(UInt32Array::from(vec![record.summary_length() as u32])),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn collect_records(&self, filter: Option<String>) -> Result<Vec<SummaryRecord>, StoreError> {
        let Some(table) = self.current_table() else {
            return Ok(vec![]);
        };

        // A plain scan stops at the default top-k, so size it to the table
        let rows = table.count_rows(filter.clone()).await?;
        if rows == 0 {
            return Ok(vec![]);
        }
        let query = match filter {
            Some(predicate) => table.query().only_if(predicate),
            None => table.query(),
        };
        let batches = query
            .limit(rows)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let mut records = Vec::new();
        for batch in &batches {
            records.extend(batch_to_records(batch)?);
        }
        Ok(records)
    }
}

fn key_predicate(repo_name: &str) -> String {
    format!("{} = '{}'", KEY_COLUMN, repo_name.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Backend(format!("Missing {name} column")))
}

fn batch_to_records(batch: &RecordBatch) -> Result<Vec<SummaryRecord>, StoreError> {
    let names = string_column(batch, KEY_COLUMN)?;
    let urls = string_column(batch, "url")?;
    let summaries = string_column(batch, "summary_text")?;
    let created = string_column(batch, "created_at")?;
    let vectors = batch
        .column_by_name(VECTOR_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let created_at = DateTime::parse_from_rfc3339(created.value(i))
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StoreError::Backend(format!("bad created_at: {e}")))?;

        let embedding_vector = vectors
            .map(|list| list.value(i))
            .and_then(|values| {
                values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|floats| floats.values().to_vec())
            })
            .unwrap_or_default();

        records.push(SummaryRecord {
            repo_name: names.value(i).to_string(),
            url: urls.value(i).to_string(),
            summary_text: summaries.value(i).to_string(),
            embedding_vector,
            created_at,
        });
    }
    Ok(records)
}

#[async_trait]
impl VectorStore for LanceDbStore {
    async fn upsert(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        if record.embedding_vector.is_empty() {
            return Err(StoreError::Backend(format!(
                "record {} has no embedding",
                record.repo_name
            )));
        }

        let schema = Self::create_schema(record.embedding_vector.len());
        let batch = Self::record_to_batch(record, schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.current_table() {
            Some(table) => {
                // Single merge keyed on the name: replace or insert atomically
                let mut merge = table.merge_insert(&[KEY_COLUMN]);
                merge.when_matched_update_all(None).when_not_matched_insert_all();
                merge.execute(Box::new(batches)).await?;
            }
            None => {
                let table = self
                    .db
                    .create_table(&self.table_name, Box::new(batches))
                    .execute()
                    .await?;
                *self.table.lock() = Some(table);
            }
        }

        log::debug!("[Store] Upserted {}", record.repo_name);
        Ok(())
    }

    async fn delete(&self, repo_name: &str) -> Result<bool, StoreError> {
        let Some(table) = self.current_table() else {
            return Ok(false);
        };

        let predicate = key_predicate(repo_name);
        if table.count_rows(Some(predicate.clone())).await? == 0 {
            return Ok(false);
        }
        table.delete(&predicate).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if self.current_table().is_some() {
            self.db.drop_table(&self.table_name).await?;
            *self.table.lock() = None;
        }
        Ok(())
    }

    async fn get(&self, repo_name: &str) -> Result<Option<SummaryRecord>, StoreError> {
        let records = self.collect_records(Some(key_predicate(repo_name))).await?;
        Ok(records.into_iter().next())
    }

    async fn list(&self) -> Result<Vec<SummaryRecord>, StoreError> {
        self.collect_records(None).await
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DenseHit>, StoreError> {
        let Some(table) = self.current_table() else {
            return Ok(vec![]);
        };
        if top_k == 0 {
            return Ok(vec![]);
        }

        let batches = table
            .vector_search(embedding.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            let names = string_column(batch, KEY_COLUMN)?;
            // LanceDB returns _distance column for vector search
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| StoreError::Backend("Missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                hits.push(DenseHit {
                    repo_name: names.value(i).to_string(),
                    score: distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.repo_name.cmp(&b.repo_name))
        });
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        match self.current_table() {
            Some(table) => Ok(table.count_rows(None).await?),
            None => Ok(0),
        }
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Distance
    }
}
