//! Index build orchestration
//!
//! Each repository runs fetch -> summarize -> embed -> persist on its own.
//! Up to `concurrency` pipelines run at once; events are emitted in request
//! order regardless of completion order.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::RagstarConfig;
use crate::embedding::Embedder;
use crate::error::{EmbedError, FetchError, StoreError, SummarizeError};
use crate::fetch::{ContentFetcher, FetchLimits};
use crate::record_store::SummaryRecordStore;
use crate::summarizer::Summarizer;
use crate::types::{
    BuildEvent, BuildJob, BuildTally, FailureStage, PipelineOutcome, RepositoryDescriptor,
    SummaryRecord,
};

/// Build knobs
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Maximum pipelines in flight
    pub concurrency: usize,
    pub limits: FetchLimits,
    pub max_prompt_chars: usize,
    pub fetch_timeout: Duration,
    pub summarize_timeout: Duration,
    pub embed_timeout: Duration,
}

impl BuildSettings {
    pub fn from_config(config: &RagstarConfig) -> Self {
        Self {
            concurrency: config.build.concurrency.max(1),
            limits: FetchLimits::from(&config.fetch),
            max_prompt_chars: config.summarizer.max_prompt_chars,
            fetch_timeout: config.fetch.timeout(),
            summarize_timeout: config.summarizer.timeout(),
            embed_timeout: config.embedding.timeout(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::from_config(&RagstarConfig::default())
    }
}

/// Errors a pipeline stage can report
trait StageError: Display {
    fn cause(&self) -> &'static str;
}

impl StageError for FetchError {
    fn cause(&self) -> &'static str {
        FetchError::cause(self)
    }
}

impl StageError for SummarizeError {
    fn cause(&self) -> &'static str {
        SummarizeError::cause(self)
    }
}

impl StageError for EmbedError {
    fn cause(&self) -> &'static str {
        EmbedError::cause(self)
    }
}

impl StageError for StoreError {
    fn cause(&self) -> &'static str {
        StoreError::cause(self)
    }
}

fn failed(repo_name: &str, stage: FailureStage, err: &dyn StageError) -> PipelineOutcome {
    log::warn!("[Build] {} failed at {}: {}", repo_name, stage, err);
    PipelineOutcome::Failed {
        repo_name: repo_name.to_string(),
        stage,
        cause: err.cause().to_string(),
        message: err.to_string(),
    }
}

/// Run one stage under a timeout, mapping any failure to a `Failed` outcome
async fn run_stage<T, E, F>(
    repo_name: &str,
    stage: FailureStage,
    limit: Duration,
    on_timeout: E,
    fut: F,
) -> Result<T, PipelineOutcome>
where
    E: StageError,
    F: Future<Output = Result<T, E>>,
{
    log::debug!("[Build] {}: {}", repo_name, stage);
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(failed(repo_name, stage, &err)),
        Err(_) => Err(failed(repo_name, stage, &on_timeout)),
    }
}

/// Ordering between pipelines that share a repository name
struct Turn {
    /// Resolves once the previous same-name pipeline is done
    after: Option<oneshot::Receiver<()>>,
    /// Dropped when this pipeline is done
    done: oneshot::Sender<()>,
}

fn plan_turns(descriptors: &[RepositoryDescriptor]) -> Vec<Turn> {
    let mut last: HashMap<&str, oneshot::Receiver<()>> = HashMap::new();
    descriptors
        .iter()
        .map(|descriptor| {
            let (done, next) = oneshot::channel();
            let after = last.insert(descriptor.name.as_str(), next);
            Turn { after, done }
        })
        .collect()
}

/// Drives the per-repository build pipeline
#[derive(Clone)]
pub struct BuildOrchestrator {
    fetcher: Arc<dyn ContentFetcher>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<SummaryRecordStore>,
    settings: BuildSettings,
}

impl BuildOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<SummaryRecordStore>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            fetcher,
            summarizer,
            embedder,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<SummaryRecordStore> {
        &self.store
    }

    /// Build every descriptor and return once all have an outcome
    pub async fn build_all(&self, descriptors: Vec<RepositoryDescriptor>) -> BuildJob {
        self.build_all_with_progress(descriptors, CancellationToken::new(), |_| {})
            .await
    }

    /// Build every descriptor, reporting each event as it is emitted
    pub async fn build_all_with_progress<F>(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> BuildJob
    where
        F: FnMut(&BuildEvent),
    {
        let start = Instant::now();
        let requested = descriptors.clone();
        let mut outcomes = Vec::with_capacity(requested.len());
        let mut tally = BuildTally::default();

        let mut events = self.stream_build(descriptors, cancel);
        while let Some(event) = events.next().await {
            on_event(&event);
            if let BuildEvent::Progress { outcome, .. } = event {
                tally.record(&outcome);
                outcomes.push(outcome);
            }
        }

        BuildJob {
            requested,
            outcomes,
            tally,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Lazily build `descriptors`, yielding `start`, one `progress` per
    /// descriptor in request order, then `complete`.
    ///
    /// Once `cancel` fires, descriptors that have not started yield
    /// `Cancelled`; pipelines already running finish. Records persisted
    /// before the stream is dropped stay persisted.
    pub fn stream_build(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, BuildEvent> {
        let total = descriptors.len();
        let concurrency = self.settings.concurrency.max(1);
        let turns = plan_turns(&descriptors);
        let tally = Arc::new(Mutex::new(BuildTally::default()));
        let started = Instant::now();

        log::info!(
            "[Build] Starting build of {} repositories (concurrency {})",
            total,
            concurrency
        );

        let this = self.clone();
        let progress = stream::iter(descriptors.into_iter().zip(turns).enumerate())
            .map(move |(index, (descriptor, turn))| {
                let this = this.clone();
                let cancel = cancel.clone();
                async move {
                    let outcome = this.run_in_turn(descriptor, turn, &cancel).await;
                    (index, outcome)
                }
            })
            .buffered(concurrency)
            .map({
                let tally = Arc::clone(&tally);
                move |(index, outcome)| {
                    tally.lock().record(&outcome);
                    BuildEvent::Progress {
                        index,
                        repo_name: outcome.repo_name().to_string(),
                        outcome,
                    }
                }
            });

        let complete = stream::once(async move {
            let tally = *tally.lock();
            log::info!(
                "[Build] Finished in {}ms: {} succeeded, {} failed, {} cancelled",
                started.elapsed().as_millis(),
                tally.succeeded,
                tally.failed,
                tally.cancelled
            );
            tally.complete_event()
        });

        stream::once(async move { BuildEvent::Start { total } })
            .chain(progress)
            .chain(complete)
            .boxed()
    }

    async fn run_in_turn(
        &self,
        descriptor: RepositoryDescriptor,
        turn: Turn,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let Turn { after, done } = turn;
        if let Some(previous) = after {
            // Err only means the previous pipeline was dropped, which also
            // releases the name
            let _ = previous.await;
        }

        let outcome = if cancel.is_cancelled() {
            log::info!("[Build] {} cancelled before start", descriptor.name);
            PipelineOutcome::Cancelled {
                repo_name: descriptor.name,
            }
        } else {
            self.run_pipeline(&descriptor).await
        };
        drop(done);
        outcome
    }

    /// Run fetch -> summarize -> embed -> persist for one repository
    pub async fn run_pipeline(&self, descriptor: &RepositoryDescriptor) -> PipelineOutcome {
        let name = descriptor.name.as_str();
        let settings = &self.settings;

        let content = match run_stage(
            name,
            FailureStage::Fetch,
            settings.fetch_timeout,
            FetchError::Timeout,
            self.fetcher.fetch(&descriptor.url, settings.limits),
        )
        .await
        {
            Ok(content) if content.trim().is_empty() => {
                return failed(name, FailureStage::Fetch, &FetchError::Empty)
            }
            Ok(content) => content,
            Err(outcome) => return outcome,
        };

        let summary = match run_stage(
            name,
            FailureStage::Summarize,
            settings.summarize_timeout,
            SummarizeError::Timeout,
            self.summarizer
                .summarize(name, &content, settings.max_prompt_chars),
        )
        .await
        {
            Ok(summary) if summary.trim().is_empty() => {
                let err = SummarizeError::Model("empty summary".to_string());
                return failed(name, FailureStage::Summarize, &err);
            }
            Ok(summary) => summary,
            Err(outcome) => return outcome,
        };

        let embedding = match run_stage(
            name,
            FailureStage::Embed,
            settings.embed_timeout,
            EmbedError::Timeout,
            self.embedder.embed(&summary),
        )
        .await
        {
            Ok(embedding) if embedding.is_empty() => {
                return failed(name, FailureStage::Embed, &EmbedError::Empty)
            }
            Ok(embedding) => embedding,
            Err(outcome) => return outcome,
        };

        let record = SummaryRecord {
            repo_name: name.to_string(),
            url: descriptor.url.clone(),
            summary_text: summary,
            embedding_vector: embedding,
            created_at: Utc::now(),
        };

        // Persist on its own task so that dropping the caller never tears
        // the write; no timeout here for the same reason
        log::debug!("[Build] {}: {}", name, FailureStage::Persist);
        let store = Arc::clone(&self.store);
        let persisted = tokio::spawn(async move {
            store.upsert(&record).await.map(|()| record)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))
        .and_then(|result| result);

        match persisted {
            Ok(record) => {
                log::info!(
                    "[Build] {} indexed ({} chars summary)",
                    name,
                    record.summary_length()
                );
                PipelineOutcome::Success { record }
            }
            Err(err) => failed(name, FailureStage::Persist, &err),
        }
    }
}
