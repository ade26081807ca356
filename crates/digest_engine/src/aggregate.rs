use std::sync::Arc;
use std::time::Duration;

use digest_core::{FilterChain, Item, SourceRef, SourceSpec, TaskConfig};
use engine_logging::{engine_debug, engine_warn};
use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::fetch::SourceFetcher;
use crate::pool::WorkerPool;
use crate::{FailureKind, FetchError, TaskError};

/// Result of fetching and filtering one task's sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Filtered items, grouped by source declaration order.
    pub items: Vec<Item>,
    /// Items fetched before filtering.
    pub fetched: usize,
    pub source_errors: Vec<FetchError>,
    pub sources_ok: usize,
}

/// Fans a task's sources out to the fetcher, at most `pool.limit()` at a time.
#[derive(Clone)]
pub struct Aggregator {
    fetcher: Arc<dyn SourceFetcher>,
    pool: WorkerPool,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, pool: WorkerPool, timeout: Duration) -> Self {
        Self {
            fetcher,
            pool,
            timeout,
        }
    }

    /// Fetch every source, merge in declaration order, then run the filter chain.
    ///
    /// Individual source failures are collected; the task only fails when
    /// no source succeeded or the filter chain itself is invalid.
    pub async fn run(&self, task: &TaskConfig) -> Result<Aggregation, TaskError> {
        let chain = FilterChain::compile(&task.filters).map_err(|violation| {
            TaskError::ContractViolation {
                task_name: task.name.clone(),
                violation,
            }
        })?;

        let mut slots: Vec<Option<Result<Vec<Item>, FetchError>>> =
            task.sources.iter().map(|_| None).collect();
        let mut pending: FuturesUnordered<_> = task
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| async move {
                let origin = SourceRef {
                    index,
                    label: source.label().to_string(),
                };
                (index, self.fetch_one(source, &origin).await)
            })
            .collect();
        while let Some((index, outcome)) = pending.next().await {
            slots[index] = Some(outcome);
        }
        drop(pending);

        let mut items = Vec::new();
        let mut source_errors = Vec::new();
        let mut sources_ok = 0;
        for outcome in slots.into_iter().flatten() {
            match outcome {
                Ok(batch) => {
                    sources_ok += 1;
                    items.extend(batch);
                }
                Err(err) => {
                    engine_warn!("task {}: {}", task.name, err);
                    source_errors.push(err);
                }
            }
        }

        if sources_ok == 0 {
            return Err(TaskError::AllSourcesFailed {
                task_name: task.name.clone(),
                errors: source_errors,
            });
        }

        let fetched = items.len();
        let items = chain.apply(items);
        engine_debug!(
            "task {}: {} of {} items kept from {} sources",
            task.name,
            items.len(),
            fetched,
            sources_ok
        );
        Ok(Aggregation {
            items,
            fetched,
            source_errors,
            sources_ok,
        })
    }

    async fn fetch_one(
        &self,
        source: &SourceSpec,
        origin: &SourceRef,
    ) -> Result<Vec<Item>, FetchError> {
        let _permit = self.pool.acquire().await.map_err(|closed| {
            FetchError::new(origin, FailureKind::Cancelled, closed.to_string())
        })?;
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(source, origin)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::new(
                origin,
                FailureKind::Timeout,
                format!("no response within {:?}", self.timeout),
            )),
        }
    }
}
