use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use digest_core::{
    ConfigError, EngineConfig, Settings, TaskConfig, TaskLifecycle, TransitionError,
};
use engine_logging::{engine_error, engine_info, engine_warn};
use futures_util::future::join_all;

use crate::aggregate::Aggregator;
use crate::fetch::{FetchSettings, ReqwestFetcher, SourceFetcher};
use crate::pool::WorkerPool;
use crate::render::{Page, Renderer, TemplateStore};
use crate::report::{RunReport, TaskReport};
use crate::snapshot::SnapshotWriter;
use crate::surface::OutputSurface;
use crate::{SetupError, TaskError};

/// Source of "now" for snapshot keys and report timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs batches of tasks: aggregate, render, commit.
///
/// One worker pool bounds every fetch and every render/commit phase across
/// all tasks of a batch. A task holds no permit while its own fetches are in
/// flight, so tasks never wait on themselves.
pub struct Orchestrator {
    aggregator: Aggregator,
    renderer: Renderer,
    writer: Arc<SnapshotWriter>,
    pool: WorkerPool,
    timeout: Duration,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        templates: Arc<dyn TemplateStore>,
        writer: Arc<SnapshotWriter>,
        settings: &Settings,
    ) -> Self {
        let pool = WorkerPool::new(settings.max_workers);
        Self {
            aggregator: Aggregator::new(fetcher, pool.clone(), settings.timeout()),
            renderer: Renderer::new(templates),
            writer,
            pool,
            timeout: settings.timeout(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Production wiring: HTTP fetcher, index loaded from `surface`.
    pub fn from_settings(
        settings: &Settings,
        surface: Arc<dyn OutputSurface>,
        templates: Arc<dyn TemplateStore>,
    ) -> Result<Self, SetupError> {
        let tz = settings.tz()?;
        let writer = Arc::new(SnapshotWriter::open(surface, tz)?);
        let fetcher = Arc::new(ReqwestFetcher::new(FetchSettings::from_settings(settings)));
        Ok(Self::new(fetcher, templates, writer, settings))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Validate `config`, then run every task concurrently.
    ///
    /// Task failures are recorded in the report and never abort siblings.
    /// Only an invalid configuration fails the batch as a whole.
    pub async fn run_batch(&self, config: &EngineConfig) -> Result<RunReport, ConfigError> {
        config.validate()?;
        let settings_overridden = self.settings_drift(&config.settings)?;
        for drift in &settings_overridden {
            engine_warn!("{}", drift);
        }

        let started_at = (self.clock)();
        engine_info!("batch started with {} tasks", config.tasks.len());
        let tasks = join_all(config.tasks.iter().map(|task| self.run_task(task))).await;
        let report = RunReport {
            started_at,
            finished_at: (self.clock)(),
            settings_overridden,
            tasks,
        };
        engine_info!(
            "batch finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Pool size, timeout and timezone are fixed when the orchestrator is
    /// built. Describes every batch setting that differs and is overridden.
    fn settings_drift(&self, settings: &Settings) -> Result<Vec<String>, ConfigError> {
        let mut drift = Vec::new();
        if settings.max_workers != self.pool.limit() {
            drift.push(format!(
                "max_workers {} differs from pool size; using {}",
                settings.max_workers,
                self.pool.limit()
            ));
        }
        if settings.timeout() != self.timeout {
            drift.push(format!(
                "timeout_secs {} differs from built timeout; using {}",
                settings.timeout_secs,
                self.timeout.as_secs()
            ));
        }
        let tz = settings.tz()?;
        if tz != self.writer.timezone() {
            drift.push(format!(
                "timezone {} differs from snapshot timezone; using {}",
                tz,
                self.writer.timezone()
            ));
        }
        Ok(drift)
    }

    async fn run_task(&self, task: &TaskConfig) -> TaskReport {
        let mut report = TaskReport::new(task.name.clone());
        let mut lifecycle = TaskLifecycle::new();
        log_transition(&task.name, lifecycle.start());
        engine_info!("task {} running", task.name);

        match self.execute(task, &mut report).await {
            Ok(()) => {
                log_transition(&task.name, lifecycle.succeed());
                engine_info!(
                    "task {} succeeded: {} items -> {}",
                    task.name,
                    report.items_kept,
                    report.snapshot_path.as_deref().unwrap_or("-")
                );
            }
            Err(err) => {
                log_transition(&task.name, lifecycle.fail());
                engine_error!("task {} failed: {}", task.name, err);
                if let TaskError::AllSourcesFailed { errors, .. } = &err {
                    report.source_errors = errors.clone();
                }
                report.error = Some(err.to_string());
            }
        }
        report.status = lifecycle.status();
        report
    }

    async fn execute(&self, task: &TaskConfig, report: &mut TaskReport) -> Result<(), TaskError> {
        let aggregation = self.aggregator.run(task).await?;
        report.items_fetched = aggregation.fetched;
        report.items_kept = aggregation.items.len();
        report.source_errors = aggregation.source_errors;

        let _permit = self.pool.acquire().await.map_err(|_| TaskError::PoolClosed)?;
        let page = Page {
            slug: &task.output_slug,
            title: task.title(),
            items: &aggregation.items,
            variables: &task.variables,
        };
        let tree = self.renderer.render(&task.template, &page)?;
        let snapshot = self
            .writer
            .commit(&task.output_slug, task.title(), &tree, (self.clock)())
            .await?;
        report.snapshot_path = Some(snapshot.path);
        report.snapshot_key = Some(snapshot.key);
        Ok(())
    }
}

fn log_transition(task: &str, result: Result<(), TransitionError>) {
    if let Err(err) = result {
        engine_error!("task {}: {}", task, err);
    }
}
