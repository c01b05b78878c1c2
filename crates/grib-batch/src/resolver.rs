//! Fan-out/fan-in resolution of a dates x leads cross product.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};

use crate::batch::{Batch, ResolvedItem};
use crate::config::DEFAULT_RESOLVE_WORKERS;
use crate::error::{BatchError, Result, TaskResolutionFailure};
use crate::handle::{DataHandle, HandleFactory};
use crate::normalize::{normalize_dates, normalize_leads, DateSpec, LeadSpec};
use crate::task::Task;

/// Resolves many tasks through one [`HandleFactory`] with bounded
/// concurrency.
pub struct BatchResolver<'a, F> {
    factory: &'a F,
    max_workers: usize,
}

impl<'a, F: HandleFactory> BatchResolver<'a, F> {
    pub fn new(factory: &'a F) -> Self {
        Self {
            factory,
            max_workers: DEFAULT_RESOLVE_WORKERS,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn factory(&self) -> &F {
        self.factory
    }

    /// Normalize the inputs, then resolve their cross product.
    pub async fn resolve(
        &self,
        dates: impl Into<DateSpec>,
        leads: impl Into<LeadSpec>,
    ) -> Result<Batch<F::Handle>> {
        let dates = normalize_dates(dates)?;
        let leads = normalize_leads(leads)?;
        self.resolve_normalized(dates, leads).await
    }

    /// Resolve already-normalized axes.
    ///
    /// Tasks run in completion order; the result is re-sorted by date, then
    /// lead, before it is partitioned. A task that fails is logged and kept
    /// in [`Batch::failures`]; only a pool that cannot run, or a run where
    /// every task failed, is an error.
    #[instrument(skip_all, fields(dates = dates.len(), leads = leads.len()))]
    pub async fn resolve_normalized(
        &self,
        dates: Vec<DateTime<Utc>>,
        leads: Vec<u32>,
    ) -> Result<Batch<F::Handle>> {
        if self.max_workers == 0 {
            return Err(BatchError::Resolution(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let tasks = Task::cross_product(&dates, &leads);
        if tasks.is_empty() {
            return Err(BatchError::InvalidInput(
                "no tasks: dates and leads must both be non-empty".to_string(),
            ));
        }

        let task_count = tasks.len();
        let workers = task_count.min(self.max_workers);
        info!(tasks = task_count, workers, "Resolving tasks");
        let started = Instant::now();

        let factory = self.factory;
        let outcomes: Vec<std::result::Result<ResolvedItem<F::Handle>, TaskResolutionFailure>> =
            stream::iter(tasks)
                .map(|task| async move {
                    match factory.resolve(task).await {
                        Ok(handle) => Ok(ResolvedItem::new(task, handle)),
                        Err(cause) => {
                            error!(task = %task, error = %cause, "Task resolution failed");
                            Err(TaskResolutionFailure { task, cause })
                        }
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        let mut resolved = Vec::with_capacity(task_count);
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(item) => resolved.push(item),
                Err(failure) => failures.push(failure),
            }
        }

        // Equivalent to sorting by lead, then stably by date.
        resolved.sort_by_key(|item: &ResolvedItem<F::Handle>| item.task().sort_key());
        failures.sort_by_key(|failure| failure.task.sort_key());

        metrics::histogram!("grib_batch_resolve_seconds").record(started.elapsed().as_secs_f64());

        if resolved.is_empty() {
            return Err(BatchError::Resolution(format!(
                "all {task_count} tasks failed"
            )));
        }

        let (existing, missing): (Vec<_>, Vec<_>) =
            resolved.into_iter().partition(|item| item.handle().exists());

        metrics::counter!("grib_batch_tasks_total", "outcome" => "present")
            .increment(existing.len() as u64);
        metrics::counter!("grib_batch_tasks_total", "outcome" => "absent")
            .increment(missing.len() as u64);
        metrics::counter!("grib_batch_tasks_total", "outcome" => "failed")
            .increment(failures.len() as u64);

        info!(
            existing = existing.len(),
            missing = missing.len(),
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Resolution complete"
        );

        if !missing.is_empty() {
            warn!(
                missing = missing.len(),
                existing = existing.len(),
                "Could not find {}/{} GRIB files",
                missing.len(),
                task_count
            );
        }
        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                tasks = task_count,
                "Some tasks failed to resolve"
            );
        }

        Ok(Batch {
            dates,
            leads,
            existing,
            missing,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandleError;
    use crate::handle::{Artifact, DownloadOptions, InventoryRow, OpenOptions, OpenResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::PathBuf;

    #[derive(Debug)]
    struct StubHandle(Option<Artifact>);

    #[async_trait]
    impl DataHandle for StubHandle {
        fn artifact(&self) -> Option<&Artifact> {
            self.0.as_ref()
        }

        async fn download(
            &self,
            _search: Option<&str>,
            _options: &DownloadOptions,
        ) -> std::result::Result<PathBuf, HandleError> {
            Err(HandleError::Other("not used".to_string()))
        }

        async fn open_as_array(
            &self,
            _search: Option<&str>,
            _options: &OpenOptions,
        ) -> std::result::Result<OpenResult, HandleError> {
            Err(HandleError::Other("not used".to_string()))
        }

        async fn inventory(
            &self,
            _search: Option<&str>,
        ) -> std::result::Result<Vec<InventoryRow>, HandleError> {
            Ok(Vec::new())
        }
    }

    /// Lead 0 exists, lead 6 is absent, lead 99 fails.
    struct StubFactory;

    #[async_trait]
    impl HandleFactory for StubFactory {
        type Handle = StubHandle;

        async fn resolve(&self, task: Task) -> std::result::Result<StubHandle, HandleError> {
            match task.lead {
                0 => Ok(StubHandle(Some(Artifact {
                    source: "stub".to_string(),
                    location: format!("stub://{}", task),
                }))),
                99 => Err(HandleError::Http("connection reset".to_string())),
                _ => Ok(StubHandle(None)),
            }
        }
    }

    #[tokio::test]
    async fn test_partitions_existing_and_missing() {
        let batch = BatchResolver::new(&StubFactory)
            .resolve("2021-01-01", vec![0u32, 6])
            .await
            .unwrap();

        assert_eq!(batch.task_count(), 2);
        assert_eq!(batch.existing().len(), 1);
        assert_eq!(batch.existing()[0].lead(), 0);
        assert_eq!(batch.missing().len(), 1);
        assert_eq!(batch.missing()[0].lead(), 6);
        assert!(batch.failures().is_empty());
    }

    #[tokio::test]
    async fn test_failed_tasks_are_isolated() {
        let batch = BatchResolver::new(&StubFactory)
            .with_max_workers(2)
            .resolve(vec!["2021-01-01", "2021-01-02"], vec![0u32, 99, 6])
            .await
            .unwrap();

        let summary = batch.summary();
        assert_eq!(summary.tasks, 6);
        assert_eq!(summary.existing + summary.missing + summary.failed, 6);
        assert_eq!(summary.failed, 2);
        assert!(batch.failures().iter().all(|f| f.task.lead == 99));
    }

    #[tokio::test]
    async fn test_all_failed_is_an_error() {
        let err = BatchResolver::new(&StubFactory)
            .resolve("2021-01-01", 99u32)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_zero_workers_is_an_error() {
        let err = BatchResolver::new(&StubFactory)
            .with_max_workers(0)
            .resolve("2021-01-01", 0u32)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_invalid_input_before_scheduling() {
        let err = BatchResolver::new(&StubFactory)
            .resolve("not-a-date", 0u32)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidInput(_)));

        let err = BatchResolver::new(&StubFactory)
            .resolve_normalized(
                vec![Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()],
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidInput(_)));
    }
}
