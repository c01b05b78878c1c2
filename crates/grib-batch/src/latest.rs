//! Finding the most recent available run.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::batch::ResolvedItem;
use crate::error::{BatchError, Result};
use crate::handle::HandleFactory;
use crate::resolver::BatchResolver;
use crate::time::Frequency;

/// Number of candidate run times probed when none is configured.
pub const DEFAULT_WINDOW: usize = 6;

/// Latest run, at lead 0, whose file exists among the `window_count` most
/// recent multiples of `freq` up to now.
pub async fn find_latest<F: HandleFactory>(
    factory: &F,
    window_count: usize,
    freq: Frequency,
    max_workers: usize,
) -> Result<ResolvedItem<F::Handle>> {
    find_latest_at(factory, Utc::now(), window_count, freq, max_workers).await
}

/// [`find_latest`] against an explicit clock.
#[instrument(skip(factory), fields(now = %now, freq = %freq))]
pub async fn find_latest_at<F: HandleFactory>(
    factory: &F,
    now: DateTime<Utc>,
    window_count: usize,
    freq: Frequency,
    max_workers: usize,
) -> Result<ResolvedItem<F::Handle>> {
    if window_count == 0 {
        return Err(BatchError::InvalidInput(
            "window_count must be at least 1".to_string(),
        ));
    }

    let end = freq.floor(now);
    let candidates = freq.trailing_window(end, window_count)?;
    let (first, last) = (candidates[0], end);

    let batch = BatchResolver::new(factory)
        .with_max_workers(max_workers)
        .resolve_normalized(candidates, vec![0])
        .await?;

    match batch.into_existing().pop() {
        Some(item) => {
            info!(date = %item.date(), "Found latest run");
            Ok(item)
        }
        None => Err(BatchError::NotFound(format!(
            "no run found between {} and {}",
            first.format("%Y-%m-%d %H:%M"),
            last.format("%Y-%m-%d %H:%M")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandleError;
    use crate::handle::{
        Artifact, DataHandle, DownloadOptions, InventoryRow, OpenOptions, OpenResult,
    };
    use crate::task::Task;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Probe(Option<Artifact>);

    #[async_trait]
    impl DataHandle for Probe {
        fn artifact(&self) -> Option<&Artifact> {
            self.0.as_ref()
        }

        async fn download(
            &self,
            _search: Option<&str>,
            _options: &DownloadOptions,
        ) -> std::result::Result<PathBuf, HandleError> {
            unreachable!()
        }

        async fn open_as_array(
            &self,
            _search: Option<&str>,
            _options: &OpenOptions,
        ) -> std::result::Result<OpenResult, HandleError> {
            unreachable!()
        }

        async fn inventory(
            &self,
            _search: Option<&str>,
        ) -> std::result::Result<Vec<InventoryRow>, HandleError> {
            unreachable!()
        }
    }

    /// Files exist for runs up to and including `published`.
    struct Published {
        published: DateTime<Utc>,
        seen: Mutex<Vec<Task>>,
    }

    #[async_trait]
    impl HandleFactory for Published {
        type Handle = Probe;

        async fn resolve(&self, task: Task) -> std::result::Result<Probe, HandleError> {
            self.seen.lock().unwrap().push(task);
            Ok(Probe((task.date <= self.published).then(|| Artifact {
                source: "probe".to_string(),
                location: task.to_string(),
            })))
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_picks_most_recent_existing_run() {
        let factory = Published {
            published: at(10, 0),
            seen: Mutex::new(Vec::new()),
        };

        let item = find_latest_at(&factory, at(12, 40), 6, Frequency::default(), 4)
            .await
            .unwrap();
        assert_eq!(item.date(), at(10, 0));
        assert_eq!(item.lead(), 0);

        let mut seen = factory.seen.into_inner().unwrap();
        seen.sort_by_key(|t| t.date);
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.first().unwrap().date, at(7, 0));
        assert_eq!(seen.last().unwrap().date, at(12, 0));
        assert!(seen.iter().all(|t| t.lead == 0));
    }

    #[tokio::test]
    async fn test_not_found_when_window_is_empty() {
        let factory = Published {
            published: at(0, 0),
            seen: Mutex::new(Vec::new()),
        };

        let freq = Frequency::new(Duration::hours(6)).unwrap();
        let err = find_latest_at(&factory, at(23, 59), 3, freq, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_window_is_invalid() {
        let factory = Published {
            published: at(0, 0),
            seen: Mutex::new(Vec::new()),
        };
        let err = find_latest_at(&factory, at(1, 0), 0, Frequency::default(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_invalid() {
        let factory = Published {
            published: at(0, 0),
            seen: Mutex::new(Vec::new()),
        };
        let freq: Frequency = "100000000d".parse().unwrap();
        let err = find_latest_at(&factory, at(12, 0), 6, freq, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidInput(_)));
        assert!(factory.seen.lock().unwrap().is_empty());
    }
}
