//! Resolved batches and the fan-out operations built on them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::dataset::GridDataset;
use crate::error::{BatchError, Result, TaskResolutionFailure};
use crate::handle::{
    Artifact, DataHandle, DownloadOptions, HandleFactory, InventoryRow, OpenOptions, OpenResult,
};
use crate::hypercube::{flatten_open_results, group_hypercubes, merge_hypercube};
use crate::normalize::{DateSpec, LeadSpec};
use crate::resolver::BatchResolver;
use crate::task::Task;

/// A task together with the handle it resolved to.
#[derive(Debug)]
pub struct ResolvedItem<H> {
    task: Task,
    handle: H,
}

impl<H: DataHandle> ResolvedItem<H> {
    pub fn new(task: Task, handle: H) -> Self {
        Self { task, handle }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.task.date
    }

    pub fn lead(&self) -> u32 {
        self.task.lead
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn into_handle(self) -> H {
        self.handle
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.handle.artifact()
    }

    pub fn exists(&self) -> bool {
        self.handle.exists()
    }
}

/// Counts for one resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub tasks: usize,
    pub existing: usize,
    pub missing: usize,
    pub failed: usize,
}

/// All outcomes of one resolution run.
///
/// `existing` and `missing` are disjoint and sorted by date, then lead.
/// Tasks whose handle could not be built are kept apart in `failures`.
#[derive(Debug)]
pub struct Batch<H> {
    pub(crate) dates: Vec<DateTime<Utc>>,
    pub(crate) leads: Vec<u32>,
    pub(crate) existing: Vec<ResolvedItem<H>>,
    pub(crate) missing: Vec<ResolvedItem<H>>,
    pub(crate) failures: Vec<TaskResolutionFailure>,
}

impl<H: DataHandle> Batch<H> {
    /// Resolve every (date, lead) combination with at most `max_workers`
    /// concurrent probes.
    pub async fn resolve<F>(
        factory: &F,
        dates: impl Into<DateSpec>,
        leads: impl Into<LeadSpec>,
        max_workers: usize,
    ) -> Result<Self>
    where
        F: HandleFactory<Handle = H>,
    {
        BatchResolver::new(factory)
            .with_max_workers(max_workers)
            .resolve(dates, leads)
            .await
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn leads(&self) -> &[u32] {
        &self.leads
    }

    pub fn existing(&self) -> &[ResolvedItem<H>] {
        &self.existing
    }

    pub fn missing(&self) -> &[ResolvedItem<H>] {
        &self.missing
    }

    pub fn failures(&self) -> &[TaskResolutionFailure] {
        &self.failures
    }

    pub fn into_existing(self) -> Vec<ResolvedItem<H>> {
        self.existing
    }

    /// Number of resolved items, present or absent.
    pub fn len(&self) -> usize {
        self.existing.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn task_count(&self) -> usize {
        self.dates.len() * self.leads.len()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            tasks: self.task_count(),
            existing: self.existing.len(),
            missing: self.missing.len(),
            failed: self.failures.len(),
        }
    }

    /// Date x lead grid of every task outcome.
    ///
    /// Cells are placed by the task's position on the caller's axes, so a
    /// missing or failed task leaves an explicit marker instead of shifting
    /// later cells.
    pub fn as_table(&self) -> HandleTable<'_, H> {
        let columns = self.leads.len();
        let mut cells: Vec<Option<TableCell<'_, H>>> = vec![None; self.task_count()];

        let mut place = |task: &Task, cell| {
            if let Some(slot) = cells.get_mut(task.date_index * columns + task.lead_index) {
                *slot = Some(cell);
            }
        };
        for item in &self.existing {
            place(&item.task, TableCell::Present(item));
        }
        for item in &self.missing {
            place(&item.task, TableCell::Missing(item));
        }
        for failure in &self.failures {
            place(&failure.task, TableCell::Failed(failure));
        }

        HandleTable {
            rows: self.dates.clone(),
            columns: self.leads.iter().map(|lead| format!("F{lead:02}")).collect(),
            cells,
        }
    }

    /// Concatenated inventories of every existing file, each row tagged
    /// with the file it came from.
    #[instrument(skip(self), fields(files = self.existing.len()))]
    pub async fn aggregate_inventory(&self, search: Option<&str>) -> Result<Vec<InventoryRow>> {
        let mut rows = Vec::new();
        for item in &self.existing {
            let file = item.artifact().map(|a| a.location.clone());
            let listing = item
                .handle
                .inventory(search)
                .await
                .map_err(|source| BatchError::Inventory {
                    task: item.task,
                    source,
                })?;
            rows.extend(listing.into_iter().map(|mut row| {
                row.file = file.clone();
                row
            }));
        }
        debug!(rows = rows.len(), "Aggregated inventory");
        Ok(rows)
    }

    /// Download every existing file concurrently.
    ///
    /// Failed downloads are logged and left out; paths come back in
    /// completion order.
    #[instrument(skip(self, options), fields(files = self.existing.len()))]
    pub async fn download_all(
        &self,
        search: Option<&str>,
        max_workers: usize,
        options: &DownloadOptions,
    ) -> Vec<PathBuf> {
        if self.existing.is_empty() {
            return Vec::new();
        }
        let workers = self.existing.len().min(max_workers).max(1);
        info!(tasks = self.existing.len(), workers, "Downloading files");

        let results = stream::iter(self.existing.iter())
            .map(|item| async move {
                match item.handle.download(search, options).await {
                    Ok(path) => {
                        debug!(task = %item.task, path = %path.display(), "Download complete");
                        Some(path)
                    }
                    Err(e) => {
                        error!(task = %item.task, error = %e, "Download failed");
                        None
                    }
                }
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;

        let paths: Vec<PathBuf> = results.into_iter().flatten().collect();
        metrics::counter!("grib_batch_downloads_total", "outcome" => "ok")
            .increment(paths.len() as u64);
        metrics::counter!("grib_batch_downloads_total", "outcome" => "failed")
            .increment((self.existing.len() - paths.len()) as u64);
        paths
    }

    /// Open every existing file and merge the results into one dataset per
    /// hypercube (vertical level type and values).
    ///
    /// Runs sequentially when `max_workers` is `None`. Files that fail to
    /// open are logged and left out; inside a hypercube their cells, like
    /// those of absent files, hold NaN.
    #[instrument(skip(self, options), fields(files = self.existing.len()))]
    pub async fn read_as_arrays(
        &self,
        search: Option<&str>,
        max_workers: Option<usize>,
        options: &OpenOptions,
    ) -> Result<Vec<GridDataset>> {
        let opened: Vec<Option<OpenResult>> = match max_workers {
            Some(max_workers) => {
                let workers = self.existing.len().min(max_workers).max(1);
                info!(tasks = self.existing.len(), workers, "Opening files");
                stream::iter(self.existing.iter())
                    .map(|item| open_item(item, search, options))
                    .buffer_unordered(workers)
                    .collect()
                    .await
            }
            None => {
                stream::iter(self.existing.iter())
                    .then(|item| open_item(item, search, options))
                    .collect()
                    .await
            }
        };

        let datasets = flatten_open_results(opened.into_iter().flatten().collect())?;
        group_hypercubes(datasets)?
            .into_iter()
            .map(|(key, members)| merge_hypercube(&key, members))
            .collect()
    }
}

async fn open_item<H: DataHandle>(
    item: &ResolvedItem<H>,
    search: Option<&str>,
    options: &OpenOptions,
) -> Option<OpenResult> {
    match item.handle.open_as_array(search, options).await {
        Ok(result) => Some(result),
        Err(e) => {
            error!(task = %item.task, error = %e, "Open failed");
            None
        }
    }
}

/// Outcome of one task as placed in a [`HandleTable`].
#[derive(Debug)]
pub enum TableCell<'a, H> {
    Present(&'a ResolvedItem<H>),
    Missing(&'a ResolvedItem<H>),
    Failed(&'a TaskResolutionFailure),
}

impl<H> Clone for TableCell<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for TableCell<'_, H> {}

impl<'a, H> TableCell<'a, H> {
    pub fn item(&self) -> Option<&'a ResolvedItem<H>> {
        match *self {
            TableCell::Present(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, TableCell::Present(_))
    }
}

/// Dates (rows) by leads (columns).
#[derive(Debug)]
pub struct HandleTable<'a, H> {
    rows: Vec<DateTime<Utc>>,
    columns: Vec<String>,
    cells: Vec<Option<TableCell<'a, H>>>,
}

impl<'a, H> HandleTable<'a, H> {
    pub fn rows(&self) -> &[DateTime<Utc>] {
        &self.rows
    }

    /// Column labels, e.g. "F00", "F06".
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<TableCell<'a, H>> {
        if row >= self.rows.len() || column >= self.columns.len() {
            return None;
        }
        self.cells[row * self.columns.len() + column]
    }

    pub fn row(&self, row: usize) -> Vec<Option<TableCell<'a, H>>> {
        (0..self.columns.len())
            .map(|column| self.cell(row, column))
            .collect()
    }

    /// True when every cell holds an existing file.
    pub fn is_complete(&self) -> bool {
        self.cells
            .iter()
            .all(|cell| cell.map(|c| c.is_present()).unwrap_or(false))
    }
}
