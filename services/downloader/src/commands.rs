//! Subcommand implementations and their JSON output shapes.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use grib_batch::{
    find_latest, Batch, BatchConfig, BatchSummary, DataHandle, DateSpec, DownloadOptions,
    GridDataset, HandleFactory, HandleTable, InventoryRow, LeadSpec, LevelCoord, OpenOptions,
    ResolvedItem, TableCell, TaskResolutionFailure,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::Selection;

/// One resolved file.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub date: DateTime<Utc>,
    pub lead: u32,
    pub valid_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl<H: DataHandle> From<&ResolvedItem<H>> for FileEntry {
    fn from(item: &ResolvedItem<H>) -> Self {
        let artifact = item.artifact();
        Self {
            date: item.date(),
            lead: item.lead(),
            valid_time: item.task().valid_time(),
            source: artifact.map(|a| a.source.clone()),
            location: artifact.map(|a| a.location.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub date: DateTime<Utc>,
    pub lead: u32,
    pub error: String,
}

impl From<&TaskResolutionFailure> for FailureEntry {
    fn from(failure: &TaskResolutionFailure) -> Self {
        Self {
            date: failure.task.date,
            lead: failure.task.lead,
            error: failure.cause.to_string(),
        }
    }
}

/// Date x lead grid with one status word per cell.
#[derive(Debug, Serialize)]
pub struct TableOutput {
    pub rows: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    pub cells: Vec<Vec<&'static str>>,
}

impl<H> From<&HandleTable<'_, H>> for TableOutput {
    fn from(table: &HandleTable<'_, H>) -> Self {
        let cells = (0..table.rows().len())
            .map(|row| {
                table
                    .row(row)
                    .into_iter()
                    .map(|cell| match cell {
                        Some(TableCell::Present(_)) => "present",
                        Some(TableCell::Missing(_)) => "missing",
                        Some(TableCell::Failed(_)) => "failed",
                        None => "unknown",
                    })
                    .collect()
            })
            .collect();

        Self {
            rows: table.rows().to_vec(),
            columns: table.columns().to_vec(),
            cells,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub summary: BatchSummary,
    pub table: TableOutput,
    pub existing: Vec<FileEntry>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
pub struct InventoryOutput {
    pub summary: BatchSummary,
    pub rows: Vec<InventoryRow>,
}

#[derive(Debug, Serialize)]
pub struct DownloadOutput {
    pub summary: BatchSummary,
    pub paths: Vec<PathBuf>,
}

/// Description of a merged dataset, optionally with its values.
#[derive(Debug, Serialize)]
pub struct DatasetOutput {
    pub hypercube: Option<String>,
    pub level: LevelCoord,
    pub time: Vec<DateTime<Utc>>,
    pub step: Vec<u32>,
    pub dims: Vec<(String, usize)>,
    pub variables: Vec<String>,
    pub attrs: grib_batch::Attrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DatasetOutput {
    fn describe(ds: &GridDataset, with_values: bool) -> Result<Self> {
        Ok(Self {
            hypercube: grib_batch::HypercubeKey::of(ds).ok().map(|k| k.to_string()),
            level: ds.level().clone(),
            time: ds.time().to_vec(),
            step: ds.step().to_vec(),
            dims: ds.dims(),
            variables: ds.variables().keys().cloned().collect(),
            attrs: ds.attrs().clone(),
            data: if with_values {
                Some(serde_json::to_value(ds)?)
            } else {
                None
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReadOutput {
    pub summary: BatchSummary,
    pub datasets: Vec<DatasetOutput>,
}

async fn resolve<F: HandleFactory>(
    factory: &F,
    selection: &Selection,
    config: &BatchConfig,
) -> Result<Batch<F::Handle>> {
    let dates: DateSpec = selection.dates.parse()?;
    let leads: LeadSpec = selection.leads.parse()?;
    let batch = Batch::resolve(factory, dates, leads, config.resolve_workers).await?;

    let summary = batch.summary();
    if summary.existing == 0 {
        warn!(tasks = summary.tasks, "No files exist for the selection");
    }
    Ok(batch)
}

pub async fn search<F: HandleFactory>(
    factory: &F,
    selection: &Selection,
    config: &BatchConfig,
) -> Result<SearchOutput> {
    let batch = resolve(factory, selection, config).await?;
    Ok(SearchOutput {
        summary: batch.summary(),
        table: TableOutput::from(&batch.as_table()),
        existing: batch.existing().iter().map(FileEntry::from).collect(),
        failures: batch.failures().iter().map(FailureEntry::from).collect(),
    })
}

pub async fn inventory<F: HandleFactory>(
    factory: &F,
    selection: &Selection,
    search: Option<&str>,
    config: &BatchConfig,
) -> Result<InventoryOutput> {
    let batch = resolve(factory, selection, config).await?;
    let rows = batch.aggregate_inventory(search).await?;
    info!(rows = rows.len(), "Inventory complete");
    Ok(InventoryOutput {
        summary: batch.summary(),
        rows,
    })
}

pub async fn download<F: HandleFactory>(
    factory: &F,
    selection: &Selection,
    search: Option<&str>,
    options: &DownloadOptions,
    config: &BatchConfig,
) -> Result<DownloadOutput> {
    let batch = resolve(factory, selection, config).await?;
    let mut paths = batch
        .download_all(search, config.download_workers, options)
        .await;
    paths.sort();
    info!(files = paths.len(), "Downloads complete");
    Ok(DownloadOutput {
        summary: batch.summary(),
        paths,
    })
}

pub async fn read<F: HandleFactory>(
    factory: &F,
    selection: &Selection,
    search: Option<&str>,
    options: &OpenOptions,
    with_values: bool,
    config: &BatchConfig,
) -> Result<ReadOutput> {
    let batch = resolve(factory, selection, config).await?;
    let datasets = batch
        .read_as_arrays(search, config.read_workers, options)
        .await?;
    info!(hypercubes = datasets.len(), "Read complete");

    Ok(ReadOutput {
        summary: batch.summary(),
        datasets: datasets
            .iter()
            .map(|ds| DatasetOutput::describe(ds, with_values))
            .collect::<Result<_>>()?,
    })
}

pub async fn latest<F: HandleFactory>(factory: &F, config: &BatchConfig) -> Result<FileEntry> {
    let item = find_latest(
        factory,
        config.latest_window,
        config.latest_frequency,
        config.resolve_workers,
    )
    .await?;
    info!(date = %item.date(), "Found latest run");
    Ok(FileEntry::from(&item))
}
