//! The per-file collaborator contract consumed by the batch layer.
//!
//! A [`HandleFactory`] turns one [`Task`] into a [`DataHandle`]; the handle
//! knows whether a remote file exists for that task and how to download,
//! open and list it. URL templates, existence probes and GRIB decoding all
//! live behind these traits.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::GridDataset;
use crate::error::HandleError;
use crate::task::Task;

/// Reference to a located remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Name of the source that had the file (e.g. "aws", "nomads")
    pub source: String,
    /// URL or path of the file
    pub location: String,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Options for [`DataHandle::download`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Re-download even when a local copy exists
    pub overwrite: bool,
    /// Override the handle's default save directory
    pub save_dir: Option<PathBuf>,
}

/// Options for [`DataHandle::open_as_array`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub overwrite: bool,
    /// Delete the local file once it has been read
    pub remove_download: bool,
}

/// What opening a file yields: one dataset, or one per vertical level type.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenResult {
    Single(GridDataset),
    Multiple(Vec<GridDataset>),
}

impl OpenResult {
    pub fn into_datasets(self) -> Vec<GridDataset> {
        match self {
            OpenResult::Single(ds) => vec![ds],
            OpenResult::Multiple(list) => list,
        }
    }
}

/// One GRIB message as described by a file's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub message: u32,
    pub start_byte: u64,
    /// Inclusive end byte; `None` for the last message in the file
    pub end_byte: Option<u64>,
    pub reference_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub variable: String,
    pub level: String,
    pub forecast_time: String,
    /// Text that search patterns are matched against, e.g. ":TMP:2 m above ground:anl"
    pub search_this: String,
    /// Artifact the row came from; set when inventories are aggregated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl InventoryRow {
    /// HTTP Range value for this message.
    pub fn byte_range(&self) -> String {
        match self.end_byte {
            Some(end) => format!("{}-{}", self.start_byte, end),
            None => format!("{}-", self.start_byte),
        }
    }
}

/// Resolves a single task to an existing or absent remote file.
#[async_trait]
pub trait DataHandle: Send + Sync {
    /// The located file, or `None` when no source has it.
    fn artifact(&self) -> Option<&Artifact>;

    fn exists(&self) -> bool {
        self.artifact().is_some()
    }

    /// Download the whole file, or only the messages matching `search`.
    async fn download(
        &self,
        search: Option<&str>,
        options: &DownloadOptions,
    ) -> Result<PathBuf, HandleError>;

    async fn open_as_array(
        &self,
        search: Option<&str>,
        options: &OpenOptions,
    ) -> Result<OpenResult, HandleError>;

    async fn inventory(&self, search: Option<&str>) -> Result<Vec<InventoryRow>, HandleError>;
}

/// Constructs handles; owns whatever options the handles need.
#[async_trait]
pub trait HandleFactory: Send + Sync {
    type Handle: DataHandle;

    /// Locate the file for `task`.
    ///
    /// An absent file is `Ok` with a handle whose artifact is `None`; `Err`
    /// is reserved for failures to find out.
    async fn resolve(&self, task: Task) -> Result<Self::Handle, HandleError>;
}
