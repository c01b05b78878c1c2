//! Batch Access to Forecast GRIB Files
//!
//! This crate takes a set of model run times and forecast leads, locates
//! the GRIB file for every (run, lead) pair concurrently, and operates on
//! the whole collection at once:
//!
//! - **Resolution**: bounded fan-out over the cross product, with absent
//!   files and failed probes kept apart instead of aborting the batch
//! - **Inventory**: concatenated message listings of every present file
//! - **Download**: bulk, optionally byte-range subset, downloads
//! - **Read**: open every file and merge the arrays into one hypercube per
//!   vertical level
//! - **Latest**: find the most recent run that has been published
//!
//! # Architecture
//!
//! ```text
//! dates, leads
//!      │
//!      ▼
//! normalize_dates / normalize_leads
//!      │
//!      ▼
//! BatchResolver ──► HandleFactory::resolve(task)   (buffer_unordered)
//!      │
//!      ▼
//! Batch { existing, missing, failures }
//!      │
//!      ├─► as_table()
//!      ├─► aggregate_inventory(search)
//!      ├─► download_all(search)
//!      └─► read_as_arrays(search) ──► group by level ──► combine_nested
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grib_batch::{Batch, DateSpec, LeadSpec, OpenOptions};
//!
//! let dates: DateSpec = "2024-01-15/2024-01-16/6h".parse()?;
//! let leads: LeadSpec = "0..=12:3".parse()?;
//! let batch = Batch::resolve(&factory, dates, leads, 50).await?;
//! let datasets = batch
//!     .read_as_arrays(Some(":TMP:2 m above ground"), Some(8), &OpenOptions::default())
//!     .await?;
//! ```
//!
//! The concrete HTTP-backed [`HandleFactory`] lives in the `grib-source`
//! crate; this crate only depends on the traits.

pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod handle;
pub mod hypercube;
pub mod latest;
pub mod normalize;
pub mod resolver;
pub mod task;
pub mod time;

// Re-export commonly used types at crate root
pub use batch::{Batch, BatchSummary, HandleTable, ResolvedItem, TableCell};
pub use config::{BatchConfig, DEFAULT_DOWNLOAD_WORKERS, DEFAULT_RESOLVE_WORKERS};
pub use dataset::{Attrs, Axis, CombineAttrs, DataVariable, GridDataset, LevelCoord};
pub use error::{BatchError, HandleError, MergeError, Result, TaskResolutionFailure};
pub use handle::{
    Artifact, DataHandle, DownloadOptions, HandleFactory, InventoryRow, OpenOptions, OpenResult,
};
pub use hypercube::HypercubeKey;
pub use latest::{find_latest, find_latest_at, DEFAULT_WINDOW};
pub use normalize::{normalize_dates, normalize_leads, DateInput, DateSpec, LeadRange, LeadSpec};
pub use resolver::BatchResolver;
pub use task::Task;
pub use time::{parse_datetime, Frequency};
