//! HTTP-backed GRIB2 file handles.
//!
//! Implements the `grib-batch` collaborator traits for NWP models whose
//! files are published over HTTP with wgrib2-style `.idx` inventories
//! next to them.
//!
//! # Architecture
//!
//! - Model configurations (YAML under `config/models/`) name the model's
//!   products and a priority-ordered list of URL templates
//! - [`SourceFactory`] probes each source with a HEAD request and hands out
//!   a [`SourceHandle`] for the first one that has the file
//! - Handles fetch and cache the index, download whole files or only the
//!   byte ranges of messages matching a search regex, and decode GRIB2
//!   messages into one dataset per vertical level type

pub mod config;
mod decode;
pub mod download;
pub mod handle;
pub mod idx;
pub mod levels;

// Re-exports
pub use config::{find_model_config, load_model_configs, ModelConfig, ModelInfo, SourceConfig};
pub use decode::{assemble_datasets, decode_messages};
pub use download::{DownloadConfig, DownloadManager};
pub use handle::{SourceFactory, SourceHandle, SourceOptions};
pub use idx::{byte_ranges, filter_rows, parse_index, range_header};
pub use levels::{parse_level, Level};
