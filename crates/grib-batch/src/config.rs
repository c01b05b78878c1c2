//! Worker ceilings and latest-run defaults.

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::latest::DEFAULT_WINDOW;
use crate::time::Frequency;

pub const DEFAULT_RESOLVE_WORKERS: usize = 50;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 20;

/// Tunables shared by the batch operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Concurrent handle constructions during resolution
    pub resolve_workers: usize,
    /// Concurrent downloads
    pub download_workers: usize,
    /// Concurrent opens; `None` reads files one at a time
    pub read_workers: Option<usize>,
    pub latest_window: usize,
    pub latest_frequency: Frequency,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            resolve_workers: DEFAULT_RESOLVE_WORKERS,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            read_workers: None,
            latest_window: DEFAULT_WINDOW,
            latest_frequency: Frequency::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolve_workers == 0 {
            return Err(BatchError::InvalidInput(
                "resolve_workers must be at least 1".to_string(),
            ));
        }
        if self.download_workers == 0 {
            return Err(BatchError::InvalidInput(
                "download_workers must be at least 1".to_string(),
            ));
        }
        if self.read_workers == Some(0) {
            return Err(BatchError::InvalidInput(
                "read_workers must be at least 1 when set".to_string(),
            ));
        }
        if self.latest_window == 0 {
            return Err(BatchError::InvalidInput(
                "latest_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
