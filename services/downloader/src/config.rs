//! Configuration loading for the command-line tool.
//!
//! Model sources come from `config/models/*.yaml`; batch tunables from an
//! optional `config/batch.yaml`, with flags applied on top by `main`.

use std::path::Path;

use anyhow::{Context, Result};
use grib_batch::BatchConfig;
use grib_source::{find_model_config, SourceFactory, SourceOptions};
use tracing::{debug, info};

/// Load `batch.yaml` from the configuration directory, or defaults when
/// there is none.
pub fn load_batch_config(config_dir: &Path) -> Result<BatchConfig> {
    let path = config_dir.join("batch.yaml");
    if !path.exists() {
        debug!(path = %path.display(), "No batch config, using defaults");
        return Ok(BatchConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: BatchConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid batch config: {}", path.display()))?;

    info!(
        path = %path.display(),
        resolve_workers = config.resolve_workers,
        download_workers = config.download_workers,
        "Loaded batch configuration"
    );
    Ok(config)
}

/// Build the handle factory for `model`.
pub fn build_factory(
    config_dir: &Path,
    model: &str,
    options: SourceOptions,
) -> Result<SourceFactory> {
    let config = find_model_config(config_dir, model)?;
    SourceFactory::new(config, options)
        .with_context(|| format!("Failed to set up sources for model '{model}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::models::HRRR_YAML;

    #[test]
    fn test_missing_batch_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_batch_config(dir.path()).unwrap(), BatchConfig::default());
    }

    #[test]
    fn test_batch_config_yaml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("batch.yaml"),
            "resolve_workers: 8\nread_workers: 2\nlatest_frequency: 6h\n",
        )
        .unwrap();

        let config = load_batch_config(dir.path()).unwrap();
        assert_eq!(config.resolve_workers, 8);
        assert_eq!(config.download_workers, 20);
        assert_eq!(config.read_workers, Some(2));
        assert_eq!(config.latest_frequency.to_string(), "6h");
    }

    #[test]
    fn test_invalid_batch_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("batch.yaml"), "download_workers: 0\n").unwrap();
        assert!(load_batch_config(dir.path()).is_err());
    }

    #[test]
    fn test_build_factory() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("hrrr.yaml"), HRRR_YAML).unwrap();

        let options = SourceOptions {
            save_dir: dir.path().join("data"),
            ..Default::default()
        };
        let factory = build_factory(dir.path(), "hrrr", options.clone()).unwrap();
        assert_eq!(factory.model(), "hrrr");
        assert_eq!(factory.source_order(), vec!["aws", "nomads"]);

        assert!(build_factory(dir.path(), "gfs", options).is_err());
    }
}
