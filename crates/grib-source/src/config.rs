//! Model source configuration.
//!
//! Loads model configurations from YAML files in config/models/

use std::path::Path;

use anyhow::{bail, Context, Result};
use grib_batch::Task;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Root configuration loaded from a model YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model: ModelInfo,
    /// Product used when the caller does not pick one
    pub product: String,
    /// Products the model publishes; empty means any
    #[serde(default)]
    pub products: Vec<String>,
    /// Sources in priority order
    pub sources: Vec<SourceConfig>,
}

/// Basic model identification.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One place a model's files are published.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// URL template, e.g. "https://host/hrrr.{date}/conus/hrrr.t{cycle:02}z.wrf{product}f{forecast:02}.grib2"
    pub url: String,
    #[serde(default = "default_index_suffix")]
    pub index_suffix: String,
}

fn default_index_suffix() -> String {
    ".idx".to_string()
}

impl SourceConfig {
    /// Fill the URL template for a task.
    ///
    /// Placeholders: `{date}` (YYYYMMDD), `{cycle:02}`, `{forecast}`,
    /// `{forecast:02}`, `{forecast:03}`, `{product}`, `{model}`.
    pub fn render(&self, task: &Task, product: &str, model: &str) -> String {
        self.url
            .replace("{date}", &task.date.format("%Y%m%d").to_string())
            .replace("{cycle:02}", &task.date.format("%H").to_string())
            .replace("{forecast:03}", &format!("{:03}", task.lead))
            .replace("{forecast:02}", &format!("{:02}", task.lead))
            .replace("{forecast}", &task.lead.to_string())
            .replace("{product}", product)
            .replace("{model}", model)
    }

    /// URL of the inventory file that sits next to `file_url`.
    pub fn index_url(&self, file_url: &str) -> String {
        format!("{}{}", file_url, self.index_suffix)
    }
}

impl ModelConfig {
    /// Load a model configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(model = %config.model.id, path = %path.display(), "Loaded model config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ModelConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("model '{}' has no sources", self.model.id);
        }
        self.check_product(&self.product)
    }

    /// Ensure `product` is one the model publishes.
    pub fn check_product(&self, product: &str) -> Result<()> {
        if !self.products.is_empty() && !self.products.iter().any(|p| p == product) {
            bail!(
                "product '{}' is not available for model '{}' (expected one of {:?})",
                product,
                self.model.id,
                self.products
            );
        }
        Ok(())
    }
}

/// Load all enabled model configurations from a directory.
pub fn load_model_configs(config_dir: &Path) -> Result<Vec<ModelConfig>> {
    let models_dir = config_dir.join("models");

    if !models_dir.exists() {
        warn!(path = %models_dir.display(), "Models config directory not found");
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();

    for entry in std::fs::read_dir(&models_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().map_or(false, |ext| ext == "yaml" || ext == "yml") {
            match ModelConfig::load(&path) {
                Ok(config) => {
                    if config.model.enabled {
                        info!(
                            model = %config.model.id,
                            name = %config.model.name,
                            "Loaded model configuration"
                        );
                        configs.push(config);
                    } else {
                        debug!(model = %config.model.id, "Skipping disabled model");
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load model config");
                }
            }
        }
    }

    configs.sort_by(|a, b| a.model.id.cmp(&b.model.id));
    info!(count = configs.len(), "Loaded model configurations");
    Ok(configs)
}

/// Load the enabled configuration for one model id.
pub fn find_model_config(config_dir: &Path, model: &str) -> Result<ModelConfig> {
    load_model_configs(config_dir)?
        .into_iter()
        .find(|c| c.model.id == model)
        .with_context(|| {
            format!(
                "No enabled model '{}' under {}",
                model,
                config_dir.join("models").display()
            )
        })
}
