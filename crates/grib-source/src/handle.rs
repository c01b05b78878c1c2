//! Model-backed file handles.
//!
//! [`SourceFactory`] probes each configured source in priority order for a
//! task's file; the first source that has it becomes the handle's artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use grib_batch::{
    Artifact, Attrs, DataHandle, DownloadOptions, HandleError, HandleFactory, InventoryRow,
    OpenOptions, OpenResult, Task,
};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::config::ModelConfig;
use crate::decode::{assemble_datasets, decode_messages};
use crate::download::{DownloadConfig, DownloadManager};
use crate::idx::{byte_ranges, filter_rows, parse_index, range_header};

/// Settings shared by every handle a factory creates.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Product to fetch; the model's default when `None`
    pub product: Option<String>,
    /// Restrict and reorder sources by name; all sources when empty
    pub priority: Vec<String>,
    /// Root directory for downloads
    pub save_dir: PathBuf,
    pub download: DownloadConfig,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            product: None,
            priority: Vec::new(),
            save_dir: std::env::temp_dir().join("grib-batch"),
            download: DownloadConfig::default(),
        }
    }
}

/// Creates [`SourceHandle`]s for one model and product.
#[derive(Debug, Clone)]
pub struct SourceFactory {
    config: Arc<ModelConfig>,
    product: String,
    priority: Vec<String>,
    save_dir: PathBuf,
    downloads: Arc<DownloadManager>,
}

impl SourceFactory {
    pub fn new(config: ModelConfig, options: SourceOptions) -> Result<Self, HandleError> {
        let product = options.product.unwrap_or_else(|| config.product.clone());
        config
            .check_product(&product)
            .map_err(|e| HandleError::Other(e.to_string()))?;

        for name in &options.priority {
            if !config.sources.iter().any(|s| &s.name == name) {
                return Err(HandleError::Other(format!(
                    "model '{}' has no source named '{}'",
                    config.model.id, name
                )));
            }
        }

        let downloads = DownloadManager::new(options.download)?;
        info!(
            model = %config.model.id,
            product = %product,
            save_dir = %options.save_dir.display(),
            "Created source factory"
        );

        Ok(Self {
            config: Arc::new(config),
            product,
            priority: options.priority,
            save_dir: options.save_dir,
            downloads: Arc::new(downloads),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model.id
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Source names in the order they are probed.
    pub fn source_order(&self) -> Vec<&str> {
        if self.priority.is_empty() {
            self.config.sources.iter().map(|s| s.name.as_str()).collect()
        } else {
            self.priority.iter().map(String::as_str).collect()
        }
    }

    fn handle(&self, task: Task, found: Option<(Artifact, String)>) -> SourceHandle {
        let (artifact, index_url) = match found {
            Some((artifact, index_url)) => (Some(artifact), Some(index_url)),
            None => (None, None),
        };
        SourceHandle {
            task,
            artifact,
            index_url,
            model: self.config.model.id.clone(),
            product: self.product.clone(),
            save_dir: self.save_dir.clone(),
            downloads: Arc::clone(&self.downloads),
            index: OnceCell::new(),
        }
    }
}

#[async_trait]
impl HandleFactory for SourceFactory {
    type Handle = SourceHandle;

    #[instrument(skip_all, fields(model = %self.config.model.id, task = %task))]
    async fn resolve(&self, task: Task) -> Result<SourceHandle, HandleError> {
        let mut last_error = None;
        let mut answered = false;

        for name in self.source_order() {
            let Some(source) = self.config.sources.iter().find(|s| s.name == name) else {
                continue;
            };
            let url = source.render(&task, &self.product, &self.config.model.id);

            match self.downloads.probe(&url).await {
                Ok(true) => {
                    debug!(source = %source.name, url = %url, "Found file");
                    let index_url = source.index_url(&url);
                    let artifact = Artifact {
                        source: source.name.clone(),
                        location: url,
                    };
                    return Ok(self.handle(task, Some((artifact, index_url))));
                }
                Ok(false) => {
                    answered = true;
                    debug!(source = %source.name, url = %url, "File not published");
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "Source probe failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(self.handle(task, None)),
        }
    }
}

/// One task's file on a model source.
#[derive(Debug)]
pub struct SourceHandle {
    task: Task,
    artifact: Option<Artifact>,
    index_url: Option<String>,
    model: String,
    product: String,
    save_dir: PathBuf,
    downloads: Arc<DownloadManager>,
    index: OnceCell<Vec<InventoryRow>>,
}

impl SourceHandle {
    pub fn task(&self) -> &Task {
        &self.task
    }

    fn require_artifact(&self) -> Result<&Artifact, HandleError> {
        self.artifact
            .as_ref()
            .ok_or_else(|| HandleError::NotAvailable(self.task.to_string()))
    }

    /// Where the file (or the subset matching `search`) is stored locally:
    /// `<save_dir>/<model>/<YYYYMMDD>/<file name>`.
    pub fn local_path(&self, search: Option<&str>, save_dir: Option<&Path>) -> Option<PathBuf> {
        let artifact = self.artifact.as_ref()?;
        let file_name = artifact
            .location
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("file.grib2");
        let file_name = match search {
            Some(pattern) => format!("subset_{:08x}__{}", search_hash(pattern), file_name),
            None => file_name.to_string(),
        };

        Some(
            save_dir
                .unwrap_or(&self.save_dir)
                .join(&self.model)
                .join(self.task.date.format("%Y%m%d").to_string())
                .join(file_name),
        )
    }

    /// Full parsed index, fetched once per handle.
    async fn full_index(&self) -> Result<&[InventoryRow], HandleError> {
        let location = &self.require_artifact()?.location;
        let index_url = self
            .index_url
            .as_deref()
            .ok_or_else(|| HandleError::NotAvailable(self.task.to_string()))?;

        let rows = self
            .index
            .get_or_try_init(|| async {
                let text = self.downloads.fetch_text(index_url).await?;
                let mut rows = parse_index(&text)?;
                for row in &mut rows {
                    row.file = Some(location.clone());
                }
                debug!(url = %index_url, rows = rows.len(), "Fetched index");
                Ok::<_, HandleError>(rows)
            })
            .await?;
        Ok(rows)
    }

    fn dataset_attrs(&self, artifact: &Artifact, path: &Path) -> Attrs {
        let mut attrs = Attrs::new();
        attrs.insert("model".to_string(), json!(self.model));
        attrs.insert("product".to_string(), json!(self.product));
        attrs.insert("source".to_string(), json!(artifact.source));
        attrs.insert("url".to_string(), json!(artifact.location));
        attrs.insert("local_grib".to_string(), json!(path.display().to_string()));
        attrs
    }
}

/// CRC-32 of the search pattern; fixed across builds so cached subsets
/// keep matching.
fn search_hash(pattern: &str) -> u32 {
    crc32fast::hash(pattern.as_bytes())
}

#[async_trait]
impl DataHandle for SourceHandle {
    fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    async fn download(
        &self,
        search: Option<&str>,
        options: &DownloadOptions,
    ) -> Result<PathBuf, HandleError> {
        let artifact = self.require_artifact()?;
        let path = self
            .local_path(search, options.save_dir.as_deref())
            .ok_or_else(|| HandleError::NotAvailable(self.task.to_string()))?;

        if !options.overwrite && tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "Using existing local file");
            return Ok(path);
        }

        let ranges = match search {
            Some(pattern) => {
                let rows = filter_rows(self.full_index().await?.to_vec(), Some(pattern))?;
                if rows.is_empty() {
                    return Err(HandleError::InvalidSearch(format!(
                        "'{pattern}' matched no messages in {artifact}"
                    )));
                }
                let ranges = byte_ranges(&rows);
                debug!(messages = rows.len(), range = %range_header(&ranges), "Downloading subset");
                ranges
            }
            None => Vec::new(),
        };

        self.downloads
            .download(&artifact.location, &ranges, &path)
            .await
    }

    async fn open_as_array(
        &self,
        search: Option<&str>,
        options: &OpenOptions,
    ) -> Result<OpenResult, HandleError> {
        let artifact = self.require_artifact()?;
        let path = self
            .download(
                search,
                &DownloadOptions {
                    overwrite: options.overwrite,
                    save_dir: None,
                },
            )
            .await?;
        let rows = self.inventory(search).await?;

        let decode_path = path.clone();
        let messages = tokio::task::spawn_blocking(move || decode_messages(&decode_path))
            .await
            .map_err(|e| HandleError::Other(format!("decode task failed: {e}")))??;

        let result = assemble_datasets(
            &self.task,
            &rows,
            messages,
            &self.dataset_attrs(artifact, &path),
        )?;

        if options.remove_download {
            tokio::fs::remove_file(&path).await?;
            debug!(path = %path.display(), "Removed local file");
        }
        Ok(result)
    }

    async fn inventory(&self, search: Option<&str>) -> Result<Vec<InventoryRow>, HandleError> {
        self.require_artifact()?;
        filter_rows(self.full_index().await?.to_vec(), search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_utils::{idx, models::HRRR_YAML, run_time};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FILE_PATH: &str = "/aws/hrrr.20240115/hrrr.t12z.wrfsfcf06.grib2";

    /// Two sources ("aws" then "nomads") served by one mock server.
    fn config_for(server: &MockServer) -> ModelConfig {
        let yaml = format!(
            r#"
model:
  id: hrrr
  name: HRRR
product: sfc
products: [sfc, prs]
sources:
  - name: aws
    url: "{uri}/aws/hrrr.{{date}}/hrrr.t{{cycle:02}}z.wrf{{product}}f{{forecast:02}}.grib2"
  - name: nomads
    url: "{uri}/nomads/hrrr.{{date}}/hrrr.t{{cycle:02}}z.wrf{{product}}f{{forecast:02}}.grib2"
"#,
            uri = server.uri()
        );
        ModelConfig::from_yaml(&yaml).unwrap()
    }

    fn options(save_dir: &Path) -> SourceOptions {
        SourceOptions {
            save_dir: save_dir.to_path_buf(),
            download: DownloadConfig {
                max_retries: 0,
                initial_retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn serve_present(server: &MockServer, file_path: &str) {
        Mock::given(method("HEAD"))
            .and(path(file_path))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[test]
    fn test_factory_rejects_unknown_product_and_source() {
        let config = ModelConfig::from_yaml(HRRR_YAML).unwrap();
        let err = SourceFactory::new(
            config.clone(),
            SourceOptions {
                product: Some("pgrb2".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("pgrb2"));

        let err = SourceFactory::new(
            config.clone(),
            SourceOptions {
                priority: vec!["google".to_string()],
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("google"));

        let factory = SourceFactory::new(
            config,
            SourceOptions {
                priority: vec!["nomads".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(factory.source_order(), vec!["nomads"]);
        assert_eq!(factory.product(), "sfc");
    }

    #[tokio::test]
    async fn test_resolve_uses_first_source_with_file() {
        let server = MockServer::start().await;
        serve_present(&server, "/nomads/hrrr.20240115/hrrr.t12z.wrfsfcf06.grib2").await;

        let dir = tempfile::tempdir().unwrap();
        let factory = SourceFactory::new(config_for(&server), options(dir.path())).unwrap();
        let handle = factory.resolve(Task::new(run_time(12), 6)).await.unwrap();

        let artifact = handle.artifact().unwrap();
        assert_eq!(artifact.source, "nomads");
        assert!(artifact.location.ends_with("/nomads/hrrr.20240115/hrrr.t12z.wrfsfcf06.grib2"));
        assert_eq!(handle.task().lead, 6);
    }

    #[tokio::test]
    async fn test_resolve_absent_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let factory = SourceFactory::new(config_for(&server), options(dir.path())).unwrap();

        let handle = factory.resolve(Task::new(run_time(12), 48)).await.unwrap();
        assert!(!handle.exists());
        assert!(matches!(
            handle.inventory(None).await,
            Err(HandleError::NotAvailable(_))
        ));
        assert!(handle.local_path(None, None).is_none());
    }

    #[tokio::test]
    async fn test_resolve_errors_when_no_source_answers() {
        let config = ModelConfig::from_yaml(
            &HRRR_YAML.replace("https://noaa-hrrr-bdp-pds.s3.amazonaws.com", "http://127.0.0.1:1")
                .replace("https://nomads.ncep.noaa.gov", "http://127.0.0.1:1"),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let factory = SourceFactory::new(config, options(dir.path())).unwrap();

        let err = factory.resolve(Task::new(run_time(0), 0)).await.unwrap_err();
        assert!(matches!(err, HandleError::Http(_)));
    }

    #[tokio::test]
    async fn test_inventory_and_subset_download() {
        let server = MockServer::start().await;
        serve_present(&server, FILE_PATH).await;
        Mock::given(method("GET"))
            .and(path(format!("{FILE_PATH}.idx")))
            .respond_with(ResponseTemplate::new(200).set_body_string(idx::HRRR_SFC_F06))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"subset".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let factory = SourceFactory::new(config_for(&server), options(dir.path())).unwrap();
        let handle = factory.resolve(Task::new(run_time(12), 6)).await.unwrap();

        let rows = handle.inventory(Some(":TMP:")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].file.as_deref().unwrap().ends_with("wrfsfcf06.grib2"));

        let path = handle
            .download(Some(":TMP:2 m above ground:"), &DownloadOptions::default())
            .await
            .unwrap();
        assert!(path.starts_with(dir.path().join("hrrr").join("20240115")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("subset_"));
        assert!(name.ends_with("__hrrr.t12z.wrfsfcf06.grib2"));
        assert_eq!(std::fs::read(&path).unwrap(), b"subset");

        let err = handle
            .download(Some(":NOPE:"), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandleError::InvalidSearch(_)));
    }

    #[tokio::test]
    async fn test_download_reuses_existing_file() {
        let server = MockServer::start().await;
        serve_present(&server, FILE_PATH).await;

        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let factory = SourceFactory::new(config_for(&server), options(dir.path())).unwrap();
        let handle = factory.resolve(Task::new(run_time(12), 6)).await.unwrap();

        let expected = handle.local_path(None, Some(other.path())).unwrap();
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, b"cached").unwrap();

        let path = handle
            .download(
                None,
                &DownloadOptions {
                    overwrite: false,
                    save_dir: Some(other.path().to_path_buf()),
                },
            )
            .await
            .unwrap();
        assert_eq!(path, expected);
        assert_eq!(std::fs::read(&path).unwrap(), b"cached");
    }

    #[test]
    fn test_search_hash_is_stable_per_pattern() {
        assert_eq!(search_hash(":TMP:"), 0x6d29_55ba);
        assert_eq!(format!("{:08x}", search_hash(":TMP:")), "6d2955ba");
        assert_ne!(search_hash(":TMP:"), search_hash(":UGRD:"));
    }
}
