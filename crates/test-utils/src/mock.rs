//! Scripted [`HandleFactory`] for exercising batch operations without a
//! network.
//!
//! Each (date, lead) pair can be scripted to resolve to a present file, an
//! absent file, or a construction failure. Every call sleeps for a random
//! interval so completion order differs from submission order.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grib_batch::{
    Artifact, Attrs, DataHandle, DownloadOptions, HandleError, HandleFactory, InventoryRow,
    LevelCoord, OpenOptions, OpenResult, Task,
};
use rand::Rng;
use serde_json::json;

use crate::generators::create_task_dataset;

/// Scripted outcome for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Present,
    Absent,
    Fail,
}

type TaskKey = (DateTime<Utc>, u32);

/// A variable the mock files contain, with its level and index text.
#[derive(Debug, Clone)]
pub struct MockVariable {
    pub name: String,
    pub level: LevelCoord,
    pub level_text: String,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    downloads: AtomicUsize,
    opens: AtomicUsize,
}

impl Counters {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Script {
    default: Outcome,
    by_task: HashMap<TaskKey, Outcome>,
    by_lead: HashMap<u32, Outcome>,
    failing_downloads: HashSet<TaskKey>,
    failing_opens: HashSet<TaskKey>,
    failing_inventories: HashSet<TaskKey>,
    variables: Vec<MockVariable>,
    points: usize,
    conflicting_array_attr: bool,
    max_latency: Duration,
}

impl Script {
    fn outcome(&self, task: &Task) -> Outcome {
        self.by_task
            .get(&(task.date, task.lead))
            .or_else(|| self.by_lead.get(&task.lead))
            .copied()
            .unwrap_or(self.default)
    }

    async fn pause(&self) {
        let max_ms = self.max_latency.as_millis() as u64;
        if max_ms == 0 {
            tokio::task::yield_now().await;
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// A [`HandleFactory`] driven by a script instead of remote sources.
///
/// By default every task is present and files hold one variable, `TMP` on
/// `heightAboveGround` 2, over four points.
#[derive(Debug, Clone)]
pub struct MockFactory {
    script: Arc<Script>,
    counters: Arc<Counters>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script {
                default: Outcome::Present,
                by_task: HashMap::new(),
                by_lead: HashMap::new(),
                failing_downloads: HashSet::new(),
                failing_opens: HashSet::new(),
                failing_inventories: HashSet::new(),
                variables: Vec::new(),
                points: 4,
                conflicting_array_attr: false,
                max_latency: Duration::ZERO,
            }),
            counters: Arc::new(Counters::default()),
        }
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("configure the mock before sharing it")
    }

    /// Sleep up to `max` (uniformly random) in every call.
    pub fn with_latency(mut self, max: Duration) -> Self {
        self.script_mut().max_latency = max;
        self
    }

    pub fn with_default(mut self, outcome: Outcome) -> Self {
        self.script_mut().default = outcome;
        self
    }

    pub fn with_outcome(mut self, date: DateTime<Utc>, lead: u32, outcome: Outcome) -> Self {
        self.script_mut().by_task.insert((date, lead), outcome);
        self
    }

    /// Script every task at `lead`; per-task outcomes still win.
    pub fn with_lead_outcome(mut self, lead: u32, outcome: Outcome) -> Self {
        self.script_mut().by_lead.insert(lead, outcome);
        self
    }

    pub fn with_failing_download(mut self, date: DateTime<Utc>, lead: u32) -> Self {
        self.script_mut().failing_downloads.insert((date, lead));
        self
    }

    pub fn with_failing_open(mut self, date: DateTime<Utc>, lead: u32) -> Self {
        self.script_mut().failing_opens.insert((date, lead));
        self
    }

    pub fn with_failing_inventory(mut self, date: DateTime<Utc>, lead: u32) -> Self {
        self.script_mut().failing_inventories.insert((date, lead));
        self
    }

    /// Add a variable; the first call replaces the default `TMP` variable.
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        level: LevelCoord,
        level_text: impl Into<String>,
    ) -> Self {
        self.script_mut().variables.push(MockVariable {
            name: name.into(),
            level,
            level_text: level_text.into(),
        });
        self
    }

    pub fn with_points(mut self, points: usize) -> Self {
        self.script_mut().points = points;
        self
    }

    /// Give each file a `bounds` array attribute whose length depends on
    /// the lead, so conflict-dropping combines cannot compare them.
    pub fn with_conflicting_array_attr(mut self) -> Self {
        self.script_mut().conflicting_array_attr = true;
        self
    }

    /// Total `resolve` calls.
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.counters.downloads.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn variables(&self) -> Vec<MockVariable> {
        if self.script.variables.is_empty() {
            vec![MockVariable {
                name: "TMP".to_string(),
                level: LevelCoord::single("heightAboveGround", 2.0),
                level_text: "2 m above ground".to_string(),
            }]
        } else {
            self.script.variables.clone()
        }
    }
}

#[async_trait]
impl HandleFactory for MockFactory {
    type Handle = MockHandle;

    async fn resolve(&self, task: Task) -> Result<MockHandle, HandleError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.counters.enter();
        self.script.pause().await;
        self.counters.leave();

        let artifact = match self.script.outcome(&task) {
            Outcome::Fail => {
                return Err(HandleError::Http(format!("scripted failure for {task}")));
            }
            Outcome::Absent => None,
            Outcome::Present => Some(Artifact {
                source: "mock".to_string(),
                location: format!(
                    "mock://{}/f{:02}.grib2",
                    task.date.format("%Y%m%d%H"),
                    task.lead
                ),
            }),
        };

        Ok(MockHandle {
            task,
            artifact,
            variables: self.variables(),
            factory: self.clone(),
        })
    }
}

/// Handle produced by [`MockFactory`].
#[derive(Debug)]
pub struct MockHandle {
    task: Task,
    artifact: Option<Artifact>,
    variables: Vec<MockVariable>,
    factory: MockFactory,
}

impl MockHandle {
    pub fn task(&self) -> &Task {
        &self.task
    }

    fn key(&self) -> TaskKey {
        (self.task.date, self.task.lead)
    }

    fn require_artifact(&self) -> Result<&Artifact, HandleError> {
        self.artifact
            .as_ref()
            .ok_or_else(|| HandleError::NotAvailable(self.task.to_string()))
    }

    fn matching(&self, search: Option<&str>) -> Vec<&MockVariable> {
        self.variables
            .iter()
            .filter(|v| match search {
                Some(pattern) => format!(":{}:{}:", v.name, v.level_text).contains(pattern),
                None => true,
            })
            .collect()
    }

    fn forecast_text(&self) -> String {
        if self.task.lead == 0 {
            "anl".to_string()
        } else {
            format!("{} hour fcst", self.task.lead)
        }
    }
}

#[async_trait]
impl DataHandle for MockHandle {
    fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    async fn download(
        &self,
        _search: Option<&str>,
        options: &DownloadOptions,
    ) -> Result<PathBuf, HandleError> {
        self.require_artifact()?;
        let script = &self.factory.script;
        script.pause().await;

        if script.failing_downloads.contains(&self.key()) {
            return Err(HandleError::Http(format!("scripted download failure for {}", self.task)));
        }

        let dir = options
            .save_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(self.task.date.format("%Y%m%d").to_string());
        let path = dir.join(format!(
            "mock.t{}z.f{:02}.grib2",
            self.task.date.format("%H"),
            self.task.lead
        ));
        if options.save_dir.is_some() {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, self.task.to_string()).await?;
        }

        self.factory.counters.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }

    async fn open_as_array(
        &self,
        search: Option<&str>,
        _options: &OpenOptions,
    ) -> Result<OpenResult, HandleError> {
        self.require_artifact()?;
        let script = &self.factory.script;
        script.pause().await;

        if script.failing_opens.contains(&self.key()) {
            return Err(HandleError::Decode(format!("scripted open failure for {}", self.task)));
        }

        let mut attrs = Attrs::new();
        attrs.insert("GRIB_centre".to_string(), json!("kwbc"));
        attrs.insert("history".to_string(), json!(format!("opened {}", self.task)));
        if script.conflicting_array_attr {
            attrs.insert(
                "bounds".to_string(),
                json!((0..=self.task.lead).collect::<Vec<_>>()),
            );
        }

        let mut datasets = self
            .matching(search)
            .into_iter()
            .map(|v| {
                let ds = create_task_dataset(
                    &self.task,
                    &v.name,
                    &v.level,
                    script.points,
                    Attrs::new(),
                );
                attrs
                    .iter()
                    .fold(ds, |ds, (k, value)| ds.with_attr(k.clone(), value.clone()))
            })
            .collect::<Vec<_>>();

        self.factory.counters.opens.fetch_add(1, Ordering::SeqCst);
        match datasets.len() {
            0 => Err(HandleError::InvalidSearch(format!(
                "no messages match {search:?}"
            ))),
            1 => Ok(OpenResult::Single(datasets.remove(0))),
            _ => Ok(OpenResult::Multiple(datasets)),
        }
    }

    async fn inventory(&self, search: Option<&str>) -> Result<Vec<InventoryRow>, HandleError> {
        self.require_artifact()?;
        let script = &self.factory.script;
        script.pause().await;

        if script.failing_inventories.contains(&self.key()) {
            return Err(HandleError::Index(format!("scripted index failure for {}", self.task)));
        }

        let forecast_time = self.forecast_text();
        let rows = self
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let start_byte = i as u64 * 1000;
                InventoryRow {
                    message: i as u32 + 1,
                    start_byte,
                    end_byte: (i + 1 < self.variables.len()).then(|| start_byte + 999),
                    reference_time: self.task.date,
                    valid_time: self.task.valid_time(),
                    variable: v.name.clone(),
                    level: v.level_text.clone(),
                    forecast_time: forecast_time.clone(),
                    search_this: format!(":{}:{}:{}", v.name, v.level_text, forecast_time),
                    file: None,
                }
            })
            .filter(|row| search.map_or(true, |p| row.search_this.contains(p)))
            .collect();
        Ok(rows)
    }
}
