//! File-backed storage for the CLI.
//!
//! A single JSON document holds tasks, periods and the timer snapshot;
//! settings live in the shared settings.toml. Every operation is a full
//! load-mutate-save so concurrent CLI invocations see a consistent
//! document, which is plenty at personal-task-list scale.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use nextup_core::period::PeriodDefinition;
use nextup_core::settings::{data_dir, AppSettings};
use nextup_core::shuffle::ShuffleSnapshot;
use nextup_core::storage::{OwnerFilter, Storage};
use nextup_core::task::{Owner, Task};
use nextup_core::StorageError;

const STORE_FILE: &str = "tasks.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    periods: Vec<PeriodDefinition>,
    #[serde(default)]
    snapshot: Option<ShuffleSnapshot>,
}

/// JSON-file storage engine.
pub struct FileStore {
    path: PathBuf,
    // Serializes load-mutate-save cycles within one process.
    guard: Mutex<()>,
}

impl FileStore {
    /// Open the store in the default data directory.
    pub fn open() -> Result<Self, StorageError> {
        let dir = data_dir().map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self::open_at(dir.join(STORE_FILE)))
    }

    pub fn open_at(path: PathBuf) -> Self {
        Self { path, guard: Mutex::new(()) }
    }

    fn load(&self) -> Result<StoreDoc, StorageError> {
        if !self.path.exists() {
            return Ok(StoreDoc::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
            id: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn save(&self, doc: &StoreDoc) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(doc).map_err(|e| StorageError::Corrupt {
            id: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, raw).map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn matches(filter: &OwnerFilter, owner: &Owner) -> bool {
        match (filter, owner) {
            (OwnerFilter::All, _) => true,
            (OwnerFilter::Device(id), Owner::Device(o)) => id == o,
            (OwnerFilter::User(id), Owner::User(o)) => id == o,
            _ => false,
        }
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn get_tasks(&self, filter: OwnerFilter) -> Result<Vec<Task>, StorageError> {
        let _guard = self.guard.lock().await;
        let mut tasks: Vec<Task> = self
            .load()?
            .tasks
            .into_iter()
            .filter(|t| Self::matches(&filter, &t.owner))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StorageError> {
        let _guard = self.guard.lock().await;
        Ok(self.load()?.tasks.into_iter().find(|t| t.id == id))
    }

    async fn upsert_task(&self, task: Task) -> Result<(), StorageError> {
        let _guard = self.guard.lock().await;
        let mut doc = self.load()?;
        doc.tasks.retain(|t| t.id != task.id);
        doc.tasks.push(task);
        self.save(&doc)
    }

    async fn delete_task(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.guard.lock().await;
        let mut doc = self.load()?;
        doc.tasks.retain(|t| t.id != id);
        self.save(&doc)
    }

    async fn get_settings(&self) -> Result<AppSettings, StorageError> {
        AppSettings::load().map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn set_settings(&self, settings: AppSettings) -> Result<(), StorageError> {
        settings.save().map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn get_periods(&self) -> Result<Vec<PeriodDefinition>, StorageError> {
        let _guard = self.guard.lock().await;
        let mut periods = self.load()?.periods;
        periods.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(periods)
    }

    async fn upsert_period(&self, period: PeriodDefinition) -> Result<(), StorageError> {
        let _guard = self.guard.lock().await;
        let mut doc = self.load()?;
        doc.periods.retain(|p| p.id != period.id);
        doc.periods.push(period);
        self.save(&doc)
    }

    async fn delete_period(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.guard.lock().await;
        let mut doc = self.load()?;
        doc.periods.retain(|p| p.id != id);
        self.save(&doc)
    }

    async fn get_shuffle_snapshot(&self) -> Result<Option<ShuffleSnapshot>, StorageError> {
        let _guard = self.guard.lock().await;
        Ok(self.load()?.snapshot)
    }

    async fn set_shuffle_snapshot(
        &self,
        snapshot: Option<ShuffleSnapshot>,
    ) -> Result<(), StorageError> {
        let _guard = self.guard.lock().await;
        let mut doc = self.load()?;
        doc.snapshot = snapshot;
        self.save(&doc)
    }
}
