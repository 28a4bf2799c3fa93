//! Storage contract and in-memory reference implementation.
//!
//! The on-disk engine is an external collaborator; the core only
//! depends on this trait. "Not found" is a normal `Ok(None)`, never an
//! error. Implementations must make each call an atomic
//! read-modify-write per id -- the conflict-resolution rule makes write
//! order irrelevant, but a torn update is not recoverable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::period::PeriodDefinition;
use crate::settings::AppSettings;
use crate::shuffle::ShuffleSnapshot;
use crate::task::{Owner, Task};

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub enum OwnerFilter {
    #[default]
    All,
    Device(String),
    User(String),
}

impl OwnerFilter {
    fn matches(&self, owner: &Owner) -> bool {
        match (self, owner) {
            (OwnerFilter::All, _) => true,
            (OwnerFilter::Device(id), Owner::Device(o)) => id == o,
            (OwnerFilter::User(id), Owner::User(o)) => id == o,
            _ => false,
        }
    }
}

/// Async CRUD/query contract consumed by the selector, coordinator and
/// sync engine.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_tasks(&self, filter: OwnerFilter) -> Result<Vec<Task>, StorageError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, StorageError>;
    async fn upsert_task(&self, task: Task) -> Result<(), StorageError>;
    async fn delete_task(&self, id: &str) -> Result<(), StorageError>;

    async fn get_settings(&self) -> Result<AppSettings, StorageError>;
    async fn set_settings(&self, settings: AppSettings) -> Result<(), StorageError>;

    async fn get_periods(&self) -> Result<Vec<PeriodDefinition>, StorageError>;
    async fn upsert_period(&self, period: PeriodDefinition) -> Result<(), StorageError>;
    async fn delete_period(&self, id: &str) -> Result<(), StorageError>;

    async fn get_shuffle_snapshot(&self) -> Result<Option<ShuffleSnapshot>, StorageError>;
    async fn set_shuffle_snapshot(
        &self,
        snapshot: Option<ShuffleSnapshot>,
    ) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryInner {
    tasks: HashMap<String, Task>,
    periods: HashMap<String, PeriodDefinition>,
    settings: Option<AppSettings>,
    snapshot: Option<ShuffleSnapshot>,
}

/// In-memory store. Reference implementation for tests and the CLI's
/// session state; a real deployment plugs a database behind the same
/// trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_tasks(&self, filter: OwnerFilter) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> =
            inner.tasks.values().filter(|t| filter.matches(&t.owner)).cloned().collect();
        // Stable listing order: oldest first.
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StorageError> {
        Ok(self.inner.lock().await.tasks.get(id).cloned())
    }

    async fn upsert_task(&self, task: Task) -> Result<(), StorageError> {
        self.inner.lock().await.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), StorageError> {
        self.inner.lock().await.tasks.remove(id);
        Ok(())
    }

    async fn get_settings(&self) -> Result<AppSettings, StorageError> {
        Ok(self.inner.lock().await.settings.clone().unwrap_or_default())
    }

    async fn set_settings(&self, settings: AppSettings) -> Result<(), StorageError> {
        self.inner.lock().await.settings = Some(settings);
        Ok(())
    }

    async fn get_periods(&self) -> Result<Vec<PeriodDefinition>, StorageError> {
        let inner = self.inner.lock().await;
        let mut periods: Vec<PeriodDefinition> = inner.periods.values().cloned().collect();
        periods.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(periods)
    }

    async fn upsert_period(&self, period: PeriodDefinition) -> Result<(), StorageError> {
        self.inner.lock().await.periods.insert(period.id.clone(), period);
        Ok(())
    }

    async fn delete_period(&self, id: &str) -> Result<(), StorageError> {
        self.inner.lock().await.periods.remove(id);
        Ok(())
    }

    async fn get_shuffle_snapshot(&self) -> Result<Option<ShuffleSnapshot>, StorageError> {
        Ok(self.inner.lock().await.snapshot.clone())
    }

    async fn set_shuffle_snapshot(
        &self,
        snapshot: Option<ShuffleSnapshot>,
    ) -> Result<(), StorageError> {
        self.inner.lock().await.snapshot = snapshot;
        Ok(())
    }
}
