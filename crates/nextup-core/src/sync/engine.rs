//! Sync engine: records local mutations, applies remote ones.
//!
//! The engine is transport-agnostic; the peer link feeds it decoded
//! envelopes and drains its outbound queue. Loop suppression is
//! two-fold: applying a remote envelope never enqueues (only local
//! mutation paths do), and envelopes carrying our own device id are
//! dropped on receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bus::EventBus;
use crate::error::{Result, SyncError};
use crate::events::Event;
use crate::period::PeriodDefinition;
use crate::storage::{OwnerFilter, Storage};
use crate::shuffle::ShuffleSnapshot;
use crate::sync::conflict::{
    merge_tombstones, resolve_period, resolve_task, MergeDecision, Tombstone,
};
use crate::sync::envelope::{
    EventEnvelope, PayloadKind, TaskStartedPayload, SETTINGS_ENTITY_ID,
};
use crate::sync::manifest::{build_manifest, diff_manifests, EntityRef, ManifestEntry};
use crate::sync::queue::OutboundQueue;
use crate::settings::AppSettings;
use crate::task::{lifecycle, Task};

const QUEUE_FILE: &str = "sync_queue.json";
const TOMBSTONE_FILE: &str = "tombstones.json";

/// Snapshot of the sync layer's health, for status surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub in_progress: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TombstoneSets {
    tasks: HashMap<String, Tombstone>,
    periods: HashMap<String, Tombstone>,
}

struct TombstoneStore {
    sets: TombstoneSets,
    file: PathBuf,
}

impl TombstoneStore {
    fn open(file: PathBuf) -> Result<Self, std::io::Error> {
        let sets = if file.exists() {
            serde_json::from_str(&std::fs::read_to_string(&file)?)?
        } else {
            TombstoneSets::default()
        };
        Ok(Self { sets, file })
    }

    fn persist(&self) -> Result<(), std::io::Error> {
        std::fs::write(&self.file, serde_json::to_string_pretty(&self.sets)?)
    }
}

/// Per-device replication state machine.
pub struct SyncEngine {
    storage: Arc<dyn Storage>,
    bus: EventBus,
    device_id: String,
    user_id: Option<String>,
    queue: Mutex<OutboundQueue>,
    tombstones: Mutex<TombstoneStore>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
    in_progress: AtomicBool,
}

impl SyncEngine {
    /// `dir` holds the queue and tombstone files; typically the
    /// application data directory.
    pub fn new(
        storage: Arc<dyn Storage>,
        bus: EventBus,
        device_id: impl Into<String>,
        user_id: Option<String>,
        dir: &Path,
    ) -> Result<Self> {
        let queue = OutboundQueue::open(dir.join(QUEUE_FILE))?;
        let tombstones = TombstoneStore::open(dir.join(TOMBSTONE_FILE))?;
        Ok(Self {
            storage,
            bus,
            device_id: device_id.into(),
            user_id,
            queue: Mutex::new(queue),
            tombstones: Mutex::new(tombstones),
            last_sync_at: Mutex::new(None),
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Record a locally produced event for replication. Inbound applies
    /// never pass through here.
    pub async fn record_local(&self, event: &Event, now: DateTime<Utc>) -> Result<()> {
        let envelope = match event {
            Event::TaskUpserted { task } => {
                Some(EventEnvelope::for_task(task, &self.device_id, self.user_id())?)
            }
            Event::SettingsUpdated { settings } => {
                Some(EventEnvelope::for_settings(settings, &self.device_id, self.user_id())?)
            }
            Event::NotificationBroadcasted { title, body, at } => Some(
                EventEnvelope::for_notification(title, body, &self.device_id, self.user_id(), *at)?,
            ),
            Event::TaskStarted { task_id, origin, expires_at, at } => {
                let payload = TaskStartedPayload {
                    task_id: task_id.clone(),
                    origin: *origin,
                    expires_at: *expires_at,
                };
                Some(EventEnvelope::for_task_started(
                    &payload,
                    &self.device_id,
                    self.user_id(),
                    *at,
                )?)
            }
            Event::ShuffleStateChanged { snapshot, at } => Some(EventEnvelope::for_shuffle_state(
                snapshot.as_ref(),
                &self.device_id,
                self.user_id(),
                *at,
            )?),
            // Deletions go through delete_task/delete_period so the
            // tombstone version is minted consistently.
            Event::TaskDeleted { .. } => None,
        };
        if let Some(envelope) = envelope {
            let mut queue = self.queue.lock().await;
            queue.enqueue(envelope, now);
            queue.persist()?;
        }
        Ok(())
    }

    /// Delete a task: remove the record, mint a tombstone one version
    /// past it, replicate and announce.
    pub async fn delete_task(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(task) = self.storage.get_task(id).await? else {
            return Ok(false);
        };
        self.storage.delete_task(id).await?;
        let tombstone =
            Tombstone { id: id.to_string(), event_version: task.event_version + 1, deleted_at: now };
        {
            let mut store = self.tombstones.lock().await;
            let existing = store.sets.tasks.remove(id);
            store.sets.tasks.insert(id.to_string(), merge_tombstones(existing, tombstone.clone()));
            store.persist()?;
        }
        let envelope =
            EventEnvelope::for_task_tombstone(&tombstone, &self.device_id, self.user_id())?;
        {
            let mut queue = self.queue.lock().await;
            queue.enqueue(envelope, now);
            queue.persist()?;
        }
        self.bus.publish(Event::TaskDeleted { task_id: id.to_string(), at: now });
        Ok(true)
    }

    pub async fn delete_period(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let periods = self.storage.get_periods().await?;
        let Some(period) = periods.into_iter().find(|p| p.id == id) else {
            return Ok(false);
        };
        self.storage.delete_period(id).await?;
        let tombstone = Tombstone {
            id: id.to_string(),
            event_version: period.event_version + 1,
            deleted_at: now,
        };
        {
            let mut store = self.tombstones.lock().await;
            let existing = store.sets.periods.remove(id);
            store
                .sets
                .periods
                .insert(id.to_string(), merge_tombstones(existing, tombstone.clone()));
            store.persist()?;
        }
        let envelope =
            EventEnvelope::for_period_tombstone(&tombstone, &self.device_id, self.user_id())?;
        let mut queue = self.queue.lock().await;
        queue.enqueue(envelope, now);
        queue.persist()?;
        Ok(true)
    }

    /// Replicate a locally edited period.
    pub async fn record_period(&self, period: &PeriodDefinition, now: DateTime<Utc>) -> Result<()> {
        let envelope = EventEnvelope::for_period(period, &self.device_id, self.user_id())?;
        let mut queue = self.queue.lock().await;
        queue.enqueue(envelope, now);
        queue.persist()?;
        Ok(())
    }

    /// Apply one remote envelope. Returns true when local state
    /// changed. Safe to call with the same envelope any number of
    /// times.
    pub async fn apply_remote(&self, envelope: &EventEnvelope, now: DateTime<Utc>) -> Result<bool> {
        if envelope.device_id == self.device_id {
            // Our own mutation reflected back.
            return Ok(false);
        }
        match envelope.kind {
            PayloadKind::Task => self.apply_task(envelope).await,
            PayloadKind::TaskTombstone => self.apply_task_tombstone(envelope).await,
            PayloadKind::Settings => self.apply_settings(envelope).await,
            PayloadKind::Period => self.apply_period(envelope).await,
            PayloadKind::PeriodTombstone => self.apply_period_tombstone(envelope).await,
            PayloadKind::Notification => {
                let title = envelope.payload["title"].as_str().unwrap_or_default().to_string();
                let body = envelope.payload["body"].as_str().unwrap_or_default().to_string();
                self.bus.publish(Event::NotificationBroadcasted { title, body, at: now });
                Ok(true)
            }
            PayloadKind::TaskStarted => {
                let payload: TaskStartedPayload = serde_json::from_value(envelope.payload.clone())?;
                self.bus.publish(Event::TaskStarted {
                    task_id: payload.task_id,
                    origin: payload.origin,
                    expires_at: payload.expires_at,
                    at: envelope.occurred_at,
                });
                Ok(true)
            }
            PayloadKind::ShuffleState => self.apply_shuffle_state(envelope).await,
        }
    }

    /// Mirror a peer's shuffle snapshot. Ephemeral state without a
    /// version counter: recency of the running session decides, so a
    /// timer started here never gets clobbered by an older broadcast.
    async fn apply_shuffle_state(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: Option<ShuffleSnapshot> = serde_json::from_value(envelope.payload.clone())?;
        if let Some(local) = self.storage.get_shuffle_snapshot().await? {
            if local.started_at > envelope.occurred_at {
                tracing::debug!("dropped stale remote shuffle state");
                return Ok(false);
            }
        }
        self.storage.set_shuffle_snapshot(incoming.clone()).await?;
        self.bus.publish(Event::ShuffleStateChanged {
            snapshot: incoming,
            at: envelope.occurred_at,
        });
        Ok(true)
    }

    async fn apply_task(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: Task = serde_json::from_value(envelope.payload.clone())?;
        // Deletion is terminal: any later event for a tombstoned id is
        // dropped, whatever its version. The work comes back only as a
        // new task with a new id.
        if self.tombstones.lock().await.sets.tasks.contains_key(&incoming.id) {
            tracing::debug!(task = %incoming.id, "incoming record suppressed by tombstone");
            return Ok(false);
        }
        // Validity is judged at the mutation's own timestamp so a
        // snooze that lapsed in transit still applies; the sweep
        // resumes it locally afterwards.
        if !lifecycle::is_valid_state(&incoming, incoming.updated_at) {
            tracing::warn!(
                task = %incoming.id,
                status = ?incoming.status,
                "rejected remote task in an invalid state"
            );
            return Ok(false);
        }
        let local = self.storage.get_task(&incoming.id).await?;
        if resolve_task(local.as_ref(), &incoming) == MergeDecision::KeepLocal {
            return Ok(false);
        }
        self.storage.upsert_task(incoming.clone()).await?;
        tracing::info!(task = %incoming.id, version = incoming.event_version, "applied remote task");
        self.bus.publish(Event::TaskUpserted { task: incoming });
        Ok(true)
    }

    async fn apply_task_tombstone(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: Tombstone = serde_json::from_value(envelope.payload.clone())?;
        let mut changed = false;
        if self.storage.get_task(&incoming.id).await?.is_some() {
            self.storage.delete_task(&incoming.id).await?;
            self.bus.publish(Event::TaskDeleted {
                task_id: incoming.id.clone(),
                at: incoming.deleted_at,
            });
            changed = true;
        }
        let mut store = self.tombstones.lock().await;
        let existing = store.sets.tasks.remove(&incoming.id);
        store.sets.tasks.insert(incoming.id.clone(), merge_tombstones(existing, incoming));
        store.persist()?;
        Ok(changed)
    }

    async fn apply_settings(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: AppSettings = serde_json::from_value(envelope.payload.clone())?;
        let mut local = self.storage.get_settings().await?;
        if !local.merge_remote(&incoming) {
            return Ok(false);
        }
        self.storage.set_settings(local.clone()).await?;
        self.bus.publish(Event::SettingsUpdated { settings: local });
        Ok(true)
    }

    async fn apply_period(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: PeriodDefinition = serde_json::from_value(envelope.payload.clone())?;
        if let Err(reason) = incoming.validate() {
            tracing::warn!(period = %incoming.id, %reason, "rejected invalid remote period");
            return Ok(false);
        }
        if self.tombstones.lock().await.sets.periods.contains_key(&incoming.id) {
            tracing::debug!(period = %incoming.id, "incoming period suppressed by tombstone");
            return Ok(false);
        }
        let periods = self.storage.get_periods().await?;
        let local = periods.iter().find(|p| p.id == incoming.id);
        if resolve_period(local, &incoming) == MergeDecision::KeepLocal {
            return Ok(false);
        }
        self.storage.upsert_period(incoming).await?;
        Ok(true)
    }

    async fn apply_period_tombstone(&self, envelope: &EventEnvelope) -> Result<bool> {
        let incoming: Tombstone = serde_json::from_value(envelope.payload.clone())?;
        let mut changed = false;
        let periods = self.storage.get_periods().await?;
        if periods.iter().any(|p| p.id == incoming.id) {
            self.storage.delete_period(&incoming.id).await?;
            changed = true;
        }
        let mut store = self.tombstones.lock().await;
        let existing = store.sets.periods.remove(&incoming.id);
        store.sets.periods.insert(incoming.id.clone(), merge_tombstones(existing, incoming));
        store.persist()?;
        Ok(changed)
    }

    /// Manifest of everything this device holds.
    pub async fn local_manifest(&self) -> Result<Vec<ManifestEntry>> {
        let tasks = self.storage.get_tasks(OwnerFilter::All).await?;
        let periods = self.storage.get_periods().await?;
        let settings = self.storage.get_settings().await?;
        let store = self.tombstones.lock().await;
        let task_tombs: Vec<Tombstone> = store.sets.tasks.values().cloned().collect();
        let period_tombs: Vec<Tombstone> = store.sets.periods.values().cloned().collect();
        Ok(build_manifest(&tasks, &periods, &task_tombs, &period_tombs, &settings))
    }

    /// Diff a peer's manifest against ours: what to request from them,
    /// and the full envelopes for what we should push.
    pub async fn reconcile(
        &self,
        remote: &[ManifestEntry],
    ) -> Result<(Vec<EntityRef>, Vec<EventEnvelope>)> {
        let local = self.local_manifest().await?;
        let diff = diff_manifests(&local, remote);
        let push = self.envelopes_for(&diff.push).await?;
        Ok((diff.request, push))
    }

    /// Build full envelopes for the referenced entities. References to
    /// entities we no longer hold are skipped.
    pub async fn envelopes_for(&self, refs: &[EntityRef]) -> Result<Vec<EventEnvelope>> {
        let mut envelopes = Vec::with_capacity(refs.len());
        for entity in refs {
            let envelope = match entity.kind {
                PayloadKind::Task => match self.storage.get_task(&entity.id).await? {
                    Some(task) => {
                        Some(EventEnvelope::for_task(&task, &self.device_id, self.user_id())?)
                    }
                    None => None,
                },
                PayloadKind::TaskTombstone => {
                    let store = self.tombstones.lock().await;
                    match store.sets.tasks.get(&entity.id) {
                        Some(tomb) => Some(EventEnvelope::for_task_tombstone(
                            tomb,
                            &self.device_id,
                            self.user_id(),
                        )?),
                        None => None,
                    }
                }
                PayloadKind::Settings => {
                    if entity.id == SETTINGS_ENTITY_ID {
                        let settings = self.storage.get_settings().await?;
                        Some(EventEnvelope::for_settings(&settings, &self.device_id, self.user_id())?)
                    } else {
                        None
                    }
                }
                PayloadKind::Period => {
                    let periods = self.storage.get_periods().await?;
                    match periods.into_iter().find(|p| p.id == entity.id) {
                        Some(period) => {
                            Some(EventEnvelope::for_period(&period, &self.device_id, self.user_id())?)
                        }
                        None => None,
                    }
                }
                PayloadKind::PeriodTombstone => {
                    let store = self.tombstones.lock().await;
                    match store.sets.periods.get(&entity.id) {
                        Some(tomb) => Some(EventEnvelope::for_period_tombstone(
                            tomb,
                            &self.device_id,
                            self.user_id(),
                        )?),
                        None => None,
                    }
                }
                PayloadKind::Notification | PayloadKind::TaskStarted | PayloadKind::ShuffleState => {
                    None
                }
            };
            if let Some(envelope) = envelope {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    /// Drain debounced envelopes for transmission.
    pub async fn drain_outbound(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>> {
        let mut queue = self.queue.lock().await;
        let drained = queue.drain_ready(limit, now);
        if !drained.is_empty() {
            queue.persist()?;
        }
        Ok(drained)
    }

    /// Drain the entire queue, debounce included. Shutdown path.
    pub async fn drain_all_outbound(&self) -> Result<Vec<EventEnvelope>> {
        let mut queue = self.queue.lock().await;
        let drained = queue.drain_all();
        queue.persist()?;
        Ok(drained)
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Verify the outbound queue drained before shutdown completes.
    pub async fn ensure_flushed(&self) -> Result<(), SyncError> {
        let pending = self.pending_len().await;
        if pending > 0 {
            return Err(SyncError::FlushIncomplete { pending });
        }
        Ok(())
    }

    pub async fn mark_synced(&self, now: DateTime<Utc>) {
        *self.last_sync_at.lock().await = Some(now);
    }

    pub fn set_in_progress(&self, value: bool) {
        self.in_progress.store(value, Ordering::Relaxed);
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            last_sync_at: *self.last_sync_at.lock().await,
            pending_count: self.pending_len().await,
            in_progress: self.in_progress.load(Ordering::Relaxed),
        }
    }
}
