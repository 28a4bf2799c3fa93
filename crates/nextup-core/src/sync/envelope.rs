//! Wire envelopes: the unit of replication.
//!
//! Every synced mutation travels as one envelope, serialized as a
//! single JSON line. The payload is an opaque JSON value so peers on
//! adjacent schema versions can still route and store envelopes they
//! cannot fully decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::selector::ShuffleOrigin;
use crate::settings::AppSettings;
use crate::shuffle::ShuffleSnapshot;
use crate::sync::conflict::Tombstone;
use crate::period::PeriodDefinition;
use crate::task::Task;

/// What kind of record an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Task,
    TaskTombstone,
    Settings,
    Period,
    PeriodTombstone,
    Notification,
    /// A timer started on some device; ephemeral, not reconciled.
    TaskStarted,
    /// Full shuffle snapshot (or its clearing) so paired devices show
    /// the same running timer.
    ShuffleState,
}

/// Payload for [`PayloadKind::TaskStarted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStartedPayload {
    pub task_id: String,
    pub origin: ShuffleOrigin,
    pub expires_at: DateTime<Utc>,
}

/// A replicated mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per envelope, for de-duplication and tracing.
    pub event_id: String,
    pub kind: PayloadKind,
    /// Id of the entity the payload describes. `"settings"` for the
    /// singleton settings record.
    pub entity_id: String,
    pub payload: serde_json::Value,
    /// The entity's version at emission time; conflict resolution key.
    pub event_version: u64,
    /// Emitting device. Envelopes that come back carrying our own
    /// device id are dropped on receive.
    pub device_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Id used for the settings singleton.
pub const SETTINGS_ENTITY_ID: &str = "settings";

/// Id used for the shuffle-state singleton.
pub const SHUFFLE_ENTITY_ID: &str = "shuffle";

impl EventEnvelope {
    fn base(
        kind: PayloadKind,
        entity_id: String,
        payload: serde_json::Value,
        event_version: u64,
        device_id: &str,
        user_id: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind,
            entity_id,
            payload,
            event_version,
            device_id: device_id.to_string(),
            user_id: user_id.map(str::to_string),
            occurred_at,
        }
    }

    pub fn for_task(
        task: &Task,
        device_id: &str,
        user_id: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::Task,
            task.id.clone(),
            serde_json::to_value(task)?,
            task.event_version,
            device_id,
            user_id,
            task.updated_at,
        ))
    }

    pub fn for_task_tombstone(
        tombstone: &Tombstone,
        device_id: &str,
        user_id: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::TaskTombstone,
            tombstone.id.clone(),
            serde_json::to_value(tombstone)?,
            tombstone.event_version,
            device_id,
            user_id,
            tombstone.deleted_at,
        ))
    }

    /// Settings envelope. Uses the sync view, which strips the local
    /// network identity.
    pub fn for_settings(
        settings: &AppSettings,
        device_id: &str,
        user_id: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        let view = settings.sync_view();
        Ok(Self::base(
            PayloadKind::Settings,
            SETTINGS_ENTITY_ID.to_string(),
            serde_json::to_value(&view)?,
            view.event_version,
            device_id,
            user_id,
            view.updated_at,
        ))
    }

    pub fn for_period(
        period: &PeriodDefinition,
        device_id: &str,
        user_id: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::Period,
            period.id.clone(),
            serde_json::to_value(period)?,
            period.event_version,
            device_id,
            user_id,
            period.updated_at,
        ))
    }

    pub fn for_period_tombstone(
        tombstone: &Tombstone,
        device_id: &str,
        user_id: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::PeriodTombstone,
            tombstone.id.clone(),
            serde_json::to_value(tombstone)?,
            tombstone.event_version,
            device_id,
            user_id,
            tombstone.deleted_at,
        ))
    }

    /// Timer-start announcement. Ephemeral: versioned 1, resolved by
    /// `occurred_at` recency on the receiving side.
    pub fn for_task_started(
        payload: &TaskStartedPayload,
        device_id: &str,
        user_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::TaskStarted,
            payload.task_id.clone(),
            serde_json::to_value(payload)?,
            1,
            device_id,
            user_id,
            at,
        ))
    }

    /// Shuffle-state broadcast. `None` clears the remote snapshot.
    pub fn for_shuffle_state(
        snapshot: Option<&ShuffleSnapshot>,
        device_id: &str,
        user_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::base(
            PayloadKind::ShuffleState,
            SHUFFLE_ENTITY_ID.to_string(),
            serde_json::to_value(snapshot)?,
            1,
            device_id,
            user_id,
            at,
        ))
    }

    pub fn for_notification(
        title: &str,
        body: &str,
        device_id: &str,
        user_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        Ok(Self::base(
            PayloadKind::Notification,
            id,
            serde_json::json!({ "title": title, "body": body }),
            1,
            device_id,
            user_id,
            at,
        ))
    }

    /// Coalescing key for the outbound queue: later envelopes for the
    /// same entity replace earlier queued ones. Notifications never
    /// coalesce.
    pub fn queue_key(&self) -> String {
        match self.kind {
            PayloadKind::Notification => format!("notification:{}", self.event_id),
            PayloadKind::Task => format!("task:{}", self.entity_id),
            PayloadKind::TaskTombstone => format!("task-tombstone:{}", self.entity_id),
            PayloadKind::Settings => "settings".to_string(),
            PayloadKind::Period => format!("period:{}", self.entity_id),
            PayloadKind::PeriodTombstone => format!("period-tombstone:{}", self.entity_id),
            // At most one timer runs per device, so the latest start
            // and the latest snapshot each supersede what was queued.
            PayloadKind::TaskStarted => "task-started".to_string(),
            PayloadKind::ShuffleState => "shuffle-state".to_string(),
        }
    }

    /// One JSON line, newline-terminated.
    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Owner;

    #[test]
    fn task_envelope_carries_version_and_device() {
        let mut task = Task::new("t", Owner::Device("dev-1".into()));
        task.event_version = 7;
        let env = EventEnvelope::for_task(&task, "nextup-a", None).unwrap();
        assert_eq!(env.kind, PayloadKind::Task);
        assert_eq!(env.entity_id, task.id);
        assert_eq!(env.event_version, 7);
        assert_eq!(env.device_id, "nextup-a");
    }

    #[test]
    fn line_codec_roundtrip() {
        let task = Task::new("t", Owner::User("u-1".into()));
        let env = EventEnvelope::for_task(&task, "nextup-a", Some("u-1")).unwrap();
        let line = env.encode_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let back = EventEnvelope::decode_line(&line).unwrap();
        assert_eq!(back, env);
        let task_back: Task = serde_json::from_value(back.payload).unwrap();
        assert_eq!(task_back.id, task.id);
    }

    #[test]
    fn malformed_line_is_a_codec_error() {
        assert!(EventEnvelope::decode_line("{\"event_id\": nope").is_err());
        assert!(EventEnvelope::decode_line("").is_err());
    }

    #[test]
    fn queue_keys_coalesce_per_entity_except_notifications() {
        let task = Task::new("t", Owner::Device("d".into()));
        let a = EventEnvelope::for_task(&task, "d", None).unwrap();
        let b = EventEnvelope::for_task(&task, "d", None).unwrap();
        assert_eq!(a.queue_key(), b.queue_key());

        let now = Utc::now();
        let n1 = EventEnvelope::for_notification("t", "b", "d", None, now).unwrap();
        let n2 = EventEnvelope::for_notification("t", "b", "d", None, now).unwrap();
        assert_ne!(n1.queue_key(), n2.queue_key());
    }

    #[test]
    fn timer_envelopes_coalesce_to_a_single_slot() {
        let now = Utc::now();
        let a = TaskStartedPayload {
            task_id: "one".into(),
            origin: ShuffleOrigin::Manual,
            expires_at: now,
        };
        let b = TaskStartedPayload { task_id: "two".into(), ..a.clone() };
        let e1 = EventEnvelope::for_task_started(&a, "d", None, now).unwrap();
        let e2 = EventEnvelope::for_task_started(&b, "d", None, now).unwrap();
        // One running timer per device: the latest start supersedes.
        assert_eq!(e1.queue_key(), e2.queue_key());

        let s1 = EventEnvelope::for_shuffle_state(None, "d", None, now).unwrap();
        let s2 = EventEnvelope::for_shuffle_state(None, "d", None, now).unwrap();
        assert_eq!(s1.entity_id, SHUFFLE_ENTITY_ID);
        assert_eq!(s1.queue_key(), s2.queue_key());
        assert_ne!(s1.queue_key(), e1.queue_key());
    }

    #[test]
    fn settings_envelope_uses_the_stripped_view() {
        let mut settings = AppSettings::default();
        settings.network.device_id = "nextup-secret-local".into();
        let env = EventEnvelope::for_settings(&settings, "nextup-a", None).unwrap();
        assert_eq!(env.entity_id, SETTINGS_ENTITY_ID);
        assert_eq!(env.payload["network"]["device_id"], "");
    }
}
