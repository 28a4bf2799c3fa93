//! Domain events published on the in-process bus.
//!
//! An external presentation layer subscribes to these; the core carries
//! no UI dependency. Events are also the payloads the sync layer wraps
//! into envelopes for the peer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::selector::ShuffleOrigin;
use crate::settings::AppSettings;
use crate::shuffle::ShuffleSnapshot;
use crate::task::Task;

/// Every observable state change in the system produces an Event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A task was created or mutated locally or merged from a peer.
    TaskUpserted { task: Task },
    /// A task was deleted. Terminal for that id.
    TaskDeleted { task_id: String, at: DateTime<Utc> },
    /// A shuffle activated a task and started its countdown.
    TaskStarted {
        task_id: String,
        origin: ShuffleOrigin,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The coordinator's timer state changed (phase advance, expiry,
    /// clear).
    ShuffleStateChanged { snapshot: Option<ShuffleSnapshot>, at: DateTime<Utc> },
    /// Settings were edited locally or merged from a peer.
    SettingsUpdated { settings: AppSettings },
    /// A notification was emitted, mirrored to peers so only one
    /// device needs to alert loudly.
    NotificationBroadcasted { title: String, body: String, at: DateTime<Utc> },
}
