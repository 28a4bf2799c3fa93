//! Peer-to-peer synchronization layer.
//!
//! Replicates tasks, periods and settings between a user's paired
//! devices over a direct TCP link. Conflict resolution is
//! last-writer-wins keyed on the per-entity version counter; manifests
//! reconcile divergence on reconnect and an outbound queue carries
//! offline edits.

pub mod conflict;
pub mod device_id;
pub mod engine;
pub mod envelope;
pub mod link;
pub mod manifest;
pub mod queue;

#[cfg(test)]
mod engine_tests;

pub use conflict::{MergeDecision, Tombstone};
pub use device_id::{get_or_create_device_id, get_or_create_sync_secret};
pub use engine::{SyncEngine, SyncStatus};
pub use envelope::{EventEnvelope, PayloadKind};
pub use link::SyncLink;
pub use manifest::{build_manifest, diff_manifests, EntityRef, ManifestDiff, ManifestEntry};
pub use queue::OutboundQueue;
