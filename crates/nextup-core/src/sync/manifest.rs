//! Manifest reconciliation.
//!
//! On (re)connect each peer sends a manifest of everything it holds:
//! `{kind, id, version, updated_at}` per entity. Diffing the two
//! manifests yields the minimal exchange -- what to request from the
//! peer and what to push -- so reconnection cost scales with divergence,
//! not dataset size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::period::PeriodDefinition;
use crate::settings::AppSettings;
use crate::sync::conflict::{resolve, MergeDecision, Tombstone};
use crate::sync::envelope::{PayloadKind, SETTINGS_ENTITY_ID};
use crate::task::Task;

/// One entity's summary in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: PayloadKind,
    pub id: String,
    pub event_version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Reference to an entity, used to request full records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: PayloadKind,
    pub id: String,
}

impl ManifestEntry {
    fn to_ref(&self) -> EntityRef {
        EntityRef { kind: self.kind, id: self.id.clone() }
    }
}

/// Build the local manifest from stored state. Tombstones are listed so
/// a peer that still holds the record learns about the deletion.
pub fn build_manifest(
    tasks: &[Task],
    periods: &[PeriodDefinition],
    tombstones: &[Tombstone],
    period_tombstones: &[Tombstone],
    settings: &AppSettings,
) -> Vec<ManifestEntry> {
    let mut entries = Vec::with_capacity(tasks.len() + periods.len() + tombstones.len() + 1);
    for task in tasks {
        entries.push(ManifestEntry {
            kind: PayloadKind::Task,
            id: task.id.clone(),
            event_version: task.event_version,
            updated_at: task.updated_at,
        });
    }
    for period in periods {
        entries.push(ManifestEntry {
            kind: PayloadKind::Period,
            id: period.id.clone(),
            event_version: period.event_version,
            updated_at: period.updated_at,
        });
    }
    for tomb in tombstones {
        entries.push(ManifestEntry {
            kind: PayloadKind::TaskTombstone,
            id: tomb.id.clone(),
            event_version: tomb.event_version,
            updated_at: tomb.deleted_at,
        });
    }
    for tomb in period_tombstones {
        entries.push(ManifestEntry {
            kind: PayloadKind::PeriodTombstone,
            id: tomb.id.clone(),
            event_version: tomb.event_version,
            updated_at: tomb.deleted_at,
        });
    }
    entries.push(ManifestEntry {
        kind: PayloadKind::Settings,
        id: SETTINGS_ENTITY_ID.to_string(),
        event_version: settings.event_version,
        updated_at: settings.updated_at,
    });
    entries
}

/// Outcome of diffing two manifests, from the local side's view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestDiff {
    /// Entities the peer has newer (or that we lack): request these.
    pub request: Vec<EntityRef>,
    /// Entities we have newer (or the peer lacks): push these.
    pub push: Vec<EntityRef>,
}

/// Diff the local manifest against the peer's. Symmetric: running the
/// same diff on the other side swaps `request` and `push`.
pub fn diff_manifests(local: &[ManifestEntry], remote: &[ManifestEntry]) -> ManifestDiff {
    let local_by_ref: HashMap<EntityRef, &ManifestEntry> =
        local.iter().map(|e| (e.to_ref(), e)).collect();
    let remote_by_ref: HashMap<EntityRef, &ManifestEntry> =
        remote.iter().map(|e| (e.to_ref(), e)).collect();

    let mut diff = ManifestDiff::default();
    for entry in remote {
        match local_by_ref.get(&entry.to_ref()) {
            None => diff.request.push(entry.to_ref()),
            Some(ours) => {
                if resolve(ours.event_version, ours.updated_at, entry.event_version, entry.updated_at)
                    == MergeDecision::TakeRemote
                {
                    diff.request.push(entry.to_ref());
                }
            }
        }
    }
    for entry in local {
        match remote_by_ref.get(&entry.to_ref()) {
            None => diff.push.push(entry.to_ref()),
            Some(theirs) => {
                if resolve(
                    theirs.event_version,
                    theirs.updated_at,
                    entry.event_version,
                    entry.updated_at,
                ) == MergeDecision::TakeRemote
                {
                    diff.push.push(entry.to_ref());
                }
            }
        }
    }
    diff
}
