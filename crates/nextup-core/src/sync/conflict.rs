//! Last-writer-wins conflict resolution.
//!
//! The version counter is the primary key: a higher `event_version`
//! wins regardless of wall-clock timestamps, so devices with skewed
//! clocks still converge. `updated_at` only breaks version ties, and a
//! record equal on both counts is the same mutation arriving twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::PeriodDefinition;
use crate::task::Task;

/// Outcome of comparing a local record against an incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    KeepLocal,
    TakeRemote,
}

/// Marker for a deleted entity. Kept and replicated so no later event
/// for the id can resurrect the record: deletion is terminal, and the
/// same work can only come back as a new task with a new id. The
/// version is sync metadata for manifest exchange, not a comparison
/// key against incoming records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    /// Version of the record at deletion time.
    pub event_version: u64,
    pub deleted_at: DateTime<Utc>,
}

/// Version-primary comparison. Remote wins only when strictly newer;
/// an exact tie keeps local, making re-delivery idempotent.
pub fn resolve(
    local_version: u64,
    local_updated: DateTime<Utc>,
    remote_version: u64,
    remote_updated: DateTime<Utc>,
) -> MergeDecision {
    let remote_newer = remote_version > local_version
        || (remote_version == local_version && remote_updated > local_updated);
    if remote_newer {
        MergeDecision::TakeRemote
    } else {
        MergeDecision::KeepLocal
    }
}

/// Resolve an incoming task against the locally stored one, if any.
pub fn resolve_task(local: Option<&Task>, remote: &Task) -> MergeDecision {
    match local {
        None => MergeDecision::TakeRemote,
        Some(local) => {
            resolve(local.event_version, local.updated_at, remote.event_version, remote.updated_at)
        }
    }
}

pub fn resolve_period(local: Option<&PeriodDefinition>, remote: &PeriodDefinition) -> MergeDecision {
    match local {
        None => MergeDecision::TakeRemote,
        Some(local) => {
            resolve(local.event_version, local.updated_at, remote.event_version, remote.updated_at)
        }
    }
}

/// Keep the tombstone with the higher version when the same deletion
/// arrives from several peers.
pub fn merge_tombstones(existing: Option<Tombstone>, incoming: Tombstone) -> Tombstone {
    match existing {
        Some(existing) if existing.event_version >= incoming.event_version => existing,
        _ => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Owner;
    use chrono::Duration;

    fn task_at(version: u64) -> Task {
        let mut t = Task::new("t", Owner::Device("d".into()));
        t.event_version = version;
        t
    }

    #[test]
    fn higher_version_wins_even_with_older_timestamp() {
        let mut local = task_at(3);
        let mut remote = local.clone();
        remote.event_version = 4;
        local.updated_at = remote.updated_at + Duration::hours(1);
        assert_eq!(resolve_task(Some(&local), &remote), MergeDecision::TakeRemote);
    }

    #[test]
    fn timestamp_breaks_version_tie() {
        let local = task_at(3);
        let mut remote = local.clone();
        remote.updated_at = local.updated_at + Duration::seconds(1);
        assert_eq!(resolve_task(Some(&local), &remote), MergeDecision::TakeRemote);

        let mut older = local.clone();
        older.updated_at = local.updated_at - Duration::seconds(1);
        assert_eq!(resolve_task(Some(&local), &older), MergeDecision::KeepLocal);
    }

    #[test]
    fn exact_tie_keeps_local() {
        let local = task_at(3);
        let remote = local.clone();
        assert_eq!(resolve_task(Some(&local), &remote), MergeDecision::KeepLocal);
    }

    #[test]
    fn missing_local_always_takes_remote() {
        let remote = task_at(1);
        assert_eq!(resolve_task(None, &remote), MergeDecision::TakeRemote);
    }

    #[test]
    fn tombstone_merge_keeps_highest_version() {
        let now = Utc::now();
        let old = Tombstone { id: "x".into(), event_version: 2, deleted_at: now };
        let new = Tombstone { id: "x".into(), event_version: 5, deleted_at: now };
        assert_eq!(merge_tombstones(Some(old.clone()), new.clone()).event_version, 5);
        assert_eq!(merge_tombstones(Some(new.clone()), old).event_version, 5);
        assert_eq!(merge_tombstones(None, new).event_version, 5);
    }
}
