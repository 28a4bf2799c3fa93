use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::bus::EventBus;
use crate::events::Event;
use crate::selector::{SelectionMode, ShuffleOrigin};
use crate::shuffle::{ShufflePhase, ShuffleSnapshot};
use crate::storage::{MemoryStore, Storage};
use crate::sync::engine::SyncEngine;
use crate::sync::envelope::EventEnvelope;
use crate::sync::manifest::EntityRef;
use crate::sync::envelope::PayloadKind;
use crate::task::{Owner, Task};

struct Peer {
    store: Arc<MemoryStore>,
    engine: SyncEngine,
    _dir: TempDir,
}

fn peer(device_id: &str) -> Peer {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(
        store.clone() as Arc<dyn Storage>,
        EventBus::new(),
        device_id,
        None,
        dir.path(),
    )
    .unwrap();
    Peer { store, engine, _dir: dir }
}

#[tokio::test]
async fn higher_version_wins_on_both_sides() {
    let a = peer("nextup-a");
    let b = peer("nextup-b");
    let now = Utc::now();

    // Same task diverged: A holds version 3, B holds version 4.
    let mut task = Task::new("shared", Owner::Device("d".into()));
    task.event_version = 3;
    task.title = "older title".into();
    a.store.upsert_task(task.clone()).await.unwrap();
    let mut newer = task.clone();
    newer.event_version = 4;
    newer.title = "newer title".into();
    b.store.upsert_task(newer.clone()).await.unwrap();

    let env_a = EventEnvelope::for_task(&task, "nextup-a", None).unwrap();
    let env_b = EventEnvelope::for_task(&newer, "nextup-b", None).unwrap();

    // Version 4 replaces version 3.
    assert!(a.engine.apply_remote(&env_b, now).await.unwrap());
    // Version 3 arriving at the version-4 holder is a no-op.
    assert!(!b.engine.apply_remote(&env_a, now).await.unwrap());

    let on_a = a.store.get_task(&task.id).await.unwrap().unwrap();
    let on_b = b.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(on_a.event_version, 4);
    assert_eq!(on_a.title, "newer title");
    assert_eq!(on_a, on_b);
}

#[tokio::test]
async fn redelivery_is_idempotent() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let task = Task::new("t", Owner::Device("d".into()));
    let env = EventEnvelope::for_task(&task, "nextup-b", None).unwrap();

    assert!(a.engine.apply_remote(&env, now).await.unwrap());
    assert!(!a.engine.apply_remote(&env, now).await.unwrap());
    assert!(!a.engine.apply_remote(&env, now).await.unwrap());
}

#[tokio::test]
async fn own_device_envelopes_are_dropped() {
    let a = peer("nextup-a");
    let task = Task::new("t", Owner::Device("d".into()));
    let env = EventEnvelope::for_task(&task, "nextup-a", None).unwrap();
    assert!(!a.engine.apply_remote(&env, Utc::now()).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn deletion_is_terminal_for_the_id() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let mut task = Task::new("t", Owner::Device("d".into()));
    task.event_version = 3;
    a.store.upsert_task(task.clone()).await.unwrap();

    assert!(a.engine.delete_task(&task.id, now).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_none());

    // The version-3 record echoing back from a peer stays dead.
    let stale = EventEnvelope::for_task(&task, "nextup-b", None).unwrap();
    assert!(!a.engine.apply_remote(&stale, now).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_none());

    // So does a concurrent edit with a version past the tombstone's:
    // no event for the id applies anymore, the work can only come
    // back as a fresh task with a new id.
    let mut edited = task.clone();
    edited.event_version = 5;
    edited.title = "edited elsewhere".into();
    let late = EventEnvelope::for_task(&edited, "nextup-b", None).unwrap();
    assert!(!a.engine.apply_remote(&late, now).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_none());

    let mut anew = Task::new("t", Owner::Device("d".into()));
    anew.title = "recreated".into();
    let fresh = EventEnvelope::for_task(&anew, "nextup-b", None).unwrap();
    assert!(a.engine.apply_remote(&fresh, now).await.unwrap());
    assert!(a.store.get_task(&anew.id).await.unwrap().is_some());
}

#[tokio::test]
async fn remote_task_in_invalid_state_is_rejected() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let mut task = Task::new("t", Owner::Device("d".into()));
    a.store.upsert_task(task.clone()).await.unwrap();

    // Completed without a completion timestamp never passes validation.
    task.status = crate::task::TaskStatus::Completed;
    task.completed_at = None;
    task.event_version = 2;
    let env = EventEnvelope::for_task(&task, "nextup-b", None).unwrap();
    assert!(!a.engine.apply_remote(&env, now).await.unwrap());
    let kept = a.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(kept.event_version, 1);
    assert_eq!(kept.status, crate::task::TaskStatus::Active);
}

#[tokio::test]
async fn snooze_that_lapsed_in_transit_still_applies() {
    let a = peer("nextup-a");
    let then = Utc::now() - Duration::hours(2);
    let mut task = Task::new("t", Owner::Device("d".into()));
    crate::task::lifecycle::snooze(&mut task, then + Duration::hours(1), then).unwrap();

    // Arrives after the snooze deadline; validity is judged at the
    // mutation's own timestamp, so it lands and the sweep resumes it.
    let env = EventEnvelope::for_task(&task, "nextup-b", None).unwrap();
    assert!(a.engine.apply_remote(&env, Utc::now()).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_some());
}

#[tokio::test]
async fn remote_tombstone_deletes_local_record() {
    let a = peer("nextup-a");
    let b = peer("nextup-b");
    let now = Utc::now();
    let task = Task::new("t", Owner::Device("d".into()));
    a.store.upsert_task(task.clone()).await.unwrap();
    b.store.upsert_task(task.clone()).await.unwrap();

    b.engine.delete_task(&task.id, now).await.unwrap();
    let envs = b.engine.drain_all_outbound().await.unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].kind, PayloadKind::TaskTombstone);

    assert!(a.engine.apply_remote(&envs[0], now).await.unwrap());
    assert!(a.store.get_task(&task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn settings_merge_keeps_local_identity() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let mut local = a.store.get_settings().await.unwrap();
    local.network.device_id = "nextup-a".into();
    a.store.set_settings(local.clone()).await.unwrap();

    let mut remote = local.clone();
    remote.reminder_minutes = 55;
    remote.touch(now);
    let env = EventEnvelope::for_settings(&remote, "nextup-b", None).unwrap();

    assert!(a.engine.apply_remote(&env, now).await.unwrap());
    let merged = a.store.get_settings().await.unwrap();
    assert_eq!(merged.reminder_minutes, 55);
    assert_eq!(merged.network.device_id, "nextup-a");
}

#[tokio::test]
async fn reconcile_requests_and_pushes_the_divergence() {
    let a = peer("nextup-a");
    let b = peer("nextup-b");
    let now = Utc::now();

    let only_a = Task::new("only-a", Owner::Device("d".into()));
    a.store.upsert_task(only_a.clone()).await.unwrap();
    let only_b = Task::new("only-b", Owner::Device("d".into()));
    b.store.upsert_task(only_b.clone()).await.unwrap();

    let b_manifest = b.engine.local_manifest().await.unwrap();
    let (request, push) = a.engine.reconcile(&b_manifest).await.unwrap();

    assert!(request.iter().any(|r| r.id == only_b.id));
    assert!(push.iter().any(|e| e.entity_id == only_a.id));
    // Settings exist on both sides at the same version: no traffic.
    assert!(!request.iter().any(|r| r.kind == PayloadKind::Settings));

    // Applying the push converges B's missing record.
    for env in &push {
        b.engine.apply_remote(env, now).await.unwrap();
    }
    assert!(b.store.get_task(&only_a.id).await.unwrap().is_some());
}

#[tokio::test]
async fn record_local_queues_and_flush_check_reports_backlog() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let task = Task::new("t", Owner::Device("d".into()));
    a.engine.record_local(&Event::TaskUpserted { task }, now).await.unwrap();

    assert_eq!(a.engine.pending_len().await, 1);
    assert!(a.engine.ensure_flushed().await.is_err());

    let drained = a.engine.drain_outbound(10, now + Duration::seconds(5)).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert!(a.engine.ensure_flushed().await.is_ok());
}

#[tokio::test]
async fn rapid_edits_coalesce_in_the_outbound_queue() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let mut task = Task::new("t", Owner::Device("d".into()));
    a.engine.record_local(&Event::TaskUpserted { task: task.clone() }, now).await.unwrap();
    task.touch(now + Duration::seconds(1));
    task.touch(now + Duration::seconds(2));
    a.engine
        .record_local(&Event::TaskUpserted { task: task.clone() }, now + Duration::seconds(2))
        .await
        .unwrap();

    let drained = a.engine.drain_outbound(10, now + Duration::seconds(10)).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].event_version, 3);
}

fn snapshot_at(now: chrono::DateTime<Utc>) -> ShuffleSnapshot {
    ShuffleSnapshot {
        task_id: "task-1".into(),
        origin: ShuffleOrigin::Manual,
        mode: SelectionMode::WeightedRandom,
        phase: ShufflePhase::Focus { cycle: 0 },
        started_at: now,
        expires_at: now + Duration::minutes(25),
    }
}

#[tokio::test]
async fn timer_events_are_queued_for_replication() {
    let a = peer("nextup-a");
    let now = Utc::now();

    a.engine
        .record_local(
            &Event::TaskStarted {
                task_id: "task-1".into(),
                origin: ShuffleOrigin::Manual,
                expires_at: now + Duration::minutes(25),
                at: now,
            },
            now,
        )
        .await
        .unwrap();
    a.engine
        .record_local(
            &Event::ShuffleStateChanged { snapshot: Some(snapshot_at(now)), at: now },
            now,
        )
        .await
        .unwrap();
    assert_eq!(a.engine.pending_len().await, 2);

    let drained = a.engine.drain_outbound(10, now + Duration::seconds(5)).await.unwrap();
    let kinds: Vec<PayloadKind> = drained.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&PayloadKind::TaskStarted));
    assert!(kinds.contains(&PayloadKind::ShuffleState));
}

#[tokio::test]
async fn remote_shuffle_state_is_mirrored_and_announced() {
    let bus = EventBus::new();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(
        store.clone() as Arc<dyn Storage>,
        bus.clone(),
        "nextup-a",
        None,
        dir.path(),
    )
    .unwrap();
    let mut rx = bus.subscribe();
    let now = Utc::now();

    let snap = snapshot_at(now);
    let env = EventEnvelope::for_shuffle_state(Some(&snap), "nextup-b", None, now).unwrap();
    assert!(engine.apply_remote(&env, now).await.unwrap());
    assert_eq!(store.get_shuffle_snapshot().await.unwrap(), Some(snap.clone()));
    match rx.recv().await.unwrap() {
        Event::ShuffleStateChanged { snapshot, .. } => {
            assert_eq!(snapshot, Some(snap.clone()));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // A broadcast older than the locally running session is dropped.
    let fresher = snapshot_at(now + Duration::minutes(5));
    store.set_shuffle_snapshot(Some(fresher.clone())).await.unwrap();
    let stale = EventEnvelope::for_shuffle_state(Some(&snap), "nextup-b", None, now).unwrap();
    assert!(!engine.apply_remote(&stale, now).await.unwrap());
    assert_eq!(store.get_shuffle_snapshot().await.unwrap(), Some(fresher));
}

#[tokio::test]
async fn remote_task_started_rebroadcasts_on_the_bus() {
    let bus = EventBus::new();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine =
        SyncEngine::new(store as Arc<dyn Storage>, bus.clone(), "nextup-a", None, dir.path())
            .unwrap();
    let mut rx = bus.subscribe();
    let now = Utc::now();

    let payload = crate::sync::envelope::TaskStartedPayload {
        task_id: "task-1".into(),
        origin: ShuffleOrigin::Auto,
        expires_at: now + Duration::minutes(25),
    };
    let env = EventEnvelope::for_task_started(&payload, "nextup-b", None, now).unwrap();
    assert!(engine.apply_remote(&env, now).await.unwrap());
    match rx.recv().await.unwrap() {
        Event::TaskStarted { task_id, origin, .. } => {
            assert_eq!(task_id, "task-1");
            assert_eq!(origin, ShuffleOrigin::Auto);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn notification_envelopes_rebroadcast_on_the_bus() {
    let bus = EventBus::new();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine =
        SyncEngine::new(store as Arc<dyn Storage>, bus.clone(), "nextup-x", None, dir.path())
            .unwrap();
    let mut rx = bus.subscribe();

    let env = EventEnvelope::for_notification("Time's up", "Done?", "nextup-y", None, Utc::now())
        .unwrap();
    assert!(engine.apply_remote(&env, Utc::now()).await.unwrap());

    match rx.recv().await.unwrap() {
        Event::NotificationBroadcasted { title, body, .. } => {
            assert_eq!(title, "Time's up");
            assert_eq!(body, "Done?");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn envelopes_for_skips_records_we_no_longer_hold() {
    let a = peer("nextup-a");
    let refs = vec![EntityRef { kind: PayloadKind::Task, id: "gone".into() }];
    let envelopes = a.engine.envelopes_for(&refs).await.unwrap();
    assert!(envelopes.is_empty());
}

#[tokio::test]
async fn status_reflects_queue_and_sync_marks() {
    let a = peer("nextup-a");
    let now = Utc::now();
    let status = a.engine.status().await;
    assert!(status.last_sync_at.is_none());
    assert_eq!(status.pending_count, 0);

    a.engine
        .record_local(&Event::TaskUpserted { task: Task::new("t", Owner::Device("d".into())) }, now)
        .await
        .unwrap();
    a.engine.mark_synced(now).await;
    a.engine.set_in_progress(true);

    let status = a.engine.status().await;
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.last_sync_at, Some(now));
    assert!(status.in_progress);
}
