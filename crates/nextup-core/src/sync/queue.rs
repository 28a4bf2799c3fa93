//! Outbound sync queue with debounce and disk persistence.
//!
//! Local mutations land here before going on the wire. Rapid edits to
//! the same entity coalesce: the queue keys on the envelope's
//! coalescing key and a short debounce window lets the latest version
//! replace earlier queued ones. The queue persists to a JSON file so
//! mutations made while the peer is unreachable survive restarts.
//!
//! Callers pass `now` explicitly; the queue never reads the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::sync::envelope::EventEnvelope;

const DEBOUNCE_SECONDS: i64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEnvelope {
    envelope: EventEnvelope,
    debounce_until: DateTime<Utc>,
}

/// Persistent outbound queue.
pub struct OutboundQueue {
    pending: HashMap<String, PendingEnvelope>,
    next_ready: Option<DateTime<Utc>>,
    queue_file: PathBuf,
}

impl OutboundQueue {
    /// Open a queue backed by `path`, loading any persisted entries.
    pub fn open(path: PathBuf) -> Result<Self, std::io::Error> {
        let mut queue = Self { pending: HashMap::new(), next_ready: None, queue_file: path };
        queue.load()?;
        Ok(queue)
    }

    /// Enqueue an envelope. A queued envelope with the same coalescing
    /// key is replaced and its debounce window restarted.
    pub fn enqueue(&mut self, envelope: EventEnvelope, now: DateTime<Utc>) {
        let key = envelope.queue_key();
        let debounce_until = now + Duration::seconds(DEBOUNCE_SECONDS);
        self.pending.insert(key, PendingEnvelope { envelope, debounce_until });
        self.update_next_ready();
    }

    /// Drain up to `limit` envelopes whose debounce window has passed,
    /// oldest mutation first.
    pub fn drain_ready(&mut self, limit: usize, now: DateTime<Utc>) -> Vec<EventEnvelope> {
        let mut ready: Vec<(String, DateTime<Utc>)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.debounce_until <= now)
            .map(|(k, p)| (k.clone(), p.envelope.occurred_at))
            .collect();
        ready.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ready.truncate(limit);

        let drained = ready
            .into_iter()
            .filter_map(|(key, _)| self.pending.remove(&key))
            .map(|p| p.envelope)
            .collect();
        self.update_next_ready();
        drained
    }

    /// Drain everything regardless of debounce. Shutdown path.
    pub fn drain_all(&mut self) -> Vec<EventEnvelope> {
        let mut all: Vec<PendingEnvelope> = self.pending.drain().map(|(_, p)| p).collect();
        all.sort_by(|a, b| a.envelope.occurred_at.cmp(&b.envelope.occurred_at));
        self.next_ready = None;
        all.into_iter().map(|p| p.envelope).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time until the earliest queued envelope leaves its debounce
    /// window. `None` when the queue is empty.
    pub fn time_until_ready(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_ready.map(|t| (t - now).max(Duration::zero()))
    }

    pub fn persist(&self) -> Result<(), std::io::Error> {
        let data = serde_json::to_string_pretty(&self.pending)?;
        std::fs::write(&self.queue_file, data)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if !self.queue_file.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.queue_file)?;
        self.pending = serde_json::from_str(&content)?;
        self.update_next_ready();
        Ok(())
    }

    fn update_next_ready(&mut self) {
        self.next_ready = self.pending.values().map(|p| p.debounce_until).min();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Owner, Task};
    use tempfile::TempDir;

    fn queue(dir: &TempDir) -> OutboundQueue {
        OutboundQueue::open(dir.path().join("queue.json")).unwrap()
    }

    fn task_envelope(task: &Task) -> EventEnvelope {
        EventEnvelope::for_task(task, "nextup-test", None).unwrap()
    }

    #[test]
    fn debounce_holds_then_releases() {
        let dir = TempDir::new().unwrap();
        let mut q = queue(&dir);
        let now = Utc::now();
        q.enqueue(task_envelope(&Task::new("t", Owner::Device("d".into()))), now);

        assert!(q.drain_ready(10, now).is_empty());
        assert_eq!(q.len(), 1);
        let later = now + Duration::seconds(DEBOUNCE_SECONDS);
        assert_eq!(q.drain_ready(10, later).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn same_entity_coalesces_to_latest() {
        let dir = TempDir::new().unwrap();
        let mut q = queue(&dir);
        let now = Utc::now();
        let mut task = Task::new("t", Owner::Device("d".into()));
        q.enqueue(task_envelope(&task), now);
        task.touch(now + Duration::seconds(1));
        q.enqueue(task_envelope(&task), now + Duration::seconds(1));

        assert_eq!(q.len(), 1);
        let drained = q.drain_ready(10, now + Duration::seconds(10));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event_version, 2);
    }

    #[test]
    fn drain_respects_limit_and_age_order() {
        let dir = TempDir::new().unwrap();
        let mut q = queue(&dir);
        let now = Utc::now();
        for i in 0..5 {
            let mut task = Task::new(format!("t{i}"), Owner::Device("d".into()));
            task.updated_at = now + Duration::seconds(i);
            q.enqueue(task_envelope(&task), now);
        }
        let later = now + Duration::seconds(10);
        let first = q.drain_ready(3, later);
        assert_eq!(first.len(), 3);
        assert_eq!(q.len(), 2);
        // Oldest mutations drain first.
        assert!(first[0].occurred_at <= first[1].occurred_at);
        assert!(first[1].occurred_at <= first[2].occurred_at);
    }

    #[test]
    fn drain_all_ignores_debounce() {
        let dir = TempDir::new().unwrap();
        let mut q = queue(&dir);
        let now = Utc::now();
        q.enqueue(task_envelope(&Task::new("t", Owner::Device("d".into()))), now);
        assert_eq!(q.drain_all().len(), 1);
        assert!(q.time_until_ready(now).is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let task = Task::new("t", Owner::Device("d".into()));
        {
            let mut q = queue(&dir);
            q.enqueue(task_envelope(&task), now);
            q.persist().unwrap();
        }
        let mut reopened = queue(&dir);
        assert_eq!(reopened.len(), 1);
        let drained = reopened.drain_ready(10, now + Duration::seconds(10));
        assert_eq!(drained[0].entity_id, task.id);
    }

    #[test]
    fn time_until_ready_tracks_earliest_entry() {
        let dir = TempDir::new().unwrap();
        let mut q = queue(&dir);
        let now = Utc::now();
        assert!(q.time_until_ready(now).is_none());
        q.enqueue(task_envelope(&Task::new("t", Owner::Device("d".into()))), now);
        let wait = q.time_until_ready(now).unwrap();
        assert_eq!(wait, Duration::seconds(DEBOUNCE_SECONDS));
    }
}
