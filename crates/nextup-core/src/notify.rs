//! Notification contract.
//!
//! Platform delivery (and its survive-backgrounding guarantees) is the
//! collaborator's responsibility; the core treats both calls as
//! fire-and-forget. The deferred variant is the correctness mechanism
//! for timer expiry across process restarts -- the coordinator never
//! relies on an in-memory timer alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Abstract "deliver a notification" collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver at `deliver_at`, even if the process is gone by then.
    async fn schedule(&self, title: &str, body: &str, deliver_at: DateTime<Utc>, sound: bool);

    /// Deliver immediately.
    async fn show_now(&self, title: &str, body: &str, sound: bool);
}

/// A delivered or scheduled notification, captured for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedNotification {
    pub title: String,
    pub body: String,
    pub deliver_at: Option<DateTime<Utc>>,
    pub sound: bool,
}

/// Test double that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    recorded: std::sync::Mutex<Vec<RecordedNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<RecordedNotification> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn schedule(&self, title: &str, body: &str, deliver_at: DateTime<Utc>, sound: bool) {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedNotification {
            title: title.to_string(),
            body: body.to_string(),
            deliver_at: Some(deliver_at),
            sound,
        });
    }

    async fn show_now(&self, title: &str, body: &str, sound: bool) {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedNotification {
            title: title.to_string(),
            body: body.to_string(),
            deliver_at: None,
            sound,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_notifier_captures_both_kinds() {
        let notifier = RecordingNotifier::new();
        let at = Utc::now();
        notifier.schedule("Time's up", "Task done?", at, true).await;
        notifier.show_now("On a break", "Next window in 45 minutes", false).await;

        let recorded = notifier.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].deliver_at, Some(at));
        assert!(recorded[1].deliver_at.is_none());
        assert!(!recorded[1].sound);
    }
}
