//! Terminal notifier.
//!
//! The CLI has no desktop notification channel; immediate notices print
//! to stdout and deferred ones print when they were scheduled, so the
//! user sees when the countdown will end.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};

use nextup_core::Notifier;

pub struct TerminalNotifier;

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn schedule(&self, title: &str, _body: &str, deliver_at: DateTime<Utc>, _sound: bool) {
        let local = deliver_at.with_timezone(&Local);
        println!("(timer) {} at {}", title, local.format("%H:%M:%S"));
    }

    async fn show_now(&self, title: &str, body: &str, _sound: bool) {
        println!("{title}: {body}");
    }
}
