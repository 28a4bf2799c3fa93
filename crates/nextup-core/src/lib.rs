//! # Nextup Core Library
//!
//! Core engine for the nextup task prioritizer. It answers one question,
//! "what should I work on right now", by scoring every eligible task and
//! drawing the next one, then runs the countdown for the pick and keeps
//! a user's devices in agreement about the task list.
//!
//! The library is UI-free by design: a CLI, a desktop shell or a daemon
//! drive it through the same API and observe it through the event bus.
//!
//! ## Key components
//!
//! - [`Task`] and [`task::lifecycle`]: the task model and its
//!   Active/Snoozed/Completed state machine with auto-resume
//! - [`scoring`] and [`selector`]: the scoring formula and the
//!   weighted-random draw
//! - [`ShuffleCoordinator`]: the pick-and-countdown loop, wall-clock
//!   based so it survives restarts
//! - [`sync`]: version-based last-writer-wins replication between
//!   paired devices over a direct TCP link
//! - [`Storage`] and [`Notifier`]: contracts the embedding application
//!   implements

pub mod bus;
pub mod error;
pub mod events;
pub mod notify;
pub mod period;
pub mod scoring;
pub mod selector;
pub mod settings;
pub mod shuffle;
pub mod storage;
pub mod sync;
pub mod task;

pub use bus::EventBus;
pub use error::{CoreError, Result, SettingsError, StorageError, SyncError};
pub use events::Event;
pub use notify::Notifier;
pub use period::{AllowedPeriod, PeriodDefinition};
pub use scoring::{score, ScoreBreakdown, ScoredTask};
pub use selector::{pick_next, SelectionMode, ShuffleOrigin};
pub use settings::AppSettings;
pub use shuffle::{ShuffleCoordinator, ShufflePhase, ShuffleSnapshot, ShuffleState};
pub use storage::{MemoryStore, OwnerFilter, Storage};
pub use sync::{SyncEngine, SyncLink, SyncStatus};
pub use task::{CutInLine, Owner, RepeatRule, Task, TaskStatus, TimerMode, TimerOverride};
