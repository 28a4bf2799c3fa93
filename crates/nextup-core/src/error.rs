//! Core error types for nextup-core.
//!
//! One enum per concern, aggregated into [`CoreError`]. "Not found" is
//! deliberately not an error anywhere in the library -- lookups return
//! `Ok(None)` and callers treat absence as a normal condition.

use thiserror::Error;

use crate::task::TransitionError;

/// Core error type for nextup-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The backing store is unavailable or failed mid-operation.
    /// Propagated to the caller; the core never retries storage itself.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A task or settings record violates a model invariant.
    /// The mutation is rejected and the prior persisted value kept.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An illegal lifecycle transition was requested.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Settings load/save failure.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Sync-layer failure (connection, handshake, codec).
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage collaborator errors.
///
/// The storage engine itself is external; this is the failure surface
/// the core expects from the contract.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict on {id}")]
    WriteConflict { id: String },

    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },
}

/// Settings load/save/normalization errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings from {path}: {message}")]
    LoadFailed { path: std::path::PathBuf, message: String },

    #[error("Failed to save settings to {path}: {message}")]
    SaveFailed { path: std::path::PathBuf, message: String },

    #[error("Invalid settings value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unsupported settings schema version {0}")]
    UnsupportedSchema(u32),
}

/// Sync protocol and peer-link errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Peer unreachable or handshake failed. Never fatal to local
    /// operation; the link retries with backoff.
    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Handshake rejected by peer")]
    HandshakeRejected,

    #[error("Malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Flush deadline elapsed with {pending} events still queued")]
    FlushIncomplete { pending: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CoreError.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
