#![forbid(unsafe_code)]
//! Error types for logsync.
//!
//! # Error Taxonomy
//!
//! logsync separates errors a caller can act on from errors that end the
//! process:
//!
//! | Kind | Type | Who sees it | Outcome |
//! |------|------|-------------|---------|
//! | Setup / configuration | [`LogSyncError`] | Caller of `FsyncThread::start`, CLI | Returned through [`Result`] |
//! | Lost durability | [`FatalError`] | The fsync worker's fail-stop path only | Logged, then `abort()` |
//!
//! ## `FatalError` is not a `LogSyncError` variant
//!
//! A failed `fsync` means an index the log may already have acknowledged is
//! not on disk. `FatalError` never flows through a `Result` handed to
//! foreground code: the worker loop returns it to its own thread entry point,
//! which logs it and terminates the process. There is no `From<FatalError>`
//! for `LogSyncError`.
//!
//! ## Design Constraints
//!
//! - `logsync-error` MUST NOT depend on `logsync-types`; indices are carried
//!   as raw `u64` here.
//! - All string payloads are owned (`String`).

use thiserror::Error;

/// Recoverable errors surfaced by the logsync API and CLI.
#[derive(Debug, Error)]
pub enum LogSyncError {
    /// The dedicated fsync worker thread could not be started.
    ///
    /// The process must not go on serving requests without a durability
    /// path; callers are expected to exit on this error.
    #[error("failed to spawn fsync worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The completion wake channel could not be created or configured.
    #[error("failed to create wake channel: {0}")]
    WakeChannel(#[source] std::io::Error),

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fsync worker thread panicked before it could be joined.
    #[error("fsync worker panicked")]
    WorkerPanicked,
}

/// Unrecoverable failures inside the fsync worker.
///
/// Never returned to foreground callers; see the crate docs.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The durability call itself failed.
    #[error("fsync failed at log index {index}: {source}")]
    Sync {
        /// The log index the failed sync was meant to make durable.
        index: u64,
        #[source]
        source: std::io::Error,
    },

    /// Writing the completion token to the wake channel failed.
    #[error("completion notifier write failed: {0}")]
    Notify(#[source] std::io::Error),

    /// The worker unwound out of its loop, typically from a panicking
    /// `SyncTarget`. Outstanding requests can no longer be served.
    #[error("fsync worker panicked: {0}")]
    WorkerPanic(String),
}

impl FatalError {
    /// The OS error code behind this failure, if there is one.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Sync { source, .. } | Self::Notify(source) => source.raw_os_error(),
            Self::WorkerPanic(_) => None,
        }
    }
}

/// Result alias using `LogSyncError`.
pub type Result<T> = std::result::Result<T, LogSyncError>;
