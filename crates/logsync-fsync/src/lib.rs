#![forbid(unsafe_code)]
//! Background fsync offload for a replicated log.
//!
//! The log writer appends, then calls [`FsyncThread::submit`] with the file
//! and the index it just wrote. A dedicated worker performs the blocking
//! `fsync` outside the state lock and advances the durability watermark.
//! Callers learn about progress three ways:
//!
//! - polling: [`FsyncThread::synced_index`] / [`FsyncThread::progress`];
//! - blocking: [`FsyncThread::wait_until_completed`] and friends;
//! - event-driven: the [`WakeReceiver`] returned by [`FsyncThread::start`]
//!   becomes readable after every completed sync cycle.
//!
//! Requests coalesce: at most one sync is in flight, and a new request while
//! it runs just moves the target forward. A failed `fsync` aborts the
//! process.

mod clock;
mod config;
mod notifier;
mod state;
mod stats;
mod target;
mod thread;
mod worker;

pub use clock::{Clock, ManualClock, MonotonicClock, monotonic_nanos};
pub use config::{ENV_SLOW_SYNC_MS, ENV_SYNC_MODE, ENV_THREAD_NAME, FsyncConfig};
pub use notifier::{WakeReceiver, WakeSender, wake_channel};
pub use state::{SyncProgress, WaitOutcome};
pub use stats::{SyncMetricSample, SyncStatsSnapshot};
pub use target::SyncTarget;
pub use thread::FsyncThread;

pub use logsync_types::{LogIndex, SyncMode};
