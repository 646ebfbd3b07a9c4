//! Request/query API: the handle the log writer holds.

use crate::clock::{Clock, MonotonicClock};
use crate::config::FsyncConfig;
use crate::notifier::{WakeReceiver, wake_channel};
use crate::state::{SharedSyncState, SyncProgress, WaitOutcome};
use crate::stats::SyncStatsSnapshot;
use crate::target::SyncTarget;
use crate::worker::{self, WorkerSettings};
use logsync_error::{LogSyncError, Result};
use logsync_types::LogIndex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Owner of the fsync worker thread and its shared state.
///
/// All methods take `&self`; share it across foreground threads with an
/// `Arc` or scoped threads. Dropping it stops the worker after any pending
/// request has been synced.
pub struct FsyncThread {
    shared: Arc<SharedSyncState>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FsyncThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsyncThread")
            .field("progress", &self.shared.progress())
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl FsyncThread {
    /// Start the worker with the process monotonic clock.
    ///
    /// Returns the handle and the read end of the completion channel.
    pub fn start(config: &FsyncConfig) -> Result<(Self, WakeReceiver)> {
        Self::start_with_clock(config, Arc::new(MonotonicClock))
    }

    /// Start the worker, measuring sync latency with `clock`.
    pub fn start_with_clock(
        config: &FsyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, WakeReceiver)> {
        config.validate()?;
        let (wake_tx, wake_rx) = wake_channel().map_err(LogSyncError::WakeChannel)?;
        let shared = Arc::new(SharedSyncState::new());
        let settings = WorkerSettings {
            sync_mode: config.sync_mode,
            slow_sync_threshold: config.slow_sync_threshold,
        };

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || {
                    let outcome =
                        worker::run_guarded(&shared, &wake_tx, clock.as_ref(), settings);
                    if let Err(err) = outcome {
                        worker::fail_stop(&err);
                    }
                })
                .map_err(LogSyncError::Spawn)?
        };

        tracing::info!(
            target: "logsync::fsync",
            thread_name = %config.thread_name,
            sync_mode = %config.sync_mode,
            "fsync_thread_started"
        );

        Ok((
            Self {
                shared,
                worker: Some(worker),
            },
            wake_rx,
        ))
    }

    /// Ask for everything written to `target` so far to be made durable,
    /// marking it as log position `index`.
    ///
    /// Never blocks. Indices must not decrease across calls. A submit while
    /// a sync is in flight replaces the pending target and index; the worker
    /// always syncs to the latest request.
    pub fn submit(&self, target: Arc<dyn SyncTarget>, index: LogIndex) {
        self.shared.submit(target, index);
    }

    /// Highest log index known durable.
    #[must_use]
    pub fn synced_index(&self) -> LogIndex {
        self.shared.synced_index()
    }

    /// Highest log index a sync has been requested for.
    #[must_use]
    pub fn requested_index(&self) -> LogIndex {
        self.shared.requested_index()
    }

    #[must_use]
    pub fn progress(&self) -> SyncProgress {
        self.shared.progress()
    }

    /// Block until no sync work is outstanding.
    ///
    /// Returns only after a full sync cycle has finished that started after
    /// the most recent [`submit`](Self::submit).
    pub fn wait_until_completed(&self) {
        self.shared.wait_until_completed();
    }

    /// Like [`wait_until_completed`](Self::wait_until_completed), giving up
    /// after `timeout`. The in-flight sync is not affected.
    pub fn wait_until_completed_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.shared.wait_until_completed_timeout(timeout)
    }

    /// Block until `synced_index >= index`.
    ///
    /// `index` must already have been submitted, or this never returns.
    pub fn wait_until_synced(&self, index: LogIndex) {
        self.shared.wait_until_synced(index);
    }

    #[must_use]
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.shared.stats()
    }

    /// Stop the worker once any pending request is synced, and return the
    /// final counters.
    pub fn shutdown(mut self) -> Result<SyncStatsSnapshot> {
        self.stop_worker()?;
        Ok(self.shared.stats())
    }

    fn stop_worker(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.shared.request_shutdown();
        worker.join().map_err(|_| LogSyncError::WorkerPanicked)?;
        tracing::info!(
            target: "logsync::fsync",
            synced_index = self.shared.synced_index().0,
            "fsync_thread_stopped"
        );
        Ok(())
    }
}

impl Drop for FsyncThread {
    fn drop(&mut self) {
        if let Err(err) = self.stop_worker() {
            tracing::error!(target: "logsync::fsync", error = %err, "fsync_thread_stop_failed");
        }
    }
}
