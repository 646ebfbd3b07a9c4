//! Shared sync state: the hand-off point between the log writer and the
//! fsync worker.
//!
//! # Protocol
//!
//! - The foreground calls [`SharedSyncState::submit`]: it overwrites the
//!   target and `requested_index`, raises `pending`, clears `completed`, and
//!   wakes the worker. It never blocks beyond the lock.
//! - The worker calls [`SharedSyncState::next_job`]: it sleeps until
//!   `pending` is raised, captures index and target, lowers `pending`, and
//!   returns the job so the sync can run with the lock released.
//! - After the sync the worker calls [`SharedSyncState::finish_job`]: it
//!   records latency, advances `synced_index`, and either completes the
//!   cycle (`pending` still low) or reports that a newer request arrived
//!   while it was syncing (`pending` raised again), in which case it goes
//!   straight back to `next_job`.
//!
//! Requests are coalesced, never queued: a submit while a sync is in flight
//! only moves the target forward, and the next sync covers everything.
//!
//! # Invariants
//!
//! - `synced_index <= requested_index`.
//! - `completed` implies `!pending`.
//! - `completed` is `true` before the first submit.
//!
//! Two condition variables share the one mutex. `work_ready` is only ever
//! waited on by the worker; `cycle_done` only by foreground waiters and is
//! always broadcast.

use crate::stats::{LatencyStats, SyncStatsSnapshot};
use crate::target::SyncTarget;
use logsync_types::LogIndex;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SyncState {
    requested_index: LogIndex,
    synced_index: LogIndex,
    target: Option<Arc<dyn SyncTarget>>,
    pending: bool,
    completed: bool,
    shutdown: bool,
    latency: LatencyStats,
}

/// Consistent view of the watermarks, taken under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    /// Highest index a sync has been requested for.
    pub requested: LogIndex,
    /// Highest index known durable.
    pub synced: LogIndex,
    /// No sync work outstanding.
    pub completed: bool,
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

/// Work captured by the worker under the lock.
pub(crate) struct SyncJob {
    pub(crate) index: LogIndex,
    pub(crate) target: Arc<dyn SyncTarget>,
}

/// What the worker should do after a sync returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// Nothing newer was requested; waiters were woken and the completion
    /// notifier must fire.
    Completed,
    /// A newer request arrived during the sync; sync again before notifying.
    Coalesced,
}

pub(crate) struct SharedSyncState {
    state: Mutex<SyncState>,
    work_ready: Condvar,
    cycle_done: Condvar,
}

impl SharedSyncState {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                requested_index: LogIndex::ZERO,
                synced_index: LogIndex::ZERO,
                target: None,
                pending: false,
                completed: true,
                shutdown: false,
                latency: LatencyStats::default(),
            }),
            work_ready: Condvar::new(),
            cycle_done: Condvar::new(),
        }
    }

    // ── Foreground side ─────────────────────────────────────────────────────

    pub(crate) fn submit(&self, target: Arc<dyn SyncTarget>, index: LogIndex) {
        let mut state = self.state.lock();
        if index < state.requested_index {
            tracing::warn!(
                target: "logsync::fsync",
                index = index.0,
                requested_index = state.requested_index.0,
                "submit_index_regressed"
            );
        } else {
            state.requested_index = index;
        }
        state.target = Some(target);
        state.pending = true;
        state.completed = false;
        self.work_ready.notify_one();
        drop(state);

        tracing::trace!(target: "logsync::fsync", index = index.0, "sync_submitted");
    }

    pub(crate) fn synced_index(&self) -> LogIndex {
        self.state.lock().synced_index
    }

    pub(crate) fn requested_index(&self) -> LogIndex {
        self.state.lock().requested_index
    }

    pub(crate) fn progress(&self) -> SyncProgress {
        let state = self.state.lock();
        SyncProgress {
            requested: state.requested_index,
            synced: state.synced_index,
            completed: state.completed,
        }
    }

    pub(crate) fn stats(&self) -> SyncStatsSnapshot {
        self.state.lock().latency.snapshot()
    }

    pub(crate) fn wait_until_completed(&self) {
        let mut state = self.state.lock();
        while !state.completed {
            self.cycle_done.wait(&mut state);
        }
    }

    /// A `timeout` whose deadline cannot be represented waits without one.
    pub(crate) fn wait_until_completed_timeout(&self, timeout: Duration) -> WaitOutcome {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_until_completed();
            return WaitOutcome::Completed;
        };
        let mut state = self.state.lock();
        while !state.completed {
            if self
                .cycle_done
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return if state.completed {
                    WaitOutcome::Completed
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
        WaitOutcome::Completed
    }

    pub(crate) fn wait_until_synced(&self, index: LogIndex) {
        let mut state = self.state.lock();
        while state.synced_index < index {
            self.cycle_done.wait(&mut state);
        }
    }

    pub(crate) fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.work_ready.notify_one();
    }

    // ── Worker side ─────────────────────────────────────────────────────────

    /// Block until there is a request to drain.
    ///
    /// Returns `None` once shutdown has been requested and nothing is
    /// pending; a pending request is always handed out first.
    pub(crate) fn next_job(&self) -> Option<SyncJob> {
        let mut state = self.state.lock();
        loop {
            if state.pending {
                state.pending = false;
                if let Some(target) = state.target.clone() {
                    let index = state.requested_index;
                    tracing::trace!(target: "logsync::fsync", index = index.0, "sync_job_captured");
                    return Some(SyncJob { index, target });
                }
            }
            if state.shutdown {
                return None;
            }
            self.work_ready.wait(&mut state);
        }
    }

    pub(crate) fn finish_job(&self, index: LogIndex, elapsed: Duration) -> CycleOutcome {
        let mut state = self.state.lock();
        state.latency.record(elapsed);
        if index > state.synced_index {
            state.synced_index = index;
        }
        let outcome = if state.pending {
            CycleOutcome::Coalesced
        } else {
            state.completed = true;
            CycleOutcome::Completed
        };
        // Index waiters care about every advance, not just completed cycles.
        self.cycle_done.notify_all();
        outcome
    }
}
