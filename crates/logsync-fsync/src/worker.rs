//! The fsync worker loop.
//!
//! Idle: parked in [`SharedSyncState::next_job`]. Syncing: holding only the
//! captured job, never the state lock. After each sync the latency and
//! watermark are folded in under the lock; the completion token is written
//! only after that lock is released, so anyone woken by the token sees the
//! new `synced_index`.

use crate::clock::Clock;
use crate::notifier::WakeSender;
use crate::state::{CycleOutcome, SharedSyncState};
use logsync_error::FatalError;
use logsync_types::SyncMode;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub(crate) sync_mode: SyncMode,
    pub(crate) slow_sync_threshold: Option<Duration>,
}

/// Drive sync cycles until shutdown.
///
/// Returns `Ok(())` only after shutdown was requested and nothing is
/// pending. Any `Err` is fatal and must end in [`fail_stop`].
pub(crate) fn run(
    shared: &SharedSyncState,
    wake: &WakeSender,
    clock: &dyn Clock,
    settings: WorkerSettings,
) -> Result<(), FatalError> {
    tracing::debug!(
        target: "logsync::fsync",
        sync_mode = %settings.sync_mode,
        "fsync_worker_started"
    );

    while let Some(job) = shared.next_job() {
        let started = clock.now();
        job.target
            .sync(settings.sync_mode)
            .map_err(|source| FatalError::Sync {
                index: job.index.0,
                source,
            })?;
        let elapsed = clock.now().saturating_sub(started);
        drop(job.target);

        if let Some(threshold) = settings.slow_sync_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    target: "logsync::fsync",
                    index = job.index.0,
                    elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
                    threshold_us = u64::try_from(threshold.as_micros()).unwrap_or(u64::MAX),
                    "slow_sync"
                );
            }
        }

        match shared.finish_job(job.index, elapsed) {
            CycleOutcome::Completed => {
                tracing::debug!(
                    target: "logsync::fsync",
                    index = job.index.0,
                    elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
                    "sync_cycle_completed"
                );
                wake.notify().map_err(FatalError::Notify)?;
            }
            CycleOutcome::Coalesced => {
                tracing::debug!(
                    target: "logsync::fsync",
                    index = job.index.0,
                    "sync_superseded_resyncing"
                );
            }
        }
    }

    tracing::debug!(target: "logsync::fsync", "fsync_worker_stopped");
    Ok(())
}

/// [`run`], with a panic unwinding out of it turned into
/// [`FatalError::WorkerPanic`].
///
/// Without this a panicking [`SyncTarget`](crate::SyncTarget) would end the
/// thread quietly and leave every waiter blocked.
pub(crate) fn run_guarded(
    shared: &SharedSyncState,
    wake: &WakeSender,
    clock: &dyn Clock,
    settings: WorkerSettings,
) -> Result<(), FatalError> {
    panic::catch_unwind(AssertUnwindSafe(|| run(shared, wake, clock, settings)))
        .unwrap_or_else(|payload| Err(FatalError::WorkerPanic(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Report a lost-durability failure and terminate the process.
pub(crate) fn fail_stop(err: &FatalError) -> ! {
    tracing::error!(
        target: "logsync::fsync",
        error = %err,
        errno = err.raw_os_error().unwrap_or(0),
        "fsync_worker_fatal"
    );
    eprintln!("logsync: fatal: {err}");
    std::process::abort()
}
