//! Sync latency accounting.
//!
//! The accumulators live inside the shared sync state and are only written
//! by the worker, under the state lock, right after a sync returns. Readers
//! take a [`SyncStatsSnapshot`] under the same lock, so a snapshot is always
//! consistent with the watermarks observed alongside it.

use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Running totals over every completed sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LatencyStats {
    sync_count: u64,
    total_nanos: u64,
    max_nanos: u64,
}

impl LatencyStats {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.sync_count = self.sync_count.saturating_add(1);
        self.total_nanos = self.total_nanos.saturating_add(nanos);
        self.max_nanos = self.max_nanos.max(nanos);
    }

    pub(crate) fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            sync_count: self.sync_count,
            total_nanos: self.total_nanos,
            max_nanos: self.max_nanos,
        }
    }
}

/// Point-in-time copy of the sync latency counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    /// Number of completed sync calls.
    pub sync_count: u64,
    /// Sum of all sync durations, in nanoseconds.
    pub total_nanos: u64,
    /// Longest single sync, in nanoseconds.
    pub max_nanos: u64,
}

/// Named metric sample derived from a [`SyncStatsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMetricSample {
    pub name: &'static str,
    pub value: u64,
}

impl SyncStatsSnapshot {
    #[must_use]
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos)
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos)
    }

    /// Mean sync duration, or zero before the first sync.
    #[must_use]
    pub fn avg(&self) -> Duration {
        if self.sync_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_nanos / self.sync_count)
        }
    }

    /// Render the counters as `key:value` lines for an INFO-style report.
    #[must_use]
    pub fn render_info(&self) -> String {
        let mut out = String::new();
        for sample in self.samples() {
            let _ = write!(out, "{}:{}\r\n", sample.name, sample.value);
        }
        out
    }

    /// Counters with stable metric names, latencies in microseconds.
    pub fn samples(&self) -> impl Iterator<Item = SyncMetricSample> {
        const METRIC_NAMES: [(&str, fn(&SyncStatsSnapshot) -> u64); 4] = [
            ("fsync_count", |s| s.sync_count),
            ("fsync_total_microseconds", |s| s.total_nanos / 1_000),
            ("fsync_avg_microseconds", |s| micros(s.avg())),
            ("fsync_max_microseconds", |s| s.max_nanos / 1_000),
        ];
        let snapshot = *self;
        METRIC_NAMES
            .into_iter()
            .map(move |(name, accessor)| SyncMetricSample {
                name,
                value: accessor(&snapshot),
            })
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
