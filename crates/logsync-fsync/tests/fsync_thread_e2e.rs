#![forbid(unsafe_code)]
//! End-to-end tests for the fsync worker.
//!
//! Scenarios tested:
//! 1. Liveness and safety under a stream of increasing submits.
//! 2. Blocking waits only return after a full cycle covering the latest submit.
//! 3. Coalescing: requests arriving during a sync share one follow-up sync.
//! 4. Latency accounting is exact under a manual clock.
//! 5. The completion notifier yields one edge per completed cycle.
//! 6. Real files in both sync modes.
//! 7. Shutdown and drop drain pending work.

use logsync_error::LogSyncError;
use logsync_fsync::{
    FsyncConfig, FsyncThread, LogIndex, ManualClock, SyncMode, SyncTarget, WaitOutcome,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn quiet_config() -> FsyncConfig {
    FsyncConfig {
        slow_sync_threshold: None,
        ..FsyncConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Instrumented targets
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingTarget {
    calls: AtomicUsize,
}

impl CountingTarget {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl SyncTarget for CountingTarget {
    fn sync(&self, _mode: SyncMode) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Every sync reports entry, then blocks until the test releases it.
struct GatedTarget {
    calls: AtomicUsize,
    entered: Mutex<Sender<usize>>,
    release: Mutex<Receiver<()>>,
}

struct Gate {
    target: Arc<GatedTarget>,
    entered: Receiver<usize>,
    release: Sender<()>,
}

impl Gate {
    fn new() -> Self {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        Self {
            target: Arc::new(GatedTarget {
                calls: AtomicUsize::new(0),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Wait until the worker is blocked inside sync call number `n`.
    fn expect_entered(&self, n: usize) {
        let got = self.entered.recv_timeout(TIMEOUT).expect("worker entered sync");
        assert_eq!(got, n, "unexpected sync call number");
    }

    fn release_one(&self) {
        self.release.send(()).expect("gate open");
    }

    fn calls(&self) -> usize {
        self.target.calls.load(Ordering::Acquire)
    }
}

impl SyncTarget for GatedTarget {
    fn sync(&self, _mode: SyncMode) -> io::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        self.entered.lock().unwrap().send(n).ok();
        self.release
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| io::Error::other("gate dropped"))
    }
}

/// Advances a manual clock by a scripted duration on each sync.
struct ScriptedLatencyTarget {
    clock: Arc<ManualClock>,
    script: Mutex<VecDeque<Duration>>,
}

impl SyncTarget for ScriptedLatencyTarget {
    fn sync(&self, _mode: SyncMode) -> io::Result<()> {
        let step = self.script.lock().unwrap().pop_front().unwrap_or_default();
        self.clock.advance(step);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: liveness and safety
// ---------------------------------------------------------------------------

#[test]
fn increasing_submits_reach_last_index_without_overtaking_requests() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    let target = Arc::new(CountingTarget::default());
    let last = 500_u64;

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=last {
                fsync.submit(target.clone(), LogIndex(i));
                if i % 50 == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut previous = LogIndex::ZERO;
        loop {
            let progress = fsync.progress();
            assert!(
                progress.synced <= progress.requested,
                "synced {} overtook requested {}",
                progress.synced,
                progress.requested
            );
            assert!(progress.synced >= previous, "watermark went backwards");
            previous = progress.synced;
            if progress.synced == LogIndex(last) {
                break;
            }
            std::thread::yield_now();
        }
    });

    fsync.wait_until_completed();
    assert_eq!(fsync.synced_index(), LogIndex(last));
    assert_eq!(fsync.requested_index(), LogIndex(last));
    let calls = target.calls();
    assert!((1..=500).contains(&calls), "calls = {calls}");
    assert_eq!(fsync.stats().sync_count, calls as u64);
}

#[test]
fn wait_before_any_submit_returns_immediately() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    assert!(fsync.progress().completed);
    fsync.wait_until_completed();
    assert_eq!(
        fsync.wait_until_completed_timeout(Duration::ZERO),
        WaitOutcome::Completed
    );
    assert_eq!(
        fsync.wait_until_completed_timeout(Duration::MAX),
        WaitOutcome::Completed
    );
    assert_eq!(fsync.stats().sync_count, 0);
}

// ---------------------------------------------------------------------------
// Scenario 2: blocking wait semantics
// ---------------------------------------------------------------------------

#[test]
fn wait_blocks_until_cycle_covering_latest_submit() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    let gate = Gate::new();

    fsync.submit(gate.target.clone(), LogIndex(1));
    gate.expect_entered(1);
    fsync.submit(gate.target.clone(), LogIndex(2));
    assert_eq!(
        fsync.wait_until_completed_timeout(Duration::from_millis(20)),
        WaitOutcome::TimedOut
    );

    // First sync finishes, but index 2 arrived while it ran.
    gate.release_one();
    gate.expect_entered(2);
    assert_eq!(fsync.synced_index(), LogIndex(1));
    assert_eq!(
        fsync.wait_until_completed_timeout(Duration::from_millis(20)),
        WaitOutcome::TimedOut
    );
    assert!(!fsync.progress().completed);

    std::thread::scope(|s| {
        let waiter = s.spawn(|| {
            fsync.wait_until_completed();
            fsync.synced_index()
        });
        gate.release_one();
        assert_eq!(waiter.join().expect("no panic"), LogIndex(2));
    });
    assert!(fsync.progress().completed);
}

#[test]
fn wait_until_synced_returns_once_index_is_covered() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    let gate = Gate::new();

    fsync.submit(gate.target.clone(), LogIndex(4));
    gate.expect_entered(1);
    fsync.submit(gate.target.clone(), LogIndex(8));

    std::thread::scope(|s| {
        let waiter = s.spawn(|| {
            fsync.wait_until_synced(LogIndex(4));
            fsync.synced_index()
        });
        gate.release_one();
        // Index 4 is durable even though the cycle is still open for 8.
        assert!(waiter.join().expect("no panic") >= LogIndex(4));
    });

    gate.expect_entered(2);
    gate.release_one();
    fsync.wait_until_synced(LogIndex(8));
    assert_eq!(fsync.synced_index(), LogIndex(8));
}

// ---------------------------------------------------------------------------
// Scenario 3: coalescing
// ---------------------------------------------------------------------------

#[test]
fn requests_arriving_during_a_sync_share_one_followup() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    let gate = Gate::new();

    fsync.submit(gate.target.clone(), LogIndex(1));
    gate.expect_entered(1);

    // Worker is blocked in sync #1 and has not started draining these.
    fsync.submit(gate.target.clone(), LogIndex(5));
    fsync.submit(gate.target.clone(), LogIndex(9));
    assert_eq!(fsync.requested_index(), LogIndex(9));

    gate.release_one();
    gate.expect_entered(2);
    gate.release_one();
    fsync.wait_until_completed();

    assert_eq!(gate.calls(), 2, "5 and 9 must share a single sync");
    assert_eq!(fsync.synced_index(), LogIndex(9));
    assert_eq!(fsync.stats().sync_count, 2);
    assert!(
        gate.entered.recv_timeout(Duration::from_millis(50)).is_err(),
        "no third sync expected"
    );
}

// ---------------------------------------------------------------------------
// Scenario 4: latency accounting
// ---------------------------------------------------------------------------

#[test]
fn latency_counters_match_scripted_durations() {
    let clock = Arc::new(ManualClock::new());
    let script = [3_u64, 7, 5].map(Duration::from_millis);
    let target = Arc::new(ScriptedLatencyTarget {
        clock: Arc::clone(&clock),
        script: Mutex::new(script.into_iter().collect()),
    });
    let (fsync, _wake) =
        FsyncThread::start_with_clock(&quiet_config(), clock.clone()).expect("start");

    for i in 1..=3_u64 {
        fsync.submit(target.clone(), LogIndex(i));
        fsync.wait_until_completed();
    }

    let stats = fsync.stats();
    assert_eq!(stats.sync_count, 3);
    assert_eq!(stats.total(), Duration::from_millis(15));
    assert_eq!(stats.max(), Duration::from_millis(7));
    assert_eq!(stats.avg(), Duration::from_millis(5));
    assert!(stats.render_info().contains("fsync_max_microseconds:7000\r\n"));
}

#[test]
fn latency_is_recorded_before_completion_is_visible() {
    let clock = Arc::new(ManualClock::new());
    let target = Arc::new(ScriptedLatencyTarget {
        clock: Arc::clone(&clock),
        script: Mutex::new(VecDeque::from([Duration::from_millis(2)])),
    });
    let (fsync, mut wake) =
        FsyncThread::start_with_clock(&quiet_config(), clock.clone()).expect("start");

    fsync.submit(target, LogIndex(1));
    assert_eq!(wake.wait_timeout(TIMEOUT).expect("edge"), 1);
    let stats = fsync.stats();
    assert_eq!(stats.sync_count, 1);
    assert_eq!(stats.total(), Duration::from_millis(2));
}

// ---------------------------------------------------------------------------
// Scenario 5: completion notifier
// ---------------------------------------------------------------------------

#[test]
fn notifier_yields_one_edge_per_completed_cycle() {
    let (fsync, mut wake) = FsyncThread::start(&quiet_config()).expect("start");
    let gate = Gate::new();

    fsync.submit(gate.target.clone(), LogIndex(1));
    gate.expect_entered(1);
    assert_eq!(wake.drain().expect("drain"), 0, "no edge before sync ends");
    gate.release_one();
    assert_eq!(wake.wait_timeout(TIMEOUT).expect("edge"), 1);
    assert_eq!(fsync.synced_index(), LogIndex(1));

    fsync.submit(gate.target.clone(), LogIndex(2));
    gate.expect_entered(2);
    fsync.submit(gate.target.clone(), LogIndex(3));
    gate.release_one();
    gate.expect_entered(3);
    assert_eq!(wake.drain().expect("drain"), 0, "superseded sync must not signal");
    gate.release_one();

    assert_eq!(wake.wait_timeout(TIMEOUT).expect("edge"), 1);
    assert_eq!(fsync.synced_index(), LogIndex(3));
    assert!(fsync.progress().completed);
    assert_eq!(
        wake.wait_timeout(Duration::from_millis(50)).expect("wait"),
        0,
        "only one edge for the 2+3 cycle"
    );
}

#[test]
fn dropping_the_receiver_does_not_stop_the_worker() {
    let (fsync, wake) = FsyncThread::start(&quiet_config()).expect("start");
    drop(wake);
    let target = Arc::new(CountingTarget::default());
    for i in 1..=3_u64 {
        fsync.submit(target.clone(), LogIndex(i));
        fsync.wait_until_completed();
    }
    assert_eq!(fsync.synced_index(), LogIndex(3));
}

// ---------------------------------------------------------------------------
// Scenario 6: real files
// ---------------------------------------------------------------------------

#[test]
fn syncs_a_real_log_file_in_both_modes() {
    for mode in [SyncMode::Full, SyncMode::Data] {
        let config = FsyncConfig {
            sync_mode: mode,
            ..quiet_config()
        };
        let (fsync, mut wake) = FsyncThread::start(&config).expect("start");
        let mut file = tempfile::tempfile().expect("tempfile");
        let handle = Arc::new(file.try_clone().expect("clone fd"));

        for i in 1..=10_u64 {
            writeln!(file, "entry {i}").expect("append");
            fsync.submit(handle.clone(), LogIndex(i));
        }
        fsync.wait_until_synced(LogIndex(10));
        assert_eq!(fsync.synced_index(), LogIndex(10));
        assert!(wake.wait_timeout(TIMEOUT).expect("edge") >= 1);
        assert!(fsync.stats().sync_count >= 1);
    }
}

// ---------------------------------------------------------------------------
// Scenario 7: teardown
// ---------------------------------------------------------------------------

#[test]
fn shutdown_syncs_pending_request_first() {
    let (fsync, wake) = FsyncThread::start(&quiet_config()).expect("start");
    let gate = Gate::new();

    fsync.submit(gate.target.clone(), LogIndex(1));
    gate.expect_entered(1);
    fsync.submit(gate.target.clone(), LogIndex(2));

    std::thread::scope(|s| {
        let stopper = s.spawn(move || fsync.shutdown());
        gate.release_one();
        gate.expect_entered(2);
        gate.release_one();
        let stats = stopper.join().expect("no panic").expect("clean shutdown");
        assert_eq!(stats.sync_count, 2);
    });
    assert_eq!(wake.drain().expect("drain"), 1);
}

#[test]
fn drop_joins_idle_worker() {
    let (fsync, _wake) = FsyncThread::start(&quiet_config()).expect("start");
    let target = Arc::new(CountingTarget::default());
    fsync.submit(target.clone(), LogIndex(1));
    drop(fsync);
    assert_eq!(target.calls(), 1);
}

#[test]
fn invalid_config_fails_at_start() {
    let config = FsyncConfig {
        thread_name: String::new(),
        ..FsyncConfig::default()
    };
    let err = FsyncThread::start(&config).unwrap_err();
    assert!(matches!(err, LogSyncError::InvalidConfig(_)));
}
