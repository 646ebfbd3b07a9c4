#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use logsync::{FsyncConfig, FsyncThread, LogIndex, SyncStatsSnapshot, WakeReceiver};
use serde::Serialize;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("append") => append_cmd(&AppendArgs::parse(&args[1..])?),
        Some("sync") => sync_cmd(&SyncArgs::parse(&args[1..])?),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AppendArgs {
    path: PathBuf,
    entries: u64,
    batch: u64,
    record_bytes: usize,
    json: bool,
}

impl AppendArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let path = args
            .first()
            .filter(|arg| !arg.starts_with("--"))
            .context("usage: logsync-cli append <path> [--entries N] [--batch N] [--record-bytes N] [--json]")?;
        let mut parsed = Self {
            path: PathBuf::from(path),
            entries: 1000,
            batch: 1,
            record_bytes: 128,
            json: false,
        };

        let mut index = 1_usize;
        while index < args.len() {
            match args[index].as_str() {
                "--entries" => {
                    let raw = args.get(index + 1).context("--entries requires a value")?;
                    parsed.entries = raw.parse().context("invalid --entries value")?;
                    index += 2;
                }
                "--batch" => {
                    let raw = args.get(index + 1).context("--batch requires a value")?;
                    parsed.batch = raw.parse().context("invalid --batch value")?;
                    index += 2;
                }
                "--record-bytes" => {
                    let raw = args
                        .get(index + 1)
                        .context("--record-bytes requires a value")?;
                    parsed.record_bytes = raw.parse().context("invalid --record-bytes value")?;
                    index += 2;
                }
                "--json" => {
                    parsed.json = true;
                    index += 1;
                }
                other => bail!("unknown append option: {other}"),
            }
        }

        if parsed.batch == 0 {
            bail!("--batch must be at least 1");
        }
        if parsed.record_bytes == 0 {
            bail!("--record-bytes must be at least 1");
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncArgs {
    path: PathBuf,
    json: bool,
}

impl SyncArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let path = args
            .first()
            .filter(|arg| !arg.starts_with("--"))
            .context("usage: logsync-cli sync <path> [--json]")?;
        let mut json = false;
        for arg in &args[1..] {
            match arg.as_str() {
                "--json" => json = true,
                other => bail!("unknown sync option: {other}"),
            }
        }
        Ok(Self {
            path: PathBuf::from(path),
            json,
        })
    }
}

#[derive(Debug, Serialize)]
struct AppendReport {
    path: String,
    sync_mode: String,
    entries: u64,
    batch: u64,
    record_bytes: usize,
    synced_index: LogIndex,
    /// Completion edges observed on the wake channel while appending.
    wakeups_seen: usize,
    elapsed_ms: u64,
    stats: SyncStatsSnapshot,
}

#[derive(Debug, Serialize)]
struct SyncReport {
    path: String,
    sync_mode: String,
    elapsed_us: u64,
    stats: SyncStatsSnapshot,
}

fn append_cmd(args: &AppendArgs) -> Result<()> {
    let config = FsyncConfig::from_env()?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.path)
        .with_context(|| format!("failed to open {}", args.path.display()))?;
    let handle = Arc::new(
        file.try_clone()
            .with_context(|| format!("failed to clone handle for {}", args.path.display()))?,
    );

    let (fsync, wake) = FsyncThread::start(&config)?;
    let record = make_record(args.record_bytes);
    let started = Instant::now();
    let mut wakeups_seen = 0_usize;

    for written in 1..=args.entries {
        file.write_all(&record)
            .with_context(|| format!("append failed at entry {written}"))?;
        if written % args.batch == 0 || written == args.entries {
            fsync.submit(handle.clone(), LogIndex(written));
            wakeups_seen += drain_wakeups(&wake)?;
            tracing::trace!(
                target: "logsync::cli",
                submitted = written,
                synced = fsync.synced_index().0,
                "batch_submitted"
            );
        }
    }

    fsync.wait_until_completed();
    wakeups_seen += drain_wakeups(&wake)?;
    let elapsed = started.elapsed();
    let synced_index = fsync.synced_index();
    let stats = fsync.shutdown()?;

    let report = AppendReport {
        path: args.path.display().to_string(),
        sync_mode: config.sync_mode.to_string(),
        entries: args.entries,
        batch: args.batch,
        record_bytes: args.record_bytes,
        synced_index,
        wakeups_seen,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        stats,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "appended {} entries ({} bytes each) to {} in batches of {}",
            report.entries, report.record_bytes, report.path, report.batch
        );
        println!(
            "synced_index={} wakeups={} elapsed={}ms mode={}",
            report.synced_index, report.wakeups_seen, report.elapsed_ms, report.sync_mode
        );
        print!("{}", report.stats.render_info());
    }
    Ok(())
}

fn sync_cmd(args: &SyncArgs) -> Result<()> {
    let config = FsyncConfig::from_env()?;
    let file = open_existing(&args.path)?;
    let (fsync, _wake) = FsyncThread::start(&config)?;

    let started = Instant::now();
    fsync.submit(Arc::new(file), LogIndex(1));
    fsync.wait_until_completed();
    let elapsed = started.elapsed();
    let stats = fsync.shutdown()?;

    let report = SyncReport {
        path: args.path.display().to_string(),
        sync_mode: config.sync_mode.to_string(),
        elapsed_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        stats,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "synced {} ({}) in {}us (fsync itself {}us)",
            report.path,
            report.sync_mode,
            report.elapsed_us,
            report.stats.max().as_micros()
        );
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<File> {
    // Write access is needed on some platforms for fsync to flush.
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn drain_wakeups(wake: &WakeReceiver) -> Result<usize> {
    wake.drain().context("failed to read completion channel")
}

/// One newline-terminated record of exactly `len` bytes.
fn make_record(len: usize) -> Vec<u8> {
    let mut record: Vec<u8> = (0..len)
        .map(|i| b'a' + u8::try_from(i % 26).unwrap_or(0))
        .collect();
    if let Some(last) = record.last_mut() {
        *last = b'\n';
    }
    record
}

fn print_usage() {
    println!("logsync-cli: drive a log file through the background fsync worker");
    println!();
    println!("USAGE:");
    println!("  logsync-cli append <path> [--entries N] [--batch N] [--record-bytes N] [--json]");
    println!("  logsync-cli sync <path> [--json]");
    println!("  logsync-cli help");
    println!();
    println!("ENVIRONMENT:");
    println!("  LOGSYNC_SYNC_MODE      full | data (default full)");
    println!("  LOGSYNC_SLOW_SYNC_MS   slow-sync warning threshold, 0 disables (default 500)");
    println!("  LOGSYNC_THREAD_NAME    worker thread name (default logsync-fsync)");
    println!("  RUST_LOG               tracing filter (default warn)");
}
