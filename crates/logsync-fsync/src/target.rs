//! The handle the worker makes durable.

use logsync_types::SyncMode;
use std::fs::File;
use std::io;
use std::sync::Arc;

/// Something the fsync worker can flush to stable storage.
///
/// The log hands a target to [`FsyncThread::submit`]; the worker keeps an
/// `Arc` clone of it for as long as the sync is in flight, so the caller may
/// drop its own reference right after submitting. The log file itself is the
/// usual implementor; tests use custom implementors to count calls, gate the
/// worker, or inject failures.
///
/// [`FsyncThread::submit`]: crate::FsyncThread::submit
pub trait SyncTarget: Send + Sync {
    /// Block until everything written so far is durable.
    ///
    /// An `Err` is fatal for the whole process.
    fn sync(&self, mode: SyncMode) -> io::Result<()>;
}

impl SyncTarget for File {
    fn sync(&self, mode: SyncMode) -> io::Result<()> {
        match mode {
            SyncMode::Full => self.sync_all(),
            SyncMode::Data => self.sync_data(),
        }
    }
}

impl<T: SyncTarget + ?Sized> SyncTarget for Arc<T> {
    fn sync(&self, mode: SyncMode) -> io::Result<()> {
        (**self).sync(mode)
    }
}
