//! Fsync worker configuration.

use logsync_error::{LogSyncError, Result};
use logsync_types::SyncMode;
use std::time::Duration;

pub const ENV_THREAD_NAME: &str = "LOGSYNC_THREAD_NAME";
pub const ENV_SYNC_MODE: &str = "LOGSYNC_SYNC_MODE";
pub const ENV_SLOW_SYNC_MS: &str = "LOGSYNC_SLOW_SYNC_MS";

/// Configuration for [`FsyncThread`](crate::FsyncThread).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsyncConfig {
    /// Name of the worker thread.
    /// Default: `"logsync-fsync"`.
    pub thread_name: String,
    /// Durability call issued for every sync.
    /// Default: [`SyncMode::Full`].
    pub sync_mode: SyncMode,
    /// Syncs slower than this are logged at `warn`. `None` disables.
    /// Default: 500 ms.
    pub slow_sync_threshold: Option<Duration>,
}

impl Default for FsyncConfig {
    fn default() -> Self {
        Self {
            thread_name: "logsync-fsync".to_owned(),
            sync_mode: SyncMode::Full,
            slow_sync_threshold: Some(Duration::from_millis(500)),
        }
    }
}

impl FsyncConfig {
    /// Defaults overridden by `LOGSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `LOGSYNC_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_THREAD_NAME) {
            config.thread_name = name;
        }
        if let Some(mode) = lookup(ENV_SYNC_MODE) {
            config.sync_mode = mode
                .parse()
                .map_err(|e| LogSyncError::InvalidConfig(format!("{ENV_SYNC_MODE}={mode}: {e}")))?;
        }
        if let Some(raw) = lookup(ENV_SLOW_SYNC_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                LogSyncError::InvalidConfig(format!(
                    "{ENV_SLOW_SYNC_MS}={raw}: expected milliseconds"
                ))
            })?;
            config.slow_sync_threshold = (millis > 0).then(|| Duration::from_millis(millis));
        }

        config.validate()?;
        tracing::debug!(
            target: "logsync::config",
            thread_name = %config.thread_name,
            sync_mode = %config.sync_mode,
            slow_sync_threshold_ms = config
                .slow_sync_threshold
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "fsync_config_loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_name.is_empty() {
            return Err(LogSyncError::InvalidConfig(
                "thread_name must not be empty".into(),
            ));
        }
        if self.thread_name.contains('\0') {
            return Err(LogSyncError::InvalidConfig(
                "thread_name must not contain NUL bytes".into(),
            ));
        }
        Ok(())
    }
}
