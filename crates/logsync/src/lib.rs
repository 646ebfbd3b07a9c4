#![forbid(unsafe_code)]
//! logsync public API facade.
//!
//! Re-exports the fsync offload thread, its error types and the shared
//! vocabulary types through one crate. This is the crate the CLI and
//! downstream log writers depend on.

pub use logsync_error::{FatalError, LogSyncError, Result};
pub use logsync_fsync::*;
pub use logsync_types::ParseError;
