//! Completion notifier: a readable edge for event-loop hosts.
//!
//! The worker writes one token each time a sync cycle completes. The host
//! registers [`WakeReceiver`] with its multiplexer, drains it when readable,
//! and re-reads the watermarks from the fsync thread. Tokens carry no data,
//! so several completions collapsing into one readable edge loses nothing.
//!
//! Built on a non-blocking `UnixStream` pair (close-on-exec by default).

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const TOKEN: [u8; 1] = [b'1'];

/// Create a connected sender/receiver pair.
pub fn wake_channel() -> io::Result<(WakeSender, WakeReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((
        WakeSender {
            stream: tx,
            disconnected: AtomicBool::new(false),
        },
        WakeReceiver { stream: rx },
    ))
}

/// Write end, owned by the fsync worker.
#[derive(Debug)]
pub struct WakeSender {
    stream: UnixStream,
    disconnected: AtomicBool,
}

impl WakeSender {
    /// Publish one completion token.
    ///
    /// A full socket buffer means an undrained token is already waiting, so
    /// `WouldBlock` counts as delivered. Once the receiver is gone, further
    /// calls are no-ops.
    pub fn notify(&self) -> io::Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            return Ok(());
        }
        loop {
            match (&self.stream).write(&TOKEN) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    self.disconnected.store(true, Ordering::Release);
                    tracing::debug!(
                        target: "logsync::notifier",
                        "wake_receiver_dropped_notifications_disabled"
                    );
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Read end, handed to the event-loop host.
#[derive(Debug)]
pub struct WakeReceiver {
    stream: UnixStream,
}

impl WakeReceiver {
    /// Consume every pending token without blocking; returns how many.
    pub fn drain(&self) -> io::Result<usize> {
        let mut buf = [0_u8; 64];
        let mut drained = 0_usize;
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => return Ok(drained),
                Ok(n) => drained += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(drained),
                Err(err) => return Err(err),
            }
        }
    }

    /// Block up to `timeout` for the next edge, then drain.
    ///
    /// For hosts without a multiplexer. Returns the number of tokens
    /// consumed, `0` if the timeout elapsed first.
    ///
    /// The socket is in blocking mode with a read timeout only for the
    /// duration of the call; `&mut self` keeps [`drain`](Self::drain) from
    /// running concurrently and observing that mode. Do not call this while
    /// the descriptor is registered with a multiplexer.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<usize> {
        let ready = self.drain()?;
        if ready > 0 || timeout.is_zero() {
            return Ok(ready);
        }

        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(timeout))?;
        let mut first = [0_u8; 1];
        let read = loop {
            match (&self.stream).read(&mut first) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                other => break other,
            }
        };
        self.stream.set_read_timeout(None)?;
        self.stream.set_nonblocking(true)?;

        match read {
            Ok(0) => Ok(0),
            Ok(n) => Ok(n + self.drain()?),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}

impl AsFd for WakeReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for WakeReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
