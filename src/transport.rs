/*!
IPC transport for the backend endpoint: lazy connect, classified connect
errors, a short per-operation read timeout, and a single reconnect-and-retry
on a broken-pipe write.

The connection is opened on first use rather than at construction, so the
proxy can come up before the backend has created its socket. The handle is
assumed healthy until an operation fails; the only automatic recovery is the
write-side reconnect governed by `ReconnectPolicy`.
*/

use std::io::{self, Read, Write};
#[cfg(unix)]
use std::net::Shutdown;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::errors::{TransportError, TransportResult};

#[cfg(unix)]
type Endpoint = UnixStream;
#[cfg(windows)]
type Endpoint = std::fs::File;

/// Read timeout on an established connection. Distinct from the startup
/// deadline in `gate.rs`: this bounds a single `receive` once connected.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// When and how often a failed backend write is transparently retried.
/// Reads are never retried; neither is anything after the retry budget is
/// spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
}

impl ReconnectPolicy {
    /// One reconnect on a peer-closed write, for a backend that restarted
    /// between requests.
    pub const fn broken_pipe_once() -> Self {
        ReconnectPolicy { max_retries: 1 }
    }

    /// True when `err` is the trigger condition (the peer closed our
    /// connection) and the attempt budget is not yet spent.
    pub fn should_retry(&self, err: &io::Error, attempts: u32) -> bool {
        attempts < self.max_retries && err.kind() == io::ErrorKind::BrokenPipe
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::broken_pipe_once()
    }
}

/// Owns at most one connection to the backend IPC endpoint.
pub struct IpcTransport {
    path: PathBuf,
    endpoint: Option<Endpoint>,
    policy: ReconnectPolicy,
}

impl IpcTransport {
    pub fn new(path: impl Into<PathBuf>) -> IpcTransport {
        IpcTransport::with_policy(path, ReconnectPolicy::default())
    }

    pub fn with_policy(path: impl Into<PathBuf>, policy: ReconnectPolicy) -> IpcTransport {
        IpcTransport {
            path: path.into(),
            endpoint: None,
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces a connection if none is held.
    pub fn connect(&mut self) -> TransportResult<()> {
        self.endpoint().map(|_| ())
    }

    /// True iff a handle is currently held. Does not re-validate liveness.
    pub fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Shuts down and releases the handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            shutdown_endpoint(&endpoint);
            debug!(path = %self.path.display(), "closed backend connection");
        }
    }

    /// Writes all bytes, connecting lazily if needed. A broken-pipe failure
    /// closes the stale handle, reconnects, and retries once per
    /// `ReconnectPolicy`; any further failure propagates.
    pub fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut attempts = 0;
        loop {
            match self.endpoint()?.write_all(data) {
                Ok(()) => return Ok(()),
                Err(err) if self.policy.should_retry(&err, attempts) => {
                    attempts += 1;
                    debug!(
                        path = %self.path.display(),
                        attempts, "backend closed the connection; reconnecting"
                    );
                    self.close();
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Reads up to `max_chunk` bytes, connecting lazily if needed. A
    /// zero-length result means the peer closed the stream.
    pub fn receive(&mut self, max_chunk: usize) -> TransportResult<Vec<u8>> {
        let mut chunk = vec![0u8; max_chunk];
        let n = self.endpoint()?.read(&mut chunk).map_err(TransportError::Io)?;
        chunk.truncate(n);
        Ok(chunk)
    }

    fn endpoint(&mut self) -> TransportResult<&mut Endpoint> {
        if self.endpoint.is_none() {
            let endpoint = open_endpoint(&self.path)?;
            debug!(path = %self.path.display(), "connected to backend endpoint");
            self.endpoint = Some(endpoint);
        }
        self.endpoint.as_mut().ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "backend connection unavailable",
            ))
        })
    }
}

#[cfg(unix)]
fn open_endpoint(path: &Path) -> TransportResult<Endpoint> {
    let stream = UnixStream::connect(path).map_err(|err| classify_connect_error(err, path))?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(TransportError::Io)?;
    Ok(stream)
}

#[cfg(windows)]
fn open_endpoint(path: &Path) -> TransportResult<Endpoint> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| TransportError::Connect {
            path: path.to_path_buf(),
            source: err,
        })
}

#[cfg(unix)]
fn classify_connect_error(err: io::Error, path: &Path) -> TransportError {
    match err.kind() {
        io::ErrorKind::NotFound => TransportError::EndpointMissing(path.to_path_buf()),
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(path.to_path_buf()),
        _ => TransportError::Connect {
            path: path.to_path_buf(),
            source: err,
        },
    }
}

#[cfg(unix)]
fn shutdown_endpoint(endpoint: &Endpoint) {
    let _ = endpoint.shutdown(Shutdown::Both);
}

#[cfg(windows)]
fn shutdown_endpoint(_endpoint: &Endpoint) {}
