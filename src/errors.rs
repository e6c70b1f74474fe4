//! Error taxonomy for the backend transport.
//!
//! Connect-time failures are classified into the three user-facing cases
//! (endpoint missing, connection refused, anything else); failures on an
//! already-established connection surface as `Io`. `Timeout` is raised only
//! by the startup gate, and only when no transport error was observed while
//! polling.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket or pipe file is not there — typically the backend has not
    /// started yet.
    #[error("Unix Domain Socket '{}' does not exist", .0.display())]
    EndpointMissing(PathBuf),

    /// The endpoint file exists but nothing is accepting on it.
    #[error("Connection to '{}' refused", .0.display())]
    ConnectionRefused(PathBuf),

    /// Any other OS-level failure while opening the endpoint.
    #[error("Unknown error when connecting to '{}': {}", .path.display(), .source)]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Send or receive failed on an established connection.
    #[error("backend connection failed: {0}")]
    Io(#[from] io::Error),

    /// The startup gate hit its deadline without ever seeing the endpoint.
    #[error("timed out after {0:?} waiting for the backend endpoint")]
    Timeout(Duration),
}
