/*!
ipcbridge: HTTP proxy for JSON-RPC backends that only speak over local IPC.

The library half exposes the transport, the startup gate, the response
framing, and the proxy listener, so tests and embedders can run the proxy
in-process and stop it deterministically; the `ipcbridge` binary wires them
to the CLI.
*/

use std::path::PathBuf;

pub mod errors;
pub mod framing;
pub mod gate;
mod http;
pub mod proxy;
pub mod transport;

pub use errors::{TransportError, TransportResult};
pub use framing::{FramedExchange, CHUNK_SIZE, DELIMITER};
pub use gate::ConnectionGate;
pub use proxy::Proxy;
pub use transport::{IpcTransport, ReconnectPolicy};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Expand a leading `~` to the user's home directory. Paths without the
/// prefix, and `~` when no home directory can be determined, pass through
/// unchanged.
pub fn expand_user(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = home::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Find end of HTTP headers, accepting either CRLF-CRLF or LF-LF separators.
/// Returns the index just after the header terminator when found.
pub(crate) fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find_crlfcrlf(buf) {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}
