/*!
Startup gating: poll the backend endpoint until it accepts a connection or a
deadline passes.

Used once before serving traffic, for environments where the proxy and the
backend are launched concurrently and the backend may not have created its
listener yet.
*/

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::errors::{TransportError, TransportResult};
use crate::transport::IpcTransport;

/// Fixed pause between connection attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Overall deadline for the backend to come up.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ConnectionGate {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        ConnectionGate {
            poll_interval: POLL_INTERVAL,
            timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl ConnectionGate {
    pub fn with_timeout(timeout: Duration) -> ConnectionGate {
        ConnectionGate {
            timeout,
            ..ConnectionGate::default()
        }
    }

    /// Polls `connect` until the backend accepts. Transport errors are
    /// expected while the backend is still starting; the most recent one is
    /// kept and raised at the deadline in place of a bare `Timeout`, so the
    /// caller sees why the endpoint never came up.
    pub fn await_ready(&self, transport: &mut IpcTransport) -> TransportResult<()> {
        let mut waited = Duration::ZERO;
        let mut last_err: Option<TransportError> = None;
        loop {
            match transport.connect() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(%err, "backend endpoint not ready yet");
                    last_err = Some(err);
                }
            }
            thread::sleep(self.poll_interval);
            waited += self.poll_interval;
            if waited > self.timeout {
                return Err(last_err.unwrap_or(TransportError::Timeout(waited)));
            }
        }
    }
}
