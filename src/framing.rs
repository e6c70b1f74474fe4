/*!
Newline-delimited response framing over the IPC transport.

Requests carry no framing of their own: the backend parses complete JSON
objects out of the raw bytes. Responses are a byte stream terminated by a
single `\n`, which is stripped before the bytes are handed back.
*/

use tracing::debug;

use crate::errors::TransportResult;
use crate::transport::IpcTransport;

/// End-of-response marker on the backend stream.
pub const DELIMITER: u8 = b'\n';

/// Read chunk size. Any positive size preserves behavior; this one is small
/// enough that the accumulation loop runs on any non-trivial response.
pub const CHUNK_SIZE: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct FramedExchange {
    pub chunk_size: usize,
}

impl Default for FramedExchange {
    fn default() -> Self {
        FramedExchange {
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl FramedExchange {
    /// One half-duplex round trip: write the request bytes as given, then
    /// read chunks until one ends in the delimiter. A zero-byte read means
    /// the peer closed mid-response; whatever has accumulated is returned
    /// as-is, not raised as an error.
    pub fn exchange(
        &self,
        transport: &mut IpcTransport,
        request: &[u8],
    ) -> TransportResult<Vec<u8>> {
        transport.send(request)?;

        let mut response = Vec::new();
        loop {
            let chunk = transport.receive(self.chunk_size)?;
            if chunk.is_empty() {
                debug!(
                    accumulated = response.len(),
                    "backend closed the stream mid-response"
                );
                break;
            }
            if chunk.last() == Some(&DELIMITER) {
                response.extend_from_slice(&chunk[..chunk.len() - 1]);
                break;
            }
            response.extend_from_slice(&chunk);
        }
        Ok(response)
    }
}
