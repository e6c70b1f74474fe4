/*!
Proxy listener: accept loop, request dispatch, and the single-flight bridge
from HTTP POST bodies to backend exchanges.

The backend transport is one shared resource; the whole send + receive-loop
of an exchange runs under its mutex, so concurrently-arriving POSTs are
serialized at the transport boundary. The backend protocol carries no
request identifiers, interleaved writes would corrupt both responses.
*/

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::errors::TransportResult;
use crate::framing::FramedExchange;
use crate::gate::ConnectionGate;
use crate::http::{read_http_request, HttpRequest, Method};
use crate::transport::IpcTransport;
use crate::VERSION;

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
    Access-Control-Allow-Methods: POST, GET, OPTIONS\r\n\
    Access-Control-Allow-Headers: content-type\r\n";

pub struct Proxy {
    listen_addr: SocketAddr,
    backend: Arc<Mutex<IpcTransport>>,
    backend_display: String,
    exchange: FramedExchange,
}

/// Shared state handed to each connection thread.
struct ProxyCtx {
    backend: Arc<Mutex<IpcTransport>>,
    exchange: FramedExchange,
    proxy_addr: String,
    backend_display: String,
}

impl Proxy {
    /// `proxy_url` must be an http:// URL. `backend_path` is used verbatim;
    /// callers expand `~` first (see `expand_user`).
    pub fn new(proxy_url: &str, backend_path: impl Into<PathBuf>) -> io::Result<Proxy> {
        let listen_addr = parse_proxy_url(proxy_url)?;
        let path = backend_path.into();
        let backend_display = backend_display(&path);
        Ok(Proxy {
            listen_addr,
            backend: Arc::new(Mutex::new(IpcTransport::new(path))),
            backend_display,
            exchange: FramedExchange::default(),
        })
    }

    /// Blocks until the backend endpoint accepts a connection or the gate
    /// deadline passes. Run once before `start`; failures here are fatal for
    /// the caller, the proxy must not serve traffic it cannot forward.
    pub fn await_backend(&self, gate: ConnectionGate) -> TransportResult<()> {
        let mut transport = self.backend.lock().unwrap();
        gate.await_ready(&mut transport)
    }

    /// Binds the listener and serves until the returned flag is cleared.
    /// Returns the bound address (meaningful with port 0), the running flag,
    /// and the accept-loop thread handle.
    pub fn start(self) -> io::Result<(SocketAddr, Arc<AtomicBool>, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.listen_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_cl = running.clone();
        let ctx = Arc::new(ProxyCtx {
            backend: self.backend,
            exchange: self.exchange,
            proxy_addr: addr.to_string(),
            backend_display: self.backend_display,
        });

        let handle = thread::spawn(move || {
            info!("proxy listening on {}", ctx.proxy_addr);
            loop {
                if !running_cl.load(Ordering::SeqCst) {
                    break;
                }
                let (stream, _peer) = match listener.accept() {
                    Ok(pair) => pair,
                    Err(err) => {
                        if err.kind() != io::ErrorKind::WouldBlock {
                            debug!(%err, "accept error");
                        }
                        thread::sleep(Duration::from_millis(50));
                        continue;
                    }
                };
                let _ = stream.set_nonblocking(false);
                let ctx = ctx.clone();
                thread::spawn(move || {
                    let mut stream = stream;
                    handle_connection(&ctx, &mut stream);
                });
            }
            info!("proxy listener stopped");
        });

        Ok((addr, running, handle))
    }
}

fn handle_connection(ctx: &ProxyCtx, stream: &mut TcpStream) {
    let request = match read_http_request(stream) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "dropping malformed HTTP request");
            return;
        }
    };
    match request.method {
        Method::Get if request.path == "/" => {
            let body = status_block(ctx);
            respond(stream, "200 OK", Some("text/plain"), body.as_bytes());
        }
        Method::Options => {
            respond(stream, "200 OK", Some("text/plain"), b"");
        }
        Method::Post if request.path == "/" => {
            handle_post(ctx, stream, &request);
        }
        _ => {
            respond(stream, "404 Not Found", None, b"");
        }
    }
}

fn handle_post(ctx: &ProxyCtx, stream: &mut TcpStream, request: &HttpRequest) {
    debug!(bytes = request.body.len(), "forwarding request to backend");
    let result = {
        let mut transport = ctx.backend.lock().unwrap();
        ctx.exchange.exchange(&mut transport, &request.body)
    };
    match result {
        Ok(response) => {
            debug!(bytes = response.len(), "backend response complete");
            respond(stream, "200 OK", Some("application/json"), &response);
        }
        Err(err) => {
            warn!("backend error: {err}");
            respond(
                stream,
                "502 Bad Gateway",
                Some("text/plain"),
                err.to_string().as_bytes(),
            );
        }
    }
}

fn status_block(ctx: &ProxyCtx) -> String {
    let connected = ctx.backend.lock().unwrap().is_connected();
    format!(
        "ipcbridge JSON-RPC Proxy\n\n\
         Version:  {}\n\
         Proxy:    {}\n\
         Backend:  {} (connected: {})\n",
        VERSION, ctx.proxy_addr, ctx.backend_display, connected
    )
}

fn respond<W: Write>(w: &mut W, status: &str, content_type: Option<&str>, body: &[u8]) {
    let mut header = format!("HTTP/1.1 {status}\r\n");
    if let Some(ct) = content_type {
        header.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    header.push_str(CORS_HEADERS);
    header.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(body);
    let _ = w.flush();
}

/// Resolve the configured listen URL into a bind address. Only plain http
/// is served; anything else is a configuration error.
pub fn parse_proxy_url(raw: &str) -> io::Result<SocketAddr> {
    let url = Url::parse(raw).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid proxy URL '{raw}': {err}"),
        )
    })?;
    if url.scheme() != "http" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("proxy URL must use http, got '{}'", url.scheme()),
        ));
    }
    let host = url.host_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("proxy URL '{raw}' has no host"),
        )
    })?;
    let port = url.port_or_known_default().unwrap_or(80);
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("proxy URL '{raw}' did not resolve to an address"),
        )
    })
}

#[cfg(unix)]
fn backend_display(path: &Path) -> String {
    format!("unix:{}", path.display())
}

#[cfg(windows)]
fn backend_display(path: &Path) -> String {
    format!("pipe:{}", path.display())
}
