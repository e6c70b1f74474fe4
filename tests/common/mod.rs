//! Shared harness for the integration suites: an in-process stub backend on
//! a Unix socket, a proxy starter, and a raw-socket HTTP client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How the stub backend answers each request read off its connection.
#[derive(Clone)]
#[allow(dead_code)]
pub enum Reply {
    /// Echo the request bytes back, newline-terminated.
    Echo,
    /// Write the given bytes (terminator included by the caller) in
    /// `piece`-sized slices with a short pause between them.
    Dribble { bytes: Vec<u8>, piece: usize },
    /// Close the connection without answering.
    Hangup,
}

pub struct StubBackend {
    socket_path: PathBuf,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StubBackend {
    pub fn spawn(socket_path: &Path, reply: Reply) -> StubBackend {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path).expect("bind stub backend socket");
        listener.set_nonblocking(true).expect("stub set_nonblocking");
        let running = Arc::new(AtomicBool::new(true));
        let running_cl = running.clone();
        let handle = std::thread::spawn(move || loop {
            if !running_cl.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => serve_conn(stream, &reply, &running_cl),
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        });
        StubBackend {
            socket_path: socket_path.to_path_buf(),
            running,
            handle: Some(handle),
        }
    }

    /// Stops the accept loop, closes any live connection, and unlinks the
    /// socket file so a reconnect attempt sees a missing endpoint.
    #[allow(dead_code)]
    pub fn stop(self) {}
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn serve_conn(mut stream: UnixStream, reply: &Reply, running: &AtomicBool) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let mut buf = [0u8; 64 * 1024];
    while running.load(Ordering::SeqCst) {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(_) => break,
        };
        match reply {
            Reply::Echo => {
                let mut out = buf[..n].to_vec();
                out.push(b'\n');
                if stream.write_all(&out).is_err() {
                    break;
                }
            }
            Reply::Dribble { bytes, piece } => {
                for part in bytes.chunks((*piece).max(1)) {
                    if stream.write_all(part).is_err() {
                        return;
                    }
                    let _ = stream.flush();
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Reply::Hangup => break,
        }
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

/// Start an in-process proxy on an ephemeral port, pointed at `backend_path`.
/// The caller clears the flag and joins the handle to shut it down.
#[allow(dead_code)]
pub fn start_proxy(backend_path: &Path) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>) {
    let proxy = ipcbridge::Proxy::new("http://127.0.0.1:0", backend_path).expect("proxy setup");
    proxy.start().expect("proxy start")
}

#[allow(dead_code)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One HTTP request over a fresh connection, read to EOF (the proxy closes
/// after each response).
#[allow(dead_code)]
pub fn http_request(addr: &SocketAddr, method: &str, path: &str, body: &[u8]) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).expect("connect proxy");
    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).expect("write request head");
    stream.write_all(body).expect("write request body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    parse_response(&raw)
}

#[allow(dead_code)]
pub fn header<'a>(resp: &'a HttpResponse, name: &str) -> Option<&'a str> {
    resp.headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[allow(dead_code)]
fn parse_response(raw: &[u8]) -> HttpResponse {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator in response")
        + 4;
    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("bad status line");
    let mut headers = Vec::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
        }
    }
    let available = raw.len() - header_end;
    let content_len: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(available);
    let body = raw[header_end..header_end + content_len.min(available)].to_vec();
    HttpResponse {
        status,
        headers,
        body,
    }
}
