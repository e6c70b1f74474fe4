/*!
HTTP helpers for the proxy listener: tolerant single-request parsing.

Accepts both CRLFCRLF and LFLF header termination with a 64 KiB header cap.
The body is read to exactly Content-Length bytes; anything beyond it on the
wire is ignored.
*/

use std::collections::HashMap;
use std::io::{self, Read};

use crate::find_header_end;

/// Methods the proxy distinguishes; everything else is kept verbatim for
/// the 404 path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Options,
    Other(String),
}

/// Case-insensitive header map (keys lowercased).
pub(crate) type HeaderMap = HashMap<String, String>;

#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Parse a single HTTP request from a reader. Errors when the stream ends
/// (or the cap is hit) before the header terminator shows up.
pub(crate) fn read_http_request<R: Read>(reader: &mut R) -> io::Result<HttpRequest> {
    const HDR_CAP: usize = 64 * 1024;

    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let mut header_end: Option<usize> = None;
    while header_end.is_none() && buf.len() < HDR_CAP {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        header_end = find_header_end(&buf);
    }
    let Some(body_start) = header_end else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "incomplete HTTP request header",
        ));
    };

    let header_bytes: &[u8] = if body_start >= 4 && &buf[body_start - 4..body_start] == b"\r\n\r\n"
    {
        &buf[..body_start - 4]
    } else {
        &buf[..body_start - 2]
    };
    let header_str = String::from_utf8_lossy(header_bytes);
    let mut lines = header_str.lines();
    let request_line = lines.next().unwrap_or_default().trim().to_string();
    let (method, path) = parse_request_line(&request_line);
    let headers = parse_headers(lines);

    let content_len: usize = headers
        .get("content-length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let mut body: Vec<u8> = buf[body_start..].to_vec();
    body.truncate(content_len);
    while body.len() < content_len {
        let want = (content_len - body.len()).min(8 * 1024);
        let mut rest = vec![0u8; want];
        let got = reader.read(&mut rest)?;
        if got == 0 {
            break;
        }
        body.extend_from_slice(&rest[..got]);
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn parse_request_line(line: &str) -> (Method, String) {
    let mut parts = line.split_whitespace();
    let method = match parts.next().unwrap_or("").to_ascii_uppercase().as_str() {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "OPTIONS" => Method::Options,
        other => Method::Other(other.to_string()),
    };
    let target = parts.next().unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    (method, path)
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    map
}
