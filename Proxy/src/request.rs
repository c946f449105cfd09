use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::error::ProxyError;

/// Upper bound for an HTTP request head before the proxy gives up on it.
const MAX_HEAD_BYTES: usize = 16 * 1024;

const METHODS: [&str; 9] = ["CONNECT", "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE"];

/// What the first bytes of a client connection asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientRequest {
    /// `CONNECT host:port`. `leftover` is anything pipelined after the head.
    Connect { host: String, port: u16, leftover: Vec<u8> },
    /// Absolute-form request. `head` is the request rewritten to origin-form
    /// followed by any bytes already read past it.
    Forward { host: String, port: u16, head: Vec<u8> },
    /// Not a proxy request. `bytes` must be sent to the default target as-is.
    Transparent { bytes: Vec<u8> },
}

/// Reads the first bytes of a connection and classifies them.
///
/// Non-HTTP traffic (a TLS ClientHello for instance) is returned after the
/// first read. HTTP traffic is read up to the end of its head.
pub async fn read_request<R>(stream: &mut R, chunk_size: usize) -> Result<ClientRequest, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1024)];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);

    if !looks_like_http(&buf) {
        return Ok(ClientRequest::Transparent { bytes: buf });
    }

    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ProxyError::BadRequest(format!("request head exceeds {MAX_HEAD_BYTES} bytes")));
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::BadRequest("connection closed inside the request head".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    classify(buf, head_end)
}

fn looks_like_http(buf: &[u8]) -> bool {
    METHODS.iter().any(|method| {
        buf.len() > method.len() && buf.starts_with(method.as_bytes()) && buf[method.len()] == b' '
    })
}

/// Index just past the blank line ending the head.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn classify(buf: Vec<u8>, head_end: usize) -> Result<ClientRequest, ProxyError> {
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| ProxyError::BadRequest("request head is not valid UTF-8".to_string()))?;
    let (request_line, headers) = head.split_once("\r\n").unwrap_or((head, "\r\n"));

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ProxyError::BadRequest(format!("malformed request line {request_line:?}")));
    };

    if method == "CONNECT" {
        let (host, port) = split_authority(target)
            .ok_or_else(|| ProxyError::BadRequest(format!("CONNECT target {target:?} is not host:port")))?;
        return Ok(ClientRequest::Connect {
            host,
            port,
            leftover: buf[head_end..].to_vec(),
        });
    }

    if target.starts_with("http://") || target.starts_with("https://") {
        let url = Url::parse(target).map_err(|e| ProxyError::BadRequest(format!("invalid URL {target:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::BadRequest(format!("URL {target:?} has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::BadRequest(format!("URL {target:?} has no port")))?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut rewritten = format!("{method} {path} {version}\r\n");
        for line in headers.split("\r\n").filter(|line| !line.is_empty()) {
            let name = line.split(':').next().unwrap_or_default().trim();
            if name.eq_ignore_ascii_case("proxy-connection") || name.eq_ignore_ascii_case("proxy-authorization") {
                continue;
            }
            rewritten.push_str(line);
            rewritten.push_str("\r\n");
        }
        rewritten.push_str("\r\n");

        let mut head = rewritten.into_bytes();
        head.extend_from_slice(&buf[head_end..]);
        return Ok(ClientRequest::Forward { host, port, head });
    }

    Ok(ClientRequest::Transparent { bytes: buf })
}

/// Splits `host:port`, accepting bracketed IPv6 literals.
fn split_authority(authority: &str) -> Option<(String, u16)> {
    let (host, port) = authority.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}
