//! Debugging-endpoint bootstrap: resolve an HTTP debugging URL to the
//! browser's WebSocket URL and dial it.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tracing::warn;
use url::Url;

use crate::error::CdpError;
use crate::transport::WsStream;

/// Browser version information returned by `/json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    /// The browser name and version (e.g. "Chrome/126.0.6478.62").
    #[serde(rename = "Browser")]
    pub browser: String,

    /// The CDP protocol version (e.g. "1.3").
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,

    /// The browser-level WebSocket debugger URL.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// Resolve a debugging URL to a dialable WebSocket URL.
///
/// `ws`/`wss` URLs pass through unchanged; `http`/`https` URLs are
/// resolved by querying `/json/version` on the endpoint.
///
/// # Errors
///
/// [`CdpError::InvalidUrl`] for unparseable URLs or any other scheme,
/// [`CdpError::Http`] when the version query fails.
pub async fn resolve_ws_url(url: &str) -> Result<String, CdpError> {
    let parsed = Url::parse(url).map_err(|e| CdpError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(url.to_owned()),
        "http" | "https" => Ok(query_version(&parsed).await?.ws_debugger_url),
        other => Err(CdpError::InvalidUrl(format!(
            "unsupported scheme `{other}` in {url}"
        ))),
    }
}

/// Query the endpoint's `/json/version` document.
///
/// # Errors
///
/// [`CdpError::Http`] on connection failure, a non-200 status, or an
/// undecodable payload.
pub async fn query_version(base: &Url) -> Result<BrowserVersion, CdpError> {
    let path = format!("{}/json/version", base.path().trim_end_matches('/'));
    let body = http_get(base, &path).await?;
    serde_json::from_str(&body)
        .map_err(|e| CdpError::Http(format!("invalid /json/version payload: {e}")))
}

/// Dial the WebSocket URL, retrying only when the peer refuses the
/// connection. Any other failure is immediate.
pub(crate) async fn dial(
    ws_url: &str,
    retries: u32,
    retry_delay: Duration,
) -> Result<WsStream, CdpError> {
    let mut attempt = 0;
    loop {
        match tokio_tungstenite::connect_async(ws_url).await {
            Ok((stream, _response)) => return Ok(stream),
            Err(e) if attempt < retries && is_connection_refused(&e) => {
                attempt += 1;
                warn!(attempt, retries, "connection refused, retrying: {e}");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                return Err(CdpError::Transport(format!(
                    "WebSocket connect to {ws_url} failed: {e}"
                )));
            }
        }
    }
}

fn is_connection_refused(error: &tungstenite::Error) -> bool {
    matches!(error, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused)
}

/// Minimal HTTP/1.1 GET against the debugging endpoint. The endpoint
/// speaks plain HTTP on a local port; a full HTTP client would be dead
/// weight here. The exchange stays plaintext for `https` URLs too (the
/// port defaults to 443 but no TLS is wrapped around the socket): this
/// client carries no TLS stack, matching its WebSocket side.
async fn http_get(base: &Url, path: &str) -> Result<String, CdpError> {
    let host = base
        .host_str()
        .ok_or_else(|| CdpError::InvalidUrl(format!("{base}: missing host")))?;
    let port = base.port_or_known_default().unwrap_or(80);
    let addr = format!("{host}:{port}");

    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| CdpError::Http(format!("connection failed to {addr}: {e}")))?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| CdpError::Http(format!("write failed: {e}")))?;

    // Read until the response is complete per Content-Length (the
    // endpoint may keep the connection open despite `Connection: close`).
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| CdpError::Http(format!("read failed: {e}")))?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if response_is_complete(&buf) {
            break;
        }
    }
    parse_response(&buf)
}

/// Byte offset of the `\r\n\r\n` header terminator.
fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// `Content-Length` parsed from raw header bytes, case-insensitive.
fn content_length(headers: &[u8]) -> Option<usize> {
    let headers = std::str::from_utf8(headers).ok()?;
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn response_is_complete(buf: &[u8]) -> bool {
    let Some(end) = header_end(buf) else {
        return false;
    };
    match content_length(&buf[..end]) {
        Some(len) => buf.len() >= end + 4 + len,
        None => true,
    }
}

/// Validate the status line is 200 and extract the body.
fn parse_response(buf: &[u8]) -> Result<String, CdpError> {
    let end = header_end(buf).ok_or_else(|| CdpError::Http("malformed HTTP response".into()))?;
    let headers = std::str::from_utf8(&buf[..end])
        .map_err(|e| CdpError::Http(format!("invalid UTF-8 in headers: {e}")))?;
    let status_line = headers
        .lines()
        .next()
        .ok_or_else(|| CdpError::Http("empty HTTP response".into()))?;
    if !status_line.contains(" 200 ") {
        return Err(CdpError::Http(format!(
            "unexpected HTTP status: {status_line}"
        )));
    }

    let body_start = end + 4;
    let body = match content_length(&buf[..end]) {
        Some(len) => &buf[body_start..(body_start + len).min(buf.len())],
        None => &buf[body_start..],
    };
    String::from_utf8(body.to_vec())
        .map_err(|e| CdpError::Http(format!("invalid UTF-8 in body: {e}")))
}
