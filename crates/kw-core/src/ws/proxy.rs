//! HTTP `CONNECT` tunnelling for WebSocket connections behind a proxy.
//!
//! The tunnel is a plain TCP stream to the proxy on which a `CONNECT`
//! request has succeeded; TLS and the WebSocket handshake then run over it
//! exactly as they would over a direct connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::FeedError;

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8192;

/// Open a TCP connection to the proxy and ask it to tunnel to `target_host:target_port`.
pub async fn connect_tunnel(
    proxy_host: &str,
    proxy_port: u16,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, FeedError> {
    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| FeedError::Transport(format!("proxy {proxy_host}:{proxy_port} unreachable: {e}")))?;

    let authority = format!("{target_host}:{target_port}");
    let request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| FeedError::Transport(format!("proxy write failed: {e}")))?;

    let head = read_response_head(&mut stream).await?;
    check_connect_response(&head)?;
    debug!("proxy tunnel to {authority} established via {proxy_host}:{proxy_port}");
    Ok(stream)
}

/// Read up to and including the blank line that ends the response head.
///
/// Reads one byte at a time so nothing past the head is consumed; the bytes
/// after it belong to the TLS handshake.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, FeedError> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| FeedError::Transport(format!("proxy read failed: {e}")))?;
        if n == 0 {
            return Err(FeedError::Transport("proxy closed connection during CONNECT".into()));
        }
        buf.push(byte[0]);
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(FeedError::Transport("proxy response head too large".into()));
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Accept any `HTTP/1.x 2xx` status line, reject everything else.
pub fn check_connect_response(head: &str) -> Result<(), FeedError> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code))
            if version.starts_with("HTTP/1.") && code.len() == 3 && code.starts_with('2') =>
        {
            Ok(())
        }
        _ => Err(FeedError::Transport(format!("proxy refused CONNECT: {status_line:?}"))),
    }
}
