//! TCP connect/read client
//!
//! Measures how long the three-way handshake takes and optionally
//! collects the first lines the server sends.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::engine::error::{EngineError, EngineResult};

/// Hard cap on collected banner data
const MAX_CONTENT: usize = 64 * 1024;

/// What to do after the connection is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpCheck {
    /// Sent right after connecting when not empty
    pub send: String,

    /// `None`: connect only. `Some(0)`: read until EOF or read timeout.
    /// `Some(n)`: read until `n` lines were received.
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpResponse {
    /// Collected data, `None` when no read was requested
    pub content: Option<String>,
    pub connect_time: Duration,
}

/// Connect to `addr` and run the check
///
/// Connection failures are terminal. A read that times out after a
/// successful connect is not an error; whatever arrived is returned.
pub async fn get_tcp(
    addr: SocketAddr,
    check: &TcpCheck,
    io_timeout: Duration,
) -> EngineResult<TcpResponse> {
    let start = Instant::now();
    let mut stream = timeout(io_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| EngineError::ConnectTimeout)??;
    let connect_time = start.elapsed();

    trace!(%addr, connect_ms = connect_time.as_millis() as u64, "connected");

    let Some(max_lines) = check.max_lines else {
        return Ok(TcpResponse {
            content: None,
            connect_time,
        });
    };

    if !check.send.is_empty() {
        // the check is best effort, a server that already hung up still counts as open
        let _ = stream.write_all(check.send.as_bytes()).await;
    }

    let content = read_lines(&mut stream, max_lines, io_timeout).await;

    Ok(TcpResponse {
        content: Some(String::from_utf8_lossy(&content).into_owned()),
        connect_time,
    })
}

async fn read_lines(stream: &mut TcpStream, max_lines: usize, io_timeout: Duration) -> Vec<u8> {
    let mut content = Vec::with_capacity(256);
    let mut chunk = [0u8; 4096];

    loop {
        match timeout(io_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => content.extend_from_slice(&chunk[..n]),
        }

        if content.len() >= MAX_CONTENT {
            content.truncate(MAX_CONTENT);
            break;
        }
        if max_lines > 0 && content.iter().filter(|b| **b == b'\n').count() >= max_lines {
            break;
        }
    }

    content
}
