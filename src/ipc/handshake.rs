//! Worker configuration handshake
//!
//! ```text
//! worker                     supervisor
//!   │ ──────── INIT ────────▶ │
//!   │ ◀──── CONF(config) ──── │
//!   │ ──────── READY ───────▶ │
//! ```
//!
//! Anything else than exactly one `CONF` frame answering `INIT` is fatal
//! for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::config::WorkerConfig;

use super::error::{IpcError, IpcResult};
use super::framing::{IpcStream, connect, framed};
use super::messages::Message;

/// Attempts to reach a supervisor endpoint while it is starting up
pub const CONNECT_ATTEMPTS: u32 = 50;
pub const CONNECT_DELAY: Duration = Duration::from_millis(100);

async fn expect(stream: &mut IpcStream, wait: Duration, expected: &'static str) -> IpcResult<Message> {
    match timeout(wait, stream.next()).await {
        Err(_) => Err(IpcError::Timeout),
        Ok(None) => Err(IpcError::Closed),
        Ok(Some(Err(e))) => Err(e),
        Ok(Some(Ok(message))) => {
            trace!(expected, got = %message, "handshake message");
            Ok(message)
        }
    }
}

fn unexpected(expected: &'static str, message: &Message) -> IpcError {
    IpcError::Unexpected {
        expected,
        got: message.to_string(),
    }
}

/// Worker side of the handshake
#[derive(Debug)]
pub struct HandshakeClient {
    stream: IpcStream,
}

impl HandshakeClient {
    /// Send `INIT` and wait for the configuration
    #[instrument(skip(wait))]
    pub async fn init_and_config(addr: SocketAddr, wait: Duration) -> IpcResult<(Self, WorkerConfig)> {
        let mut stream = connect(addr, CONNECT_ATTEMPTS, CONNECT_DELAY).await?;
        stream.send(Message::Init).await?;

        match expect(&mut stream, wait, "CONF").await? {
            Message::Conf(config) => {
                debug!(worker = config.worker_id, attributes = config.attributes.len(), "configuration received");
                Ok((Self { stream }, config))
            }
            other => Err(unexpected("CONF", &other)),
        }
    }

    /// Confirm the configuration was applied
    pub async fn ready(mut self) -> IpcResult<()> {
        self.stream.send(Message::Ready).await
    }
}

/// Supervisor side of the handshake
pub struct HandshakeServer {
    listener: TcpListener,
    wait: Duration,
}

impl HandshakeServer {
    pub async fn bind(addr: SocketAddr, wait: Duration) -> IpcResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, wait })
    }

    pub fn local_addr(&self) -> IpcResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next connection; `INIT` is awaited by [`IncomingWorker::init`]
    pub async fn accept(&self) -> IpcResult<IncomingWorker> {
        let (stream, peer) = self.listener.accept().await?;
        trace!(%peer, "handshake connection");
        Ok(IncomingWorker {
            stream: framed(stream),
            peer,
            wait: self.wait,
        })
    }
}

/// A connection that has not sent `INIT` yet
pub struct IncomingWorker {
    stream: IpcStream,
    peer: SocketAddr,
    wait: Duration,
}

impl IncomingWorker {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Wait for `INIT`
    pub async fn init(mut self) -> IpcResult<PendingWorker> {
        match expect(&mut self.stream, self.wait, "INIT").await? {
            Message::Init => Ok(PendingWorker {
                stream: self.stream,
                peer: self.peer,
                wait: self.wait,
            }),
            other => Err(unexpected("INIT", &other)),
        }
    }
}

/// A worker that sent `INIT` and waits for its configuration
#[derive(Debug)]
pub struct PendingWorker {
    stream: IpcStream,
    peer: SocketAddr,
    wait: Duration,
}

impl PendingWorker {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send `CONF` and wait for `READY`
    pub async fn configure(mut self, config: WorkerConfig) -> IpcResult<()> {
        self.stream.send(Message::Conf(config)).await?;

        match expect(&mut self.stream, self.wait, "READY").await? {
            Message::Ready => Ok(()),
            other => Err(unexpected("READY", &other)),
        }
    }
}
