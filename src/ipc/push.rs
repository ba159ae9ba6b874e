//! One-way best-effort channels (log records, metric updates)
//!
//! Many [`PushSocket`]s feed one [`PullServer`]. Messages of one sender
//! arrive in order; nothing is acknowledged.
//!
//! A [`PushQueue`] puts a bounded queue and a shipping task in front of a
//! socket, so producers never wait on a slow or stalled receiver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::error::IpcResult;
use super::framing::{IpcStream, framed};
use super::messages::Message;

/// Sending end, connects on first use and again after a failure
pub struct PushSocket {
    addr: SocketAddr,
    stream: Option<IpcStream>,
}

impl PushSocket {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send(&mut self, message: Message) -> IpcResult<()> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(self.addr).await?;
                stream.set_nodelay(true)?;
                framed(stream)
            }
        };

        // a failed stream is dropped, the next send reconnects
        stream.send(message).await?;
        self.stream = Some(stream);
        Ok(())
    }
}

/// Delivery counters of a shipping task
#[derive(Debug, Default)]
pub(crate) struct ShipCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Ship everything received on `rx` to `addr`, one bounded send at a time
///
/// A send that fails or times out is counted and dropped; its stream is
/// discarded and the next send reconnects.
pub(crate) async fn ship(
    addr: SocketAddr,
    mut rx: mpsc::Receiver<Message>,
    send_timeout: Duration,
    counters: Arc<ShipCounters>,
) {
    let mut push = PushSocket::new(addr);
    while let Some(message) = rx.recv().await {
        match timeout(send_timeout, push.send(message)).await {
            Ok(Ok(())) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                trace!(%addr, "push failed: {e}");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                trace!(%addr, "push timed out");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// What happened to the messages of a closed [`PushQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipReport {
    /// Written to the receiver
    pub sent: u64,
    /// Send failed or timed out
    pub failed: u64,
    /// Still queued when the queue was closed
    pub unsent: u64,
}

/// Bounded, non-blocking front of a [`PushSocket`]
pub struct PushQueue {
    tx: mpsc::Sender<Message>,
    queued: u64,
    counters: Arc<ShipCounters>,
    task: JoinHandle<()>,
}

impl PushQueue {
    pub fn spawn(addr: SocketAddr, capacity: usize, send_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(ShipCounters::default());
        let task = tokio::spawn(ship(addr, rx, send_timeout, counters.clone()));

        Self {
            tx,
            queued: 0,
            counters,
            task,
        }
    }

    /// Queue `message` without waiting; hands it back when the queue is full
    pub fn try_push(&mut self, message: Message) -> Result<(), Message> {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.queued += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(message))
            | Err(mpsc::error::TrySendError::Closed(message)) => Err(message),
        }
    }

    /// Stop accepting messages and let the shipping task drain for at most
    /// `drain`; whatever is still queued after that is discarded
    ///
    /// The shipping task has exited when this returns.
    pub async fn close(self, drain: Duration) -> ShipReport {
        let Self {
            tx,
            queued,
            counters,
            mut task,
        } = self;
        drop(tx);

        if timeout(drain, &mut task).await.is_err() {
            task.abort();
            let _ = task.await;
        }

        let sent = counters.sent.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        ShipReport {
            sent,
            failed,
            unsent: queued.saturating_sub(sent + failed),
        }
    }
}

/// Receiving end, fans in every connected sender
pub struct PullServer {
    rx: mpsc::Receiver<Message>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl PullServer {
    pub async fn bind(addr: SocketAddr, capacity: usize) -> IpcResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(capacity);

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                trace!(%peer, "sender connected");

                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut stream = framed(stream);
                    while let Some(message) = stream.next().await {
                        match message {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(%peer, "dropping sender: {e}");
                                return;
                            }
                        }
                    }
                    debug!(%peer, "sender disconnected");
                });
            }
        });

        Ok(Self {
            rx,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message already received, without waiting
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PullServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
