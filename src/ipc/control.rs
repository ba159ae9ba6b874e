//! Control channel: one publisher, many subscribers, no acknowledgment
//!
//! The only payload ever published is [`Message::End`]. A subscriber that
//! loses its connection behaves as if it had received it.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::error::IpcResult;
use super::framing::{connect, framed};
use super::messages::Message;

pub struct ControlServer {
    tx: broadcast::Sender<Message>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr) -> IpcResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, _) = broadcast::channel(16);

        let subscribe = tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("control accept failed: {e}");
                        continue;
                    }
                };
                trace!(%peer, "control subscriber connected");

                let mut rx = subscribe.subscribe();
                tokio::spawn(async move {
                    let mut stream = framed(stream);
                    while let Ok(message) = rx.recv().await {
                        let end = message == Message::End;
                        if let Err(e) = stream.send(message).await {
                            debug!(%peer, "control subscriber gone: {e}");
                            break;
                        }
                        if end {
                            break;
                        }
                    }
                });
            }
        });

        debug!(%local_addr, "control server listening");
        Ok(Self {
            tx,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connected subscribers
    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish to every connected subscriber; returns how many got it queued
    pub fn broadcast(&self, message: Message) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Wait until every subscriber got `IPC_END` written, at most `wait`
    pub async fn drain(&self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        while self.subscribers() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub struct ControlClient {
    end: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl ControlClient {
    pub async fn connect(addr: SocketAddr, attempts: u32, delay: Duration) -> IpcResult<Self> {
        let mut stream = connect(addr, attempts, delay).await?;
        let (tx, end) = watch::channel(false);

        let reader = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::End)) => {
                        debug!("received IPC_END");
                        break;
                    }
                    Some(Ok(other)) => debug!("ignoring {other} on control channel"),
                    Some(Err(e)) => {
                        warn!("control channel failed: {e}");
                        break;
                    }
                    None => {
                        warn!("control channel closed");
                        break;
                    }
                }
            }
            let _ = tx.send(true);
        });

        Ok(Self { end, reader })
    }

    /// Non-blocking check whether the process should stop
    pub fn end_received(&self) -> bool {
        *self.end.borrow()
    }

    /// Wait until the process should stop
    pub async fn wait_end(&mut self) {
        let _ = self.end.wait_for(|end| *end).await;
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
