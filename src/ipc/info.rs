//! Synchronous status queries against a running daemon

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::error::IpcResult;
use super::framing::framed;
use super::messages::Message;

/// Default wait of [`get_info`]
pub const INFO_TIMEOUT: Duration = Duration::from_secs(1);

/// Answers every `INFO_REQ` with the latest published status
pub struct InfoServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl InfoServer {
    pub async fn bind(addr: SocketAddr, status: watch::Receiver<serde_json::Value>) -> IpcResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        trace!(%peer, "info client connected");
                        tokio::spawn(serve(stream, status.clone()));
                    }
                    Err(e) => warn!("info accept failed: {e}"),
                }
            }
        });

        debug!(%local_addr, "info server listening");
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for InfoServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, status: watch::Receiver<serde_json::Value>) {
    let mut stream = framed(stream);
    while let Some(message) = stream.next().await {
        let reply = match message {
            Ok(Message::InfoReq) => Message::InfoRep(status.borrow().clone()),
            Ok(other) => {
                debug!("ignoring {other} on info channel");
                continue;
            }
            Err(e) => {
                debug!("info client error: {e}");
                break;
            }
        };
        if stream.send(reply).await.is_err() {
            break;
        }
    }
}

/// Ask the daemon at `addr` for its status
///
/// Returns `None` when the daemon does not answer within `wait`.
pub async fn get_info(addr: SocketAddr, wait: Duration) -> Option<serde_json::Value> {
    let exchange = async {
        let stream = TcpStream::connect(addr).await.ok()?;
        let mut stream = framed(stream);
        stream.send(Message::InfoReq).await.ok()?;
        match stream.next().await? {
            Ok(Message::InfoRep(info)) => Some(info),
            _ => None,
        }
    };

    timeout(wait, exchange).await.ok().flatten()
}
