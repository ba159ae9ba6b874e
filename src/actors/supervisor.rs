//! SupervisorActor - hands out worker configurations and stops everyone
//!
//! ## Message Flow
//!
//! ```text
//! worker ──INIT──▶ init task ──PendingWorker──▶ SupervisorActor ──CONF──▶ worker
//!                                                      │  ◀──READY── (configure task)
//!                                                      ├──▶ info channel (status snapshot)
//!        Commands (GetStatus, Shutdown) ──────────────▶│
//!                                                      └──IPC_END──▶ control channel
//! ```
//!
//! Configurations are partitions of the attribute list, handed out in the
//! order workers connect. A worker that fails its handshake gives its
//! partition back for the next one.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, Topology, WorkerConfig};
use crate::ipc::Message;
use crate::ipc::control::ControlServer;
use crate::ipc::handshake::{HandshakeServer, PendingWorker};
use crate::ipc::info::InfoServer;

use super::messages::{SupervisorCommand, SupervisorStatus};

/// Wait for `INIT` after accept and for `READY` after `CONF`
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest wait for `IPC_END` to be written to every subscriber
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Refresh period of the info snapshot
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

type Configured = (WorkerConfig, crate::ipc::IpcResult<()>);

pub struct SupervisorActor {
    control: ControlServer,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    pending_rx: mpsc::Receiver<PendingWorker>,
    configured_tx: mpsc::Sender<Configured>,
    configured_rx: mpsc::Receiver<Configured>,
    status_tx: watch::Sender<serde_json::Value>,

    /// Partitions not handed out yet
    unassigned: VecDeque<WorkerConfig>,

    workers: usize,
    attributes: usize,
    configured: usize,
    ready: usize,
    started_at: DateTime<Utc>,
    started: Instant,

    accept_task: JoinHandle<()>,
    _info: InfoServer,
}

impl SupervisorActor {
    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            workers: self.workers,
            configured: self.configured,
            ready: self.ready,
            attributes: self.attributes,
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn publish_status(&self) {
        match serde_json::to_value(self.status()) {
            Ok(status) => {
                self.status_tx.send_replace(status);
            }
            Err(e) => error!("failed to serialize status: {e}"),
        }
    }

    #[instrument(skip(self), fields(workers = self.workers))]
    pub async fn run(mut self) {
        debug!("starting supervisor actor");
        let mut status_ticker = interval(STATUS_INTERVAL);

        let shutdown_ack = loop {
            tokio::select! {
                Some(pending) = self.pending_rx.recv() => {
                    self.assign(pending);
                    self.publish_status();
                }

                Some((config, result)) = self.configured_rx.recv() => {
                    match result {
                        Ok(()) => {
                            self.ready += 1;
                            info!(worker = config.worker_id, "worker ready");
                        }
                        Err(e) => {
                            error!(worker = config.worker_id, "worker handshake failed: {e}");
                            self.configured -= 1;
                            self.unassigned.push_front(config);
                        }
                    }
                    self.publish_status();
                }

                _ = status_ticker.tick() => self.publish_status(),

                cmd = self.command_rx.recv() => match cmd {
                    Some(SupervisorCommand::GetStatus { respond_to }) => {
                        let _ = respond_to.send(self.status());
                    }
                    Some(SupervisorCommand::Shutdown { respond_to }) => {
                        debug!("received shutdown command");
                        break Some(respond_to);
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break None;
                    }
                },
            }
        };

        self.accept_task.abort();
        let sent = self.control.broadcast(Message::End);
        info!("sent IPC_END to {sent} subscriber(s)");
        if !self.control.drain(DRAIN_TIMEOUT).await {
            warn!("not every subscriber received IPC_END");
        }

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
        debug!("supervisor actor stopped");
    }

    fn assign(&mut self, pending: PendingWorker) {
        let peer = pending.peer();
        let Some(config) = self.unassigned.pop_front() else {
            warn!(%peer, "no configuration left for worker");
            return;
        };

        debug!(%peer, worker = config.worker_id, "sending configuration");
        self.configured += 1;
        let configured_tx = self.configured_tx.clone();
        tokio::spawn(async move {
            let result = pending.configure(config.clone()).await;
            let _ = configured_tx.send((config, result)).await;
        });
    }
}

/// Handle for controlling the SupervisorActor
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,

    /// Addresses actually bound, useful when the topology asked for port 0
    pub endpoints: Topology,
}

impl SupervisorHandle {
    /// Bind the supervisor endpoints and spawn the actor
    pub async fn spawn(config: &Config) -> Result<Self> {
        let partitions = config.partition()?;
        let attributes = partitions.iter().map(|p| p.attributes.len()).sum();

        let control = ControlServer::bind(config.topology.control)
            .await
            .with_context(|| format!("failed to bind control endpoint {}", config.topology.control))?;
        let handshake = HandshakeServer::bind(config.topology.handshake, HANDSHAKE_TIMEOUT)
            .await
            .with_context(|| format!("failed to bind handshake endpoint {}", config.topology.handshake))?;

        let (status_tx, status_rx) = watch::channel(serde_json::Value::Null);
        let info = InfoServer::bind(config.topology.info, status_rx)
            .await
            .with_context(|| format!("failed to bind info endpoint {}", config.topology.info))?;

        let endpoints = Topology {
            control: control.local_addr(),
            handshake: handshake.local_addr()?,
            info: info.local_addr(),
            ..config.topology.clone()
        };

        let (pending_tx, pending_rx) = mpsc::channel(8);
        let accept_task = tokio::spawn(async move {
            // INIT is awaited per connection, a silent peer holds up no one else
            let mut inits = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = handshake.accept() => match accepted {
                        Ok(incoming) => {
                            inits.spawn(incoming.init());
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    },

                    Some(joined) = inits.join_next() => match joined {
                        Ok(Ok(pending)) => {
                            if pending_tx.send(pending).await.is_err() {
                                break;
                            }
                        }
                        Ok(Err(e)) => warn!("rejected worker connection: {e}"),
                        Err(e) => error!("handshake task failed: {e}"),
                    },
                }
            }
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (configured_tx, configured_rx) = mpsc::channel(8);

        let actor = SupervisorActor {
            control,
            command_rx: cmd_rx,
            pending_rx,
            configured_tx,
            configured_rx,
            status_tx,
            workers: partitions.len(),
            unassigned: partitions.into(),
            attributes,
            configured: 0,
            ready: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            accept_task,
            _info: info,
        };
        actor.publish_status();

        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            endpoints,
        })
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive response")
    }

    /// Broadcast `IPC_END` and stop the supervisor
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("supervisor stopped before acknowledging")
    }
}
