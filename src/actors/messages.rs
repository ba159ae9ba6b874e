//! Message types for actor communication
//!
//! Commands go to a specific actor over its mpsc channel and carry a
//! oneshot sender when the caller waits for an answer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Commands that can be sent to the SupervisorActor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Current supervisor status, as served on the info channel
    GetStatus {
        respond_to: oneshot::Sender<SupervisorStatus>,
    },

    /// Broadcast `IPC_END` and stop
    ///
    /// Answered once the broadcast went out.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Status reported by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    /// Worker partitions created from the configuration
    pub workers: usize,

    /// Workers that received their configuration
    pub configured: usize,

    /// Workers that answered `READY`
    pub ready: usize,

    /// Attributes over all partitions
    pub attributes: usize,

    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Lifecycle of a poller worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Connecting to the supervisor
    Starting,
    /// Configuration received and applied
    Configured,
    /// Polling
    Running,
    /// `IPC_END` received, leaving the loop
    Stopping,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Configured => write!(f, "configured"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Summary returned when a worker leaves its loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub cycles: u64,
    pub results_sent: u64,
    pub results_dropped: u64,
    /// In-flight requests dropped at shutdown
    pub abandoned: usize,
}

/// Counters of the metrics writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub received: u64,
    pub written: u64,
    pub failed: u64,
    pub flushes: u64,
}
