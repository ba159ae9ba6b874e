//! Ship `tracing` events of a worker to the log sink
//!
//! [`IpcLogLayer`] is added to the worker's subscriber next to the stderr
//! layer. It queues every event as a [`LogRecord`]; the paired
//! [`LogShipper`] pushes the queue to the log sink once the endpoint is
//! known. Records emitted before that are kept and sent later, up to
//! [`LOG_QUEUE`] of them; records emitted while the queue is full are lost.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::messages::{LogRecord, Message};
use super::push::{ShipCounters, ship};

/// Records buffered between the layer and the log sink
pub const LOG_QUEUE: usize = 4096;

/// Upper bound on a single push to the log sink
const LOG_SEND_TIMEOUT: Duration = Duration::from_secs(1);

pub struct IpcLogLayer {
    tx: mpsc::Sender<Message>,
    source: String,
}

impl IpcLogLayer {
    /// Layer tagging every record with `source`, plus its shipper
    pub fn new(source: impl Into<String>) -> (Self, LogShipper) {
        let (tx, rx) = mpsc::channel(LOG_QUEUE);
        (
            Self {
                tx,
                source: source.into(),
            },
            LogShipper { rx },
        )
    }
}

impl<S: Subscriber> Layer<S> for IpcLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // the shipping path's own diagnostics would feed back into the queue
        if metadata.target().starts_with("nms_poller::ipc::push") {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        // full queue: the record is dropped, logging never blocks
        let _ = self.tx.try_send(Message::Log(LogRecord {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            source: self.source.clone(),
            message: visitor.finish(),
        }));
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
}

impl RecordVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        format!("{} {}", self.message, self.fields.join(" "))
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Drains the records queued by an [`IpcLogLayer`]
pub struct LogShipper {
    rx: mpsc::Receiver<Message>,
}

impl LogShipper {
    /// Push every record to the log sink at `addr` until the layer is gone
    /// or the task is aborted
    pub fn spawn(self, addr: SocketAddr) -> JoinHandle<()> {
        tokio::spawn(ship(
            addr,
            self.rx,
            LOG_SEND_TIMEOUT,
            Arc::new(ShipCounters::default()),
        ))
    }
}
