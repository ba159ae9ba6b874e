//! LogSinkActor - re-emits worker log records through the local subscriber

use tracing::{debug, error, info, instrument, trace, warn};

use crate::ipc::control::ControlClient;
use crate::ipc::push::PullServer;
use crate::ipc::{LogRecord, Message};

pub struct LogSinkActor {
    records: PullServer,
    control: ControlClient,
    received: u64,
}

impl LogSinkActor {
    pub fn new(records: PullServer, control: ControlClient) -> Self {
        Self {
            records,
            control,
            received: 0,
        }
    }

    /// Run until `IPC_END`; returns the number of records written
    #[instrument(skip(self))]
    pub async fn run(mut self) -> u64 {
        debug!(addr = %self.records.local_addr(), "starting log sink");

        loop {
            tokio::select! {
                _ = self.control.wait_end() => break,

                message = self.records.recv() => match message {
                    Some(Message::Log(record)) => self.emit(&record),
                    Some(other) => warn!("ignoring unexpected {other}"),
                    None => break,
                }
            }
        }

        while let Some(message) = self.records.try_recv() {
            if let Message::Log(record) = message {
                self.emit(&record);
            }
        }

        debug!(received = self.received, "log sink stopped");
        self.received
    }

    fn emit(&mut self, record: &LogRecord) {
        self.received += 1;
        let LogRecord {
            timestamp,
            source,
            target: origin,
            message,
            ..
        } = record;

        match record.level.as_str() {
            "ERROR" => error!(target: "worker", %source, %origin, %timestamp, "{message}"),
            "WARN" => warn!(target: "worker", %source, %origin, %timestamp, "{message}"),
            "INFO" => info!(target: "worker", %source, %origin, %timestamp, "{message}"),
            "DEBUG" => debug!(target: "worker", %source, %origin, %timestamp, "{message}"),
            _ => trace!(target: "worker", %source, %origin, %timestamp, "{message}"),
        }
    }
}
