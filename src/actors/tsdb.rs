//! MetricsWriterActor - collects results from every worker and persists them
//!
//! ## Batching Strategy
//!
//! Metric updates are buffered and handed to the [`MetricWriter`] in
//! batches:
//! - **Size trigger**: flush after 100 results
//! - **Time trigger**: flush after 5 seconds
//!
//! `IPC_END` flushes what is left and closes the writer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::ipc::Message;
use crate::ipc::control::ControlClient;
use crate::ipc::push::PullServer;
use crate::poller::MetricResult;
use crate::tsdb::MetricWriter;

use super::messages::WriterStats;

/// Batch size trigger - flush after this many results
const BATCH_SIZE_TRIGGER: usize = 100;

/// Batch time trigger - flush after this duration
const BATCH_TIME_TRIGGER: Duration = Duration::from_secs(5);

pub struct MetricsWriterActor {
    writer: Arc<dyn MetricWriter>,
    updates: PullServer,
    control: ControlClient,
    batch: Vec<MetricResult>,
    stats: WriterStats,
}

impl MetricsWriterActor {
    pub fn new(writer: Arc<dyn MetricWriter>, updates: PullServer, control: ControlClient) -> Self {
        Self {
            writer,
            updates,
            control,
            batch: Vec::with_capacity(BATCH_SIZE_TRIGGER),
            stats: WriterStats::default(),
        }
    }

    /// Run until `IPC_END`
    #[instrument(skip(self), fields(backend = self.writer.name()))]
    pub async fn run(mut self) -> WriterStats {
        debug!(addr = %self.updates.local_addr(), "starting metrics writer");
        let mut flush_interval = time::interval(BATCH_TIME_TRIGGER);

        loop {
            tokio::select! {
                _ = self.control.wait_end() => {
                    debug!("received IPC_END");
                    break;
                }

                message = self.updates.recv() => {
                    match message {
                        Some(Message::MetricUpdate(result)) => self.store(result).await,
                        Some(other) => warn!("ignoring unexpected {other}"),
                        None => {
                            warn!("update channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if !self.batch.is_empty() {
                        trace!("time-based flush triggered ({} results)", self.batch.len());
                        self.flush().await;
                    }
                }
            }
        }

        while let Some(message) = self.updates.try_recv() {
            if let Message::MetricUpdate(result) = message {
                self.store(result).await;
            }
        }

        if !self.batch.is_empty() {
            debug!("final flush before shutdown ({} results)", self.batch.len());
            self.flush().await;
        }

        if let Err(e) = self.writer.close().await {
            error!("error closing {} writer: {e}", self.writer.name());
        }

        info!(
            received = self.stats.received,
            written = self.stats.written,
            failed = self.stats.failed,
            "metrics writer stopped"
        );
        self.stats
    }

    async fn store(&mut self, result: MetricResult) {
        trace!(attribute = result.attribute_id, cycle = result.cycle, "buffering result");
        self.stats.received += 1;
        self.batch.push(result);

        if self.batch.len() >= BATCH_SIZE_TRIGGER {
            trace!("size-based flush triggered ({} results)", self.batch.len());
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let batch: Vec<MetricResult> = self.batch.drain(..).collect();
        let count = batch.len() as u64;

        match self.writer.write_batch(batch).await {
            Ok(()) => {
                self.stats.flushes += 1;
                self.stats.written += count;
                trace!("flush #{} complete ({count} results)", self.stats.flushes);
            }
            Err(e) => {
                // dropped, the next cycle produces fresh values
                self.stats.failed += count;
                error!("failed to write {count} results: {e}");
            }
        }
    }
}
