//! PollerWorker - one poller process
//!
//! ## Lifecycle
//!
//! ```text
//! Starting ──INIT/CONF──▶ Configured ──READY──▶ Running ──IPC_END──▶ Stopping
//! ```
//!
//! ## Running loop
//!
//! One iteration: start a cycle when due, advance the request engine
//! once, check the control channel, queue finished results for the metrics
//! writer. The engine, the buffer and the poller context are owned by the
//! loop; results are shipped by a separate task so a stalled writer never
//! holds up polling or the reaction to `IPC_END`.
//!
//! Once `run` returns nothing more is sent: the result queue gets
//! [`RESULT_DRAIN`] to flush, the log shipper is stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::Topology;
use crate::ipc::control::ControlClient;
use crate::ipc::handshake::{CONNECT_ATTEMPTS, CONNECT_DELAY, HandshakeClient};
use crate::ipc::log::LogShipper;
use crate::ipc::push::PushQueue;
use crate::ipc::Message;
use crate::poller::{Engine, PluginRegistry, PollerContext};
use crate::Attribute;

use super::messages::{WorkerReport, WorkerState};

/// Default wait for `CONF` after `INIT`
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Results buffered for the metrics writer
const RESULT_QUEUE: usize = 1024;

/// Upper bound on a single push to the metrics writer
const RESULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the result queue gets to flush after `IPC_END`
const RESULT_DRAIN: Duration = Duration::from_millis(250);

pub struct PollerWorker {
    topology: Topology,
    registry: Arc<PluginRegistry>,
    handshake_timeout: Duration,
    log_shipper: Option<LogShipper>,
    state: WorkerState,
}

impl PollerWorker {
    pub fn new(topology: Topology, registry: Arc<PluginRegistry>) -> Self {
        Self {
            topology,
            registry,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            log_shipper: None,
            state: WorkerState::Starting,
        }
    }

    /// Forward queued log records to the log sink once running
    pub fn with_log_shipper(mut self, shipper: LogShipper) -> Self {
        self.log_shipper = Some(shipper);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!("worker state {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run until `IPC_END`
    ///
    /// Handshake failures are fatal and returned as errors.
    #[instrument(skip(self), fields(handshake = %self.topology.handshake))]
    pub async fn run(mut self) -> Result<WorkerReport> {
        let control = ControlClient::connect(self.topology.control, CONNECT_ATTEMPTS, CONNECT_DELAY)
            .await
            .context("failed to connect to control channel")?;

        let (handshake, config) =
            HandshakeClient::init_and_config(self.topology.handshake, self.handshake_timeout)
                .await
                .context("configuration handshake failed")?;
        self.set_state(WorkerState::Configured);

        for attribute in &config.attributes {
            for stage in &attribute.pollers {
                if self.registry.get(&stage.plugin).is_none() {
                    warn!(attribute = attribute.id, plugin = %stage.plugin, "unknown poller plugin configured");
                }
            }
        }

        let attributes: Vec<Arc<Attribute>> = config.attributes.iter().cloned().map(Arc::new).collect();
        let mut engine = Engine::new(config.engine.clone());
        let mut ctx = PollerContext::new(self.registry.clone());
        let mut report = WorkerReport {
            worker_id: config.worker_id,
            ..WorkerReport::default()
        };

        let shipping = self
            .log_shipper
            .take()
            .map(|shipper| shipper.spawn(self.topology.log_sink));

        if let Err(e) = handshake.ready().await {
            if let Some(shipping) = shipping {
                shipping.abort();
            }
            return Err(e).context("failed to confirm configuration");
        }
        self.set_state(WorkerState::Running);

        let mut metrics = PushQueue::spawn(
            self.topology.metrics_writer,
            RESULT_QUEUE,
            RESULT_SEND_TIMEOUT,
        );
        info!(
            worker = config.worker_id,
            attributes = attributes.len(),
            interval_secs = config.interval,
            "poller worker running"
        );

        let interval = config.interval();
        let poll_wait = engine.config().poll_wait();
        let mut next_cycle = Instant::now();

        loop {
            let now = Instant::now();
            if now >= next_cycle {
                let cycle = ctx.start_cycle(&mut engine, &attributes);
                report.cycles = cycle;
                next_cycle += interval;
                if next_cycle <= now {
                    warn!(cycle, "poll cycle overran its interval");
                    next_cycle = now + interval;
                }
            }

            if !engine.poll(&mut ctx).await {
                sleep_until((Instant::now() + poll_wait).min(next_cycle)).await;
            }

            if control.end_received() {
                self.set_state(WorkerState::Stopping);
                break;
            }

            for result in ctx.drain_results() {
                trace!(attribute = result.attribute_id, cycle = result.cycle, "queueing result");
                if metrics.try_push(Message::MetricUpdate(result)).is_err() {
                    debug!("result queue full, dropping result");
                    report.results_dropped += 1;
                }
            }
        }

        report.abandoned = engine.abandon();
        let shipped = metrics.close(RESULT_DRAIN).await;
        report.results_sent = shipped.sent;
        report.results_dropped += shipped.failed + shipped.unsent;
        info!(
            worker = report.worker_id,
            cycles = report.cycles,
            sent = report.results_sent,
            dropped = report.results_dropped,
            abandoned = report.abandoned,
            "poller worker stopped"
        );

        if let Some(shipping) = shipping {
            shipping.abort();
            let _ = shipping.await;
        }
        Ok(report)
    }
}
