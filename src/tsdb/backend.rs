//! Metric writer trait

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::trace;

use crate::poller::MetricResult;

use super::error::TsdbResult;

/// Health status of a writer
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

/// Destination of finished poll results
///
/// `write_batch` is the only write path; the metrics writer actor
/// collects updates from all workers and hands them over in batches.
/// Implementations are shared across tasks and must be `Send + Sync`.
#[async_trait]
pub trait MetricWriter: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Persist a batch, in order
    async fn write_batch(&self, results: Vec<MetricResult>) -> TsdbResult<()>;

    async fn health_check(&self) -> TsdbResult<HealthStatus>;

    /// Flush and release resources; later writes fail
    async fn close(&self) -> TsdbResult<()>;
}

/// Accepts and drops everything
#[derive(Debug, Default)]
pub struct DiscardWriter;

#[async_trait]
impl MetricWriter for DiscardWriter {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn write_batch(&self, results: Vec<MetricResult>) -> TsdbResult<()> {
        trace!(count = results.len(), "discarding results");
        Ok(())
    }

    async fn health_check(&self) -> TsdbResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "results are discarded".to_string(),
            metadata: HashMap::new(),
        })
    }

    async fn close(&self) -> TsdbResult<()> {
        Ok(())
    }
}
