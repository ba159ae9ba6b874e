//! In-memory metric writer (no persistence)
//!
//! Keeps the most recent results in a ring buffer. Used by tests and as
//! the default when no backend is configured.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::poller::MetricResult;

use super::backend::{HealthStatus, MetricWriter};
use super::error::{TsdbError, TsdbResult};

/// Results kept before the oldest are evicted
const MAX_RESULTS: usize = 10_000;

#[derive(Default)]
struct State {
    results: VecDeque<MetricResult>,
    written: u64,
    closed: bool,
}

#[derive(Default)]
pub struct MemoryWriter {
    state: Mutex<State>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored results, oldest first
    pub async fn results(&self) -> Vec<MetricResult> {
        self.state.lock().await.results.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MetricWriter for MemoryWriter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_batch(&self, results: Vec<MetricResult>) -> TsdbResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TsdbError::Closed);
        }

        debug!(count = results.len(), "storing results in memory");
        state.written += results.len() as u64;
        state.results.extend(results);

        let overflow = state.results.len().saturating_sub(MAX_RESULTS);
        state.results.drain(..overflow);
        Ok(())
    }

    async fn health_check(&self) -> TsdbResult<HealthStatus> {
        let state = self.state.lock().await;
        let mut metadata = HashMap::new();
        metadata.insert("stored".to_string(), state.results.len().to_string());
        metadata.insert("written".to_string(), state.written.to_string());

        Ok(HealthStatus {
            healthy: !state.closed,
            message: "in-memory writer".to_string(),
            metadata,
        })
    }

    async fn close(&self) -> TsdbResult<()> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}
