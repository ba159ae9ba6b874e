//! Append-only JSON lines writer
//!
//! One `MetricResult` document per line. The file is created if missing
//! and never truncated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::poller::MetricResult;

use super::backend::{HealthStatus, MetricWriter};
use super::error::{TsdbError, TsdbResult};

pub struct JsonLinesWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesWriter {
    pub async fn open(path: impl AsRef<Path>) -> TsdbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| TsdbError::OpenFailed(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "opened metrics file");
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricWriter for JsonLinesWriter {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    #[instrument(skip(self, results), fields(count = results.len()))]
    async fn write_batch(&self, results: Vec<MetricResult>) -> TsdbResult<()> {
        let mut lines = Vec::with_capacity(results.len() * 128);
        for result in &results {
            serde_json::to_writer(&mut lines, result)?;
            lines.push(b'\n');
        }

        let mut file = self.file.lock().await;
        let file = file.as_mut().ok_or(TsdbError::Closed)?;
        file.write_all(&lines).await?;
        file.flush().await?;
        Ok(())
    }

    async fn health_check(&self) -> TsdbResult<HealthStatus> {
        let open = self.file.lock().await.is_some();
        let size = tokio::fs::metadata(&self.path).await.map(|m| m.len());

        let mut metadata = HashMap::new();
        metadata.insert("path".to_string(), self.path.display().to_string());
        if let Ok(size) = &size {
            metadata.insert("bytes".to_string(), size.to_string());
        }

        Ok(HealthStatus {
            healthy: open && size.is_ok(),
            message: match size {
                Ok(_) if open => "metrics file writable".to_string(),
                Ok(_) => "writer closed".to_string(),
                Err(e) => format!("metrics file unavailable: {e}"),
            },
            metadata,
        })
    }

    async fn close(&self) -> TsdbResult<()> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.sync_all().await?;
        }
        Ok(())
    }
}
