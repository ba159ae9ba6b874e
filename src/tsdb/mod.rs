//! Time-series destinations of poll results
//!
//! [`MetricWriter`] is implemented by:
//!
//! - [`DiscardWriter`]: drops everything (`"backend": "none"`)
//! - [`MemoryWriter`]: bounded in-memory ring (default)
//! - [`JsonLinesWriter`]: append-only JSON lines file

pub mod backend;
pub mod error;
pub mod jsonl;
pub mod memory;

use std::sync::Arc;

pub use backend::{DiscardWriter, HealthStatus, MetricWriter};
pub use error::{TsdbError, TsdbResult};
pub use jsonl::JsonLinesWriter;
pub use memory::MemoryWriter;

use crate::config::TsdbConfig;

/// Build the writer selected in the configuration
pub async fn open_writer(config: &TsdbConfig) -> TsdbResult<Arc<dyn MetricWriter>> {
    Ok(match config {
        TsdbConfig::Disabled => Arc::new(DiscardWriter),
        TsdbConfig::Memory => Arc::new(MemoryWriter::new()),
        TsdbConfig::Jsonl { path } => Arc::new(JsonLinesWriter::open(path).await?),
    })
}
