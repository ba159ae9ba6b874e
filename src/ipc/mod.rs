//! Messaging fabric between the poller processes
//!
//! ```text
//!                 ┌──────────────┐  control (IPC_END)   ┌──────────┐
//!                 │  supervisor  │ ───────────────────▶ │ worker N │
//!  nms-info ────▶ │ info  hshake │ ◀── INIT/CONF/READY ─│          │
//!                 └──────────────┘                      └────┬─────┘
//!                                              LOG           │  METRIC_UPDATE
//!                                   ┌────────────────────────┴──────────┐
//!                                   ▼                                   ▼
//!                              log sink                          metrics writer
//! ```
//!
//! Every channel is a TCP connection carrying [`IpcCodec`] packets.
//!
//! - [`control`]: publish/subscribe, only payload is `IPC_END`
//! - [`handshake`]: `INIT`, `CONF`, `READY` between worker and supervisor
//! - [`info`]: request/reply status queries
//! - [`push`]: one-way fan-in for log records and metric updates
//! - [`log`]: `tracing` layer shipping worker events to the log sink

pub mod control;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod info;
pub mod log;
pub mod messages;
pub mod push;

pub use error::{IpcError, IpcResult};
pub use framing::{IpcCodec, IpcStream};
pub use messages::{Envelope, LogRecord, Message, Tag};
