//! Actor-based poller processes
//!
//! Each process of the poller runs one actor as an independent async task.
//! Processes talk over the IPC channels in [`crate::ipc`]; inside a
//! process, actors are driven through Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                        ┌──────────────────┐
//!                        │  SupervisorActor │── info ──▶ nms-info
//!                        └───┬─────────┬────┘
//!                 handshake  │         │ control (IPC_END)
//!            ┌───────────────┼─────────┼──────────────┬───────────────┐
//!            │               │         │              │               │
//!    ┌───────▼───────┐ ┌─────▼─────────▼┐     ┌───────▼──────┐ ┌──────▼──────┐
//!    │ PollerWorker  │ │ PollerWorker   │     │ LogSinkActor │ │ MetricsWriter│
//!    │  (worker 0)   │ │  (worker N)    │     │              │ │    Actor    │
//!    └───┬───────┬───┘ └───┬────────┬───┘     └──────▲───────┘ └──────▲──────┘
//!        │ logs  │ results │        │                │                │
//!        └───────┼─────────┼────────┼────────────────┘                │
//!                └─────────┴────────┴─────────────────────────────────┘
//! ```
//!
//! ## Actors
//!
//! - **SupervisorActor**: hands out worker configurations, serves status,
//!   broadcasts `IPC_END`
//! - **PollerWorker**: runs poll cycles through the request engine
//! - **LogSinkActor**: single destination of every worker's log records
//! - **MetricsWriterActor**: batches results into a [`crate::tsdb::MetricWriter`]

pub mod logger;
pub mod messages;
pub mod supervisor;
pub mod tsdb;
pub mod worker;
