//! dagwalk-core library.
//!
//! Discovers events of a DAG ledger, reorders them parents-first and
//! persists them so that no stored event ever references a missing parent.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums with a stable [`error::ErrorCode`];
//!   `anyhow::Result` only at the config and binary edges.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Shutdown**: every blocking call selects on a [`shutdown::Shutdown`].

pub mod buffer;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod event;
pub mod id;
pub mod ingest;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod store;
pub mod synth;

pub use buffer::{CausalBuffer, EventSink, OverflowPolicy, PushOutcome};
pub use cache::EpochWindow;
pub use config::DagwalkConfig;
pub use crawler::{CrawlMode, Crawler};
pub use error::{ErrorCode, Interrupted};
pub use event::{Event, Role};
pub use id::EventId;
pub use ingest::{Ingest, IngestReport};
pub use shutdown::Shutdown;
pub use sink::{DeliveryMode, SinkPipeline};
pub use source::{EventSource, MemorySource, RpcSource};
pub use store::{MemoryStore, SqliteStore};
