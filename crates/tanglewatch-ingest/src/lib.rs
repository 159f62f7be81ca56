//! Tanglewatch stream-ingestion and deduplication subsystem.
//!
//! Several redundant upstream feeds broadcast overlapping views of the
//! same ledger activity. This crate keeps one ingestion worker alive per
//! registered endpoint, classifies every inbound frame, and counts each
//! logical event once per endpoint/category while a shared time-windowed
//! cache tracks which identifiers were seen recently.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ EndpointSupervisor │  scan loop: one worker per Idle endpoint
//! └─────────┬──────────┘
//!           │ spawns
//!           ▼
//! ┌────────────────────┐     ┌─────────────┐
//! │    StreamWorker    │────▶│ CounterSink │  per-endpoint per-category
//! └─────────┬──────────┘     └─────────────┘
//!           │ seen()?
//!           ▼
//! ┌────────────────────┐
//! │     DedupCache     │  per-category segment chains, purged periodically
//! └────────────────────┘
//! ```
//!
//! Workers run until their transport fails; the supervisor relaunches
//! them on its next scan, indefinitely and without backoff. All state is
//! in-memory and rebuilt from scratch on process start — dedup memory is
//! intentionally bounded, not durable.

pub mod counters;
pub mod dedup;
pub mod error;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use counters::{CounterSink, MemoryCounters, MetricsSink};
pub use dedup::{ChainStats, DedupCache, DedupConfig};
pub use error::{Error, Result};
pub use supervisor::{EndpointRegistry, RunState, Supervisor, SupervisorConfig};
pub use transport::{
    validate_endpoint_uri, Subscription, TcpSubscription, TcpTransport, Transport,
};
pub use worker::{StreamWorker, WorkerStats};
