//! Ingestion Worker: pulls the external SSE feed and hands every event to
//! an [`relay_api::EventStore`].
//!
//! One [`run_once`] call covers exactly one stream lifetime. Re-running
//! with backoff is the job of [`Supervisor`].

pub mod config;
mod decode;
mod sse;
mod supervisor;
mod worker;

pub use config::{FeedConfig, FeedSource};
pub use decode::decode_event;
pub use sse::{SseDecoder, SseFrame};
pub use supervisor::{Backoff, Supervisor};
pub use worker::{IngestReport, RunOutcome, ingest_stream, run_once, spawn_run};
