//! Result sinks for the inference engine.
//!
//! Completed results and camera events leave the engine through the
//! `ResultSink` trait. Persistence lives behind it; this crate provides:
//! - `MemorySink`: bounded in-memory results plus a broadcast event feed
//! - `TracingSink`: structured log lines only

pub mod error;
pub mod memory;
pub mod sink;
pub mod tracing_sink;

pub use error::{SinkError, SinkResult};
pub use memory::{MemorySink, StoredEvent};
pub use sink::ResultSink;
pub use tracing_sink::TracingSink;
