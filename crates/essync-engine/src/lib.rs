//! Transfer engine for essync.
//!
//! Readers page through source indices and fill a bounded queue; a single
//! dispatcher drains it into a pool of writers that bulk-create documents at
//! the destination. Counters live in a shared [`stats::StatsRegistry`].

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod errors;
pub mod orchestrator;
pub mod pool;
pub mod provision;
pub mod queue;
pub mod reader;
pub mod result;
pub mod stats;
pub mod writer;

// Re-export public API for convenience
pub use config::types::{CompletionMode, PipelineConfig, TransferSettings};
pub use errors::PipelineError;
pub use orchestrator::{check_pipeline, run_pipeline, run_transfer};
pub use result::{CheckReport, IndexReport, TransferReport};
