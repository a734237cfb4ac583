//! Index service clients for essync.
//!
//! [`IndexService`] is the contract the transfer engine consumes.
//! [`HttpIndexService`] talks to an Elasticsearch-compatible REST API;
//! [`MemoryIndexService`] keeps everything in process for tests and
//! local dry runs.

pub mod endpoint;
pub mod error;
pub mod http;
pub mod memory;
pub mod service;

pub use endpoint::ClusterEndpoint;
pub use error::{Result, ServiceError};
pub use http::HttpIndexService;
pub use memory::MemoryIndexService;
pub use service::{BulkOutcome, IndexService, RejectedRecord, SearchPage};
