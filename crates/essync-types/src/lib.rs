//! Shared essync data model types.
//!
//! Kept free of runtime dependencies so both the client layer and the
//! transfer engine can use them.

pub mod record;
pub mod task;

pub use record::{CursorToken, DocumentRecord, TransferBatch, MAX_DOCUMENT_ID_BYTES};
pub use task::{
    dedup_index_tasks, parse_index_tasks, split_index_list, IndexSpecError, IndexTask,
};
