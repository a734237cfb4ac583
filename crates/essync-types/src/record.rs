//! Documents and batches moved through the transfer pipeline.

use serde::{Deserialize, Serialize};

/// Maximum byte length of a document identifier accepted by the index service.
pub const MAX_DOCUMENT_ID_BYTES: usize = 512;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque continuation handle returned by a paginated search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorToken(String);

impl CursorToken {
    /// Wrap a token issued by the remote service.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Scroll ids run to hundreds of bytes; keep log lines readable.
        if self.0.len() > 16 {
            let cut = self
                .0
                .char_indices()
                .nth(16)
                .map_or(self.0.len(), |(idx, _)| idx);
            write!(f, "{}…", &self.0[..cut])
        } else {
            f.write_str(&self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single document: its identifier and its serialized JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub payload: String,
}

impl DocumentRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// Byte length of the identifier.
    #[must_use]
    pub fn id_len(&self) -> usize {
        self.id.len()
    }

    /// Whether the identifier fits the service's protocol limit.
    #[must_use]
    pub fn has_valid_id(&self) -> bool {
        self.id_len() <= MAX_DOCUMENT_ID_BYTES
    }
}

/// One page of documents read from a source index, bound for a target index.
///
/// Moved from the reader into the transfer queue and from there into exactly
/// one writer; never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub source_index: String,
    pub target_index: String,
    pub cursor_token: Option<CursorToken>,
    pub documents: Vec<DocumentRecord>,
}

impl TransferBatch {
    #[must_use]
    pub fn new(
        source_index: impl Into<String>,
        target_index: impl Into<String>,
        cursor_token: Option<CursorToken>,
        documents: Vec<DocumentRecord>,
    ) -> Self {
        Self {
            source_index: source_index.into(),
            target_index: target_index.into(),
            cursor_token,
            documents,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Total payload bytes carried by the batch.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.documents.iter().map(|doc| doc.payload.len()).sum()
    }

    /// Split the batch into records that may be written and records whose
    /// identifiers exceed [`MAX_DOCUMENT_ID_BYTES`].
    #[must_use]
    pub fn partition_by_id_limit(self) -> (Vec<DocumentRecord>, Vec<DocumentRecord>) {
        self.documents
            .into_iter()
            .partition(DocumentRecord::has_valid_id)
    }
}
