//! Index transfer tasks and index-list parsing.

use serde::{Deserialize, Serialize};

/// Separator used in task keys when source and target names differ.
pub const PAIR_SEPARATOR: &str = " -> ";

/// One source index copied into one target index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexTask {
    pub source_index: String,
    pub target_index: String,
}

impl IndexTask {
    /// Copy an index into a destination index of the same name.
    #[must_use]
    pub fn same_name(index: impl Into<String>) -> Self {
        let index = index.into();
        Self {
            target_index: index.clone(),
            source_index: index,
        }
    }

    /// Copy `source` into a differently named `target`.
    #[must_use]
    pub fn paired(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_index: source.into(),
            target_index: target.into(),
        }
    }

    #[must_use]
    pub fn is_renamed(&self) -> bool {
        self.source_index != self.target_index
    }

    /// Key used for statistics and logging.
    ///
    /// `orders` for a same-name task, `orders -> orders_v2` for a pair.
    #[must_use]
    pub fn key(&self) -> String {
        if self.is_renamed() {
            format!("{}{PAIR_SEPARATOR}{}", self.source_index, self.target_index)
        } else {
            self.source_index.clone()
        }
    }
}

impl std::fmt::Display for IndexTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Errors in a requested index list. All of them are detected before any
/// remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexSpecError {
    #[error("no indices requested")]
    Empty,
    #[error(
        "index pairing requires an even number of names \
         (source1, target1, source2, target2, ...), got {len}"
    )]
    OddPairing { len: usize },
    #[error("index name at position {position} is empty")]
    EmptyName { position: usize },
}

/// Turn a flat list of index names into transfer tasks.
///
/// Without pairing every name is copied to a destination index of the same
/// name. With pairing the list is read as `[source1, target1, source2, target2, ...]`.
///
/// # Errors
///
/// Returns [`IndexSpecError`] for an empty list, an empty name, or an
/// odd-length list in pairing mode. Repeated tasks are kept; see
/// [`dedup_index_tasks`].
pub fn parse_index_tasks<S: AsRef<str>>(
    names: &[S],
    pairing: bool,
) -> Result<Vec<IndexTask>, IndexSpecError> {
    if names.is_empty() {
        return Err(IndexSpecError::Empty);
    }
    if pairing && names.len() % 2 != 0 {
        return Err(IndexSpecError::OddPairing { len: names.len() });
    }

    let trimmed: Vec<&str> = names.iter().map(|n| n.as_ref().trim()).collect();
    if let Some(position) = trimmed.iter().position(|n| n.is_empty()) {
        return Err(IndexSpecError::EmptyName { position });
    }

    let tasks = if pairing {
        trimmed
            .chunks_exact(2)
            .map(|pair| IndexTask::paired(pair[0], pair[1]))
            .collect()
    } else {
        trimmed.iter().map(|n| IndexTask::same_name(*n)).collect()
    };
    Ok(tasks)
}

/// Keep the first occurrence of every task key.
///
/// Returns the unique tasks in their original order and the keys of the
/// repeated entries that were removed.
#[must_use]
pub fn dedup_index_tasks(tasks: Vec<IndexTask>) -> (Vec<IndexTask>, Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    let mut repeated = Vec::new();
    let unique = tasks
        .into_iter()
        .filter(|task| {
            let key = task.key();
            if seen.insert(key.clone()) {
                true
            } else {
                repeated.push(key);
                false
            }
        })
        .collect();
    (unique, repeated)
}

/// Split a comma-separated index list, dropping surrounding whitespace.
#[must_use]
pub fn split_index_list(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_string()).collect()
}
