//! Pipeline YAML configuration types and resolved transfer settings.

use std::time::Duration;

use essync_client::ClusterEndpoint;
use essync_types::split_index_list;
use serde::{Deserialize, Serialize};

/// Top-level pipeline configuration, as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub source: ClusterEndpoint,
    pub destination: ClusterEndpoint,
    pub indices: IndexList,
    /// Read `indices` as `[source1, target1, source2, target2, ...]`.
    #[serde(default)]
    pub pairing: bool,
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// Index names, either as a YAML sequence or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexList {
    List(Vec<String>),
    Csv(String),
}

impl IndexList {
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::List(names) => names.iter().map(|n| n.trim().to_string()).collect(),
            Self::Csv(list) if list.trim().is_empty() => Vec::new(),
            Self::Csv(list) => split_index_list(list),
        }
    }
}

/// How the dispatcher decides that no more batches will arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Stop once every reader has finished and the queue is empty.
    #[default]
    ReadersDone,
    /// Stop at the first poll that waits `idle_timeout` without a batch.
    IdleTimeout,
}

impl std::fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadersDone => f.write_str("readers_done"),
            Self::IdleTimeout => f.write_str("idle_timeout"),
        }
    }
}

/// Tuning knobs under `resources:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Documents per page. `0` copies index definitions only.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub completion: CompletionMode,
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
    #[serde(default = "default_write_backoff_ms")]
    pub write_backoff_ms: u64,
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
    #[serde(default = "default_read_backoff_ms")]
    pub read_backoff_ms: u64,
    #[serde(default = "default_submission_queue_capacity")]
    pub submission_queue_capacity: usize,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_scroll_keepalive_secs")]
    pub scroll_keepalive_secs: u64,
}

fn default_queue_capacity() -> usize {
    64
}
fn default_batch_size() -> usize {
    500
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_max_write_retries() -> u32 {
    10
}
fn default_write_backoff_ms() -> u64 {
    10_000
}
fn default_max_read_failures() -> u32 {
    10
}
fn default_read_backoff_ms() -> u64 {
    1_000
}
fn default_submission_queue_capacity() -> usize {
    100
}
fn default_drain_timeout_secs() -> u64 {
    3_600
}
fn default_scroll_keepalive_secs() -> u64 {
    60
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            completion: CompletionMode::default(),
            max_write_retries: default_max_write_retries(),
            write_backoff_ms: default_write_backoff_ms(),
            max_read_failures: default_max_read_failures(),
            read_backoff_ms: default_read_backoff_ms(),
            submission_queue_capacity: default_submission_queue_capacity(),
            drain_timeout_secs: default_drain_timeout_secs(),
            scroll_keepalive_secs: default_scroll_keepalive_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Immutable settings for one run, resolved from [`ResourceConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub idle_timeout: Duration,
    pub completion: CompletionMode,
    pub max_write_retries: u32,
    pub write_backoff: Duration,
    pub max_read_failures: u32,
    pub read_backoff: Duration,
    pub submission_queue_capacity: usize,
    pub drain_timeout: Duration,
    pub scroll_keepalive: Duration,
}

impl TransferSettings {
    #[must_use]
    pub fn from_resources(resources: &ResourceConfig) -> Self {
        Self {
            queue_capacity: resources.queue_capacity,
            batch_size: resources.batch_size,
            idle_timeout: Duration::from_secs(resources.idle_timeout_secs),
            completion: resources.completion,
            max_write_retries: resources.max_write_retries,
            write_backoff: Duration::from_millis(resources.write_backoff_ms),
            max_read_failures: resources.max_read_failures,
            read_backoff: Duration::from_millis(resources.read_backoff_ms),
            submission_queue_capacity: resources.submission_queue_capacity,
            drain_timeout: Duration::from_secs(resources.drain_timeout_secs),
            scroll_keepalive: Duration::from_secs(resources.scroll_keepalive_secs),
        }
    }

    /// A zero batch size copies index definitions without any documents.
    #[must_use]
    pub fn schema_only(&self) -> bool {
        self.batch_size == 0
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_resources(&ResourceConfig::default())
    }
}
