//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};
use essync_client::ClusterEndpoint;
use essync_types::{dedup_index_tasks, parse_index_tasks, IndexTask};

use crate::config::types::PipelineConfig;

/// Largest page a scroll request may ask for.
pub const MAX_BATCH_SIZE: usize = 10_000;

fn validate_endpoint(endpoint: &ClusterEndpoint, context: &str, errors: &mut Vec<String>) {
    if endpoint.host.trim().is_empty() {
        errors.push(format!("{context}: host must not be empty"));
    }
    if endpoint.host.contains("://") {
        errors.push(format!(
            "{context}: host '{}' must not include a scheme; use 'scheme:' instead",
            endpoint.host
        ));
    }
    if endpoint.port == 0 {
        errors.push(format!("{context}: port must be between 1 and 65535"));
    }
    if let Some(scheme) = endpoint.scheme.as_deref() {
        if scheme != "http" && scheme != "https" {
            errors.push(format!(
                "{context}: unsupported scheme '{scheme}', expected 'http' or 'https'"
            ));
        }
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    validate_endpoint(&config.source, "source", &mut errors);
    validate_endpoint(&config.destination, "destination", &mut errors);

    if let Err(e) = parse_index_tasks(&config.indices.names(), config.pairing) {
        errors.push(format!("indices: {e}"));
    }

    let resources = &config.resources;
    if resources.queue_capacity == 0 {
        errors.push("queue_capacity must be at least 1".to_string());
    }
    if resources.batch_size > MAX_BATCH_SIZE {
        errors.push(format!(
            "batch_size must not exceed {MAX_BATCH_SIZE}, got {}",
            resources.batch_size
        ));
    }
    if resources.idle_timeout_secs == 0 {
        errors.push("idle_timeout_secs must be at least 1".to_string());
    }
    if resources.max_read_failures == 0 {
        errors.push("max_read_failures must be at least 1".to_string());
    }
    if resources.submission_queue_capacity == 0 {
        errors.push("submission_queue_capacity must be at least 1".to_string());
    }
    if resources.drain_timeout_secs == 0 {
        errors.push("drain_timeout_secs must be at least 1".to_string());
    }
    if resources.scroll_keepalive_secs == 0 {
        errors.push("scroll_keepalive_secs must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

/// Validate `config` and return its index tasks in configured order.
///
/// A task listed more than once runs once; the repeats are logged.
///
/// # Errors
///
/// Returns the same error as [`validate_pipeline`].
pub fn resolve_tasks(config: &PipelineConfig) -> Result<Vec<IndexTask>> {
    validate_pipeline(config)?;
    let tasks = parse_index_tasks(&config.indices.names(), config.pairing)?;
    let (tasks, repeated) = dedup_index_tasks(tasks);
    for key in &repeated {
        tracing::warn!(index = %key, "Index listed more than once; transferring it once");
    }
    Ok(tasks)
}
