//! Pipeline orchestrator: provisions indices, runs readers, dispatcher and
//! writer pool together, and collects the report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use essync_client::{HttpIndexService, IndexService};
use essync_types::IndexTask;
use tokio::task::JoinSet;

use crate::config::types::{PipelineConfig, TransferSettings};
use crate::config::validator::resolve_tasks;
use crate::dispatcher::{run_dispatcher, DispatchSummary};
use crate::errors::PipelineError;
use crate::pool::{pool_size, WriterPool};
use crate::provision::{inspect_indices, provision_indices, ProvisionedTask};
use crate::queue::TransferQueue;
use crate::reader::{run_reader, ReadPolicy, ReaderOutcome, ReaderTracker};
use crate::result::{CheckReport, IndexReport, TransferReport};
use crate::stats::StatsRegistry;
use crate::writer::{BatchWriter, WritePolicy};

type Services = (Arc<dyn IndexService>, Arc<dyn IndexService>);

fn validated_tasks(config: &PipelineConfig) -> Result<Vec<IndexTask>, PipelineError> {
    resolve_tasks(config).map_err(|e| PipelineError::Config(format!("{e:#}")))
}

fn build_services(
    config: &PipelineConfig,
    settings: &TransferSettings,
) -> Result<Services, PipelineError> {
    let source = HttpIndexService::new("source", config.source.clone(), settings.scroll_keepalive)?;
    let destination = HttpIndexService::new(
        "destination",
        config.destination.clone(),
        settings.scroll_keepalive,
    )?;
    let source: Arc<dyn IndexService> = Arc::new(source);
    let destination: Arc<dyn IndexService> = Arc::new(destination);
    Ok((source, destination))
}

/// Validate `config`, connect to both clusters and run the transfer.
///
/// # Errors
///
/// Returns `PipelineError::Config` for an invalid configuration (before any
/// remote call) and `PipelineError::Service` if a client cannot be built.
/// Failures of individual indices are reported, not returned.
pub async fn run_pipeline(config: &PipelineConfig) -> Result<TransferReport, PipelineError> {
    let tasks = validated_tasks(config)?;
    let settings = TransferSettings::from_resources(&config.resources);
    let (source, destination) = build_services(config, &settings)?;
    run_transfer(&config.pipeline, &tasks, &settings, source, destination).await
}

/// Validate `config` and inspect both clusters without changing anything.
///
/// # Errors
///
/// Same as [`run_pipeline`].
pub async fn check_pipeline(config: &PipelineConfig) -> Result<CheckReport, PipelineError> {
    let tasks = validated_tasks(config)?;
    let settings = TransferSettings::from_resources(&config.resources);
    let (source, destination) = build_services(config, &settings)?;
    tracing::info!(pipeline = config.pipeline, indices = tasks.len(), "Checking pipeline");

    let indices = inspect_indices(source.as_ref(), destination.as_ref(), &tasks).await;
    Ok(CheckReport {
        pipeline: config.pipeline.clone(),
        source_url: config.source.base_url(),
        destination_url: config.destination.base_url(),
        indices,
    })
}

/// Run a transfer of `tasks` between two already-built services.
///
/// # Errors
///
/// Returns `PipelineError::Config` if `tasks` is empty.
pub async fn run_transfer(
    pipeline: &str,
    tasks: &[IndexTask],
    settings: &TransferSettings,
    source: Arc<dyn IndexService>,
    destination: Arc<dyn IndexService>,
) -> Result<TransferReport, PipelineError> {
    if tasks.is_empty() {
        return Err(PipelineError::Config("no indices requested".into()));
    }
    let started_at = Utc::now();
    let start = Instant::now();
    tracing::info!(
        pipeline,
        indices = tasks.len(),
        batch_size = settings.batch_size,
        queue_capacity = settings.queue_capacity,
        completion = %settings.completion,
        "Starting transfer"
    );

    let provisioned = provision_indices(source.as_ref(), destination.as_ref(), tasks).await;

    if settings.schema_only() || provisioned.is_empty() {
        if settings.schema_only() {
            tracing::info!(pipeline, "Batch size is 0; index definitions copied, no documents moved");
        } else {
            tracing::warn!(pipeline, "No index has documents to transfer");
        }
        let stats = StatsRegistry::default();
        return Ok(TransferReport {
            pipeline: pipeline.to_string(),
            started_at,
            duration_secs: start.elapsed().as_secs_f64(),
            schema_only: settings.schema_only(),
            pool_size: 0,
            dispatch: DispatchSummary::default(),
            pool_drained: true,
            batches_discarded: 0,
            indices: index_reports(&provisioned, &stats, &HashMap::new()),
        });
    }

    let workers = pool_size(provisioned.len());
    let ready: Vec<IndexTask> = provisioned.iter().map(|p| p.task.clone()).collect();
    let stats = Arc::new(StatsRegistry::from_tasks(&ready));
    let queue = Arc::new(TransferQueue::new(settings.queue_capacity));
    let writer = Arc::new(BatchWriter::new(
        destination,
        stats.clone(),
        WritePolicy {
            max_retries: settings.max_write_retries,
            backoff: settings.write_backoff,
        },
    ));
    let pool = WriterPool::start(workers, settings.submission_queue_capacity, writer);
    tracing::info!(
        pipeline,
        indices = ready.len(),
        writers = workers,
        "Transfer pipeline started"
    );

    let tracker = ReaderTracker::new();
    let read_policy = ReadPolicy {
        page_size: settings.batch_size,
        max_failures: settings.max_read_failures,
        backoff: settings.read_backoff,
    };
    let mut readers: JoinSet<ReaderOutcome> = JoinSet::new();
    for task in ready {
        let guard = tracker.register();
        readers.spawn(run_reader(
            task,
            source.clone(),
            queue.clone(),
            stats.clone(),
            read_policy,
            guard,
        ));
    }

    let dispatch = run_dispatcher(
        &queue,
        &pool,
        &tracker,
        settings.completion,
        settings.idle_timeout,
    )
    .await;

    let batches_discarded = queue.close();
    if batches_discarded > 0 {
        tracing::warn!(
            pipeline,
            batches = batches_discarded,
            "Batches left in the transfer queue were discarded"
        );
    }
    let read_complete = collect_reader_outcomes(readers).await;
    let pool_drained = pool.shutdown(settings.drain_timeout).await;

    let indices = index_reports(&provisioned, &stats, &read_complete);
    let report = TransferReport {
        pipeline: pipeline.to_string(),
        started_at,
        duration_secs: start.elapsed().as_secs_f64(),
        schema_only: false,
        pool_size: workers,
        dispatch,
        pool_drained,
        batches_discarded,
        indices,
    };

    let totals = report.totals();
    tracing::info!(
        pipeline,
        records_read = totals.read,
        records_written = totals.written,
        records_dropped = totals.dropped,
        duration_secs = report.duration_secs,
        "Transfer completed"
    );
    Ok(report)
}

async fn collect_reader_outcomes(mut readers: JoinSet<ReaderOutcome>) -> HashMap<String, bool> {
    let mut completed = HashMap::new();
    while let Some(joined) = readers.join_next().await {
        match joined {
            Ok(outcome) => {
                completed.insert(outcome.key.clone(), outcome.completed());
            }
            Err(e) => tracing::error!(error = %e, "Reader task panicked"),
        }
    }
    completed
}

fn index_reports(
    provisioned: &[ProvisionedTask],
    stats: &StatsRegistry,
    read_complete: &HashMap<String, bool>,
) -> Vec<IndexReport> {
    provisioned
        .iter()
        .map(|p| {
            let key = p.task.key();
            let report = IndexReport {
                source_index: p.task.source_index.clone(),
                target_index: p.task.target_index.clone(),
                source_count: p.source_count,
                counters: stats.get(&key).unwrap_or_default(),
                read_complete: read_complete.get(&key).copied().unwrap_or(false),
                key,
            };
            tracing::info!(
                index = %report.key,
                source_count = report.source_count,
                read = report.counters.read,
                written = report.counters.written,
                dropped = report.counters.dropped,
                "Index transfer summary"
            );
            if !read_complete.is_empty() && report.has_read_mismatch() {
                tracing::warn!(
                    index = %report.key,
                    source_count = report.source_count,
                    read = report.counters.read,
                    unread = report.unread(),
                    "Documents read differ from the source count"
                );
            }
            report
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use essync_client::MemoryIndexService;

    #[tokio::test]
    async fn test_empty_task_list_is_a_config_error() {
        let source: Arc<dyn IndexService> = Arc::new(MemoryIndexService::new("source"));
        let dest: Arc<dyn IndexService> = Arc::new(MemoryIndexService::new("dest"));
        let err = run_transfer("p", &[], &TransferSettings::default(), source, dest)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_building_clients() {
        let yaml = r#"
version: "1.0"
pipeline: p
source: { host: "", port: 9200 }
destination: { host: dst, port: 9200 }
indices: [a, b, c]
pairing: true
"#;
        let config = crate::config::parser::parse_pipeline_str(yaml).unwrap();
        let err = run_pipeline(&config).await.unwrap_err();
        assert!(err.is_config());
        let msg = err.to_string();
        assert!(msg.contains("even number"), "got: {msg}");
        assert!(msg.contains("source: host"), "got: {msg}");
    }
}
