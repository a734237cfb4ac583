use std::path::Path;

use anyhow::{Context, Result};

use essync_engine::config::parser;
use essync_engine::config::validator;
use essync_engine::{PipelineConfig, TransferReport};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path, json: bool) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    run_config(&config, json).await
}

/// Validate and run an already-built configuration, then print the report.
pub async fn run_config(config: &PipelineConfig, json: bool) -> Result<()> {
    validator::validate_pipeline(config)?;

    tracing::info!(
        pipeline = config.pipeline,
        source = %config.source.base_url(),
        destination = %config.destination.base_url(),
        indices = config.indices.names().len(),
        pairing = config.pairing,
        "Pipeline validated"
    );

    let report = essync_engine::run_pipeline(config).await?;
    print_report(&report);

    if json {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn print_report(report: &TransferReport) {
    let totals = report.totals();
    if report.schema_only {
        println!(
            "Pipeline '{}' copied {} index definition(s); no documents transferred.",
            report.pipeline,
            report.indices.len()
        );
    } else if report.is_complete() {
        println!("Pipeline '{}' completed successfully.", report.pipeline);
    } else {
        println!(
            "Pipeline '{}' completed with partial transfers; see log for details.",
            report.pipeline
        );
    }

    println!("  Indices:           {}", report.indices.len());
    println!("  Documents read:    {}", totals.read);
    println!("  Documents written: {}", totals.written);
    if totals.dropped > 0 {
        println!("  Documents dropped: {}", totals.dropped);
    }
    println!("  Duration:          {:.2}s", report.duration_secs);
    if report.duration_secs > 0.0 && totals.written > 0 {
        println!(
            "  Throughput:        {:.0} docs/sec",
            totals.written as f64 / report.duration_secs
        );
    }
    if !report.schema_only {
        println!(
            "  Writers:           {} ({} batches, {} run by dispatcher)",
            report.pool_size, report.dispatch.batches_dispatched, report.dispatch.batches_caller_ran
        );
    }

    for index in &report.indices {
        let status = if report.schema_only {
            "schema"
        } else if index.read_complete && index.counters.dropped == 0 {
            "ok"
        } else {
            "partial"
        };
        println!(
            "  {:<30} {:>7}  source={} read={} written={} dropped={}",
            index.key,
            status,
            index.source_count,
            index.counters.read,
            index.counters.written,
            index.counters.dropped
        );
    }
}
