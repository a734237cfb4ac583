use std::path::Path;

use anyhow::{Context, Result};

use essync_engine::config::parser;
use essync_engine::config::validator;

/// Execute the `check` command: validate pipeline config and inspect both
/// clusters without modifying either.
pub async fn execute(pipeline_path: &Path, json: bool) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    let result = essync_engine::check_pipeline(&config).await?;
    println!("Source:             {}", result.source_url);
    println!("Destination:        {}", result.destination_url);

    for index in &result.indices {
        let source = match (index.source_exists, index.source_count) {
            (true, Some(count)) => format!("{count} docs"),
            (true, None) => "present".to_string(),
            (false, _) => "MISSING".to_string(),
        };
        let destination = match (index.destination_exists, index.destination_count) {
            (true, Some(count)) => format!("{count} docs"),
            (true, None) => "present".to_string(),
            (false, _) => "will be created".to_string(),
        };
        println!(
            "  {:<30} source: {:<14} destination: {}",
            index.key, source, destination
        );
        if let Some(error) = &index.error {
            println!("    error: {error}");
        }
    }

    if json {
        println!("{}", serde_json::to_string(&result)?);
    }

    if result.all_ready() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
