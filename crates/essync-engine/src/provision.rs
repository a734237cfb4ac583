//! Index provisioning: make sure every destination index exists before any
//! document moves, and drop tasks that have nothing to transfer.

use essync_client::{IndexService, ServiceError};
use essync_types::IndexTask;
use serde::Serialize;

/// A task that survived provisioning, with its source document count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTask {
    pub task: IndexTask,
    pub source_count: u64,
}

/// Provision each task in order.
///
/// A missing source index, an empty source index or a remote error skips
/// only the affected task. A missing destination index is created from a
/// verbatim copy of the source mapping.
pub async fn provision_indices(
    source: &dyn IndexService,
    destination: &dyn IndexService,
    tasks: &[IndexTask],
) -> Vec<ProvisionedTask> {
    let mut provisioned = Vec::with_capacity(tasks.len());
    for task in tasks {
        match provision_one(source, destination, task).await {
            Ok(Some(ready)) => provisioned.push(ready),
            Ok(None) => {}
            Err(e) => tracing::error!(
                index = %task,
                error = %e,
                "Provisioning failed; skipping index"
            ),
        }
    }

    let total_documents: u64 = provisioned.iter().map(|p| p.source_count).sum();
    tracing::info!(
        requested = tasks.len(),
        ready = provisioned.len(),
        total_documents,
        "Index provisioning complete"
    );
    provisioned
}

async fn provision_one(
    source: &dyn IndexService,
    destination: &dyn IndexService,
    task: &IndexTask,
) -> Result<Option<ProvisionedTask>, ServiceError> {
    if !source.exists(&task.source_index).await? {
        tracing::warn!(index = %task, "Source index does not exist; skipping");
        return Ok(None);
    }

    if !destination.exists(&task.target_index).await? {
        let mapping = source.get_mapping(&task.source_index).await?;
        destination.create_index(&task.target_index, &mapping).await?;
        tracing::info!(
            index = %task,
            target = %task.target_index,
            "Created destination index from source mapping"
        );
    }

    let source_count = source.count(&task.source_index).await?;
    if source_count == 0 {
        tracing::info!(index = %task, "Source index is empty; nothing to transfer");
        return Ok(None);
    }

    tracing::info!(index = %task, source_count, "Index ready for transfer");
    Ok(Some(ProvisionedTask {
        task: task.clone(),
        source_count,
    }))
}

// ---------------------------------------------------------------------------
// Read-only inspection
// ---------------------------------------------------------------------------

/// State of one task's indices, gathered without modifying anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInspection {
    pub key: String,
    pub source_exists: bool,
    pub destination_exists: bool,
    pub source_count: Option<u64>,
    pub destination_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexInspection {
    /// The task can run: its source exists and nothing failed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.source_exists && self.error.is_none()
    }
}

/// Inspect every task without creating indices.
pub async fn inspect_indices(
    source: &dyn IndexService,
    destination: &dyn IndexService,
    tasks: &[IndexTask],
) -> Vec<IndexInspection> {
    let mut inspections = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut inspection = IndexInspection {
            key: task.key(),
            source_exists: false,
            destination_exists: false,
            source_count: None,
            destination_count: None,
            error: None,
        };
        if let Err(e) = inspect_one(source, destination, task, &mut inspection).await {
            inspection.error = Some(e.to_string());
        }
        inspections.push(inspection);
    }
    inspections
}

async fn inspect_one(
    source: &dyn IndexService,
    destination: &dyn IndexService,
    task: &IndexTask,
    inspection: &mut IndexInspection,
) -> Result<(), ServiceError> {
    inspection.source_exists = source.exists(&task.source_index).await?;
    if inspection.source_exists {
        inspection.source_count = Some(source.count(&task.source_index).await?);
    }
    inspection.destination_exists = destination.exists(&task.target_index).await?;
    if inspection.destination_exists {
        inspection.destination_count = Some(destination.count(&task.target_index).await?);
    }
    Ok(())
}
