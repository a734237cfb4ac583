//! `essync transfer`: the positional, order-significant invocation.

use anyhow::Result;
use clap::{ArgAction, Args};

use essync_client::ClusterEndpoint;
use essync_engine::config::types::{CompletionMode, IndexList, PipelineConfig, ResourceConfig};

#[derive(Debug, Args)]
pub struct TransferArgs {
    /// Source cluster host
    pub src_host: String,
    /// Source user (empty string for no authentication)
    pub src_user: String,
    /// Source password
    pub src_password: String,
    /// Source port (443 implies https)
    pub src_port: u16,
    /// Destination cluster host
    pub dst_host: String,
    /// Destination user (empty string for no authentication)
    pub dst_user: String,
    /// Destination password
    pub dst_password: String,
    /// Destination port (443 implies https)
    pub dst_port: u16,
    /// Capacity of the transfer queue, in batches
    pub queue_capacity: usize,
    /// Documents per page; 0 copies index definitions only
    pub batch_size: usize,
    /// Comma-separated index names
    pub indices: String,
    /// Seconds the dispatcher waits for a batch before stopping
    pub idle_timeout_secs: u64,
    /// Read indices as source,target pairs (true/false)
    #[arg(action = ArgAction::Set, value_parser = parse_flag)]
    pub pairing: bool,
    /// Completion rule: `idle_timeout` stops at the first idle poll,
    /// `readers_done` waits for every reader to finish
    #[arg(long, default_value = "idle_timeout", value_parser = parse_completion)]
    pub completion: CompletionMode,
    /// Also print the report as a single JSON line
    #[arg(long)]
    pub json: bool,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(format!("expected true or false, got '{other}'")),
    }
}

fn parse_completion(value: &str) -> Result<CompletionMode, String> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "idle_timeout" => Ok(CompletionMode::IdleTimeout),
        "readers_done" => Ok(CompletionMode::ReadersDone),
        other => Err(format!("expected idle_timeout or readers_done, got '{other}'")),
    }
}

impl TransferArgs {
    #[must_use]
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            version: "1.0".to_string(),
            pipeline: "transfer".to_string(),
            source: ClusterEndpoint::new(self.src_host.clone(), self.src_port)
                .with_credentials(self.src_user.clone(), self.src_password.clone()),
            destination: ClusterEndpoint::new(self.dst_host.clone(), self.dst_port)
                .with_credentials(self.dst_user.clone(), self.dst_password.clone()),
            indices: IndexList::Csv(self.indices.clone()),
            pairing: self.pairing,
            resources: ResourceConfig {
                queue_capacity: self.queue_capacity,
                batch_size: self.batch_size,
                idle_timeout_secs: self.idle_timeout_secs,
                completion: self.completion,
                ..ResourceConfig::default()
            },
        }
    }
}

/// Execute the `transfer` command.
pub async fn execute(args: &TransferArgs) -> Result<()> {
    let config = args.to_config();
    super::run::run_config(&config, args.json).await
}
