//! CLI binary for the spool queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spool_core::domain::{SpoolName, SpoolRecord};
use spool_core::{
    EnqueueRequest, HandlerRegistry, Metadata, Priority, Spool, SpoolConfig, SpoolContext,
    SpoolHandler, SpoolTask, Supervisor, Verdict,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Durable filesystem task queue.
#[derive(Parser)]
#[command(name = "spool", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervised consumer until Ctrl+C.
    Consume {
        #[arg(long)]
        spool_dir: Option<PathBuf>,
        /// Sorted scans with priority buckets.
        #[arg(long)]
        ordered: bool,
        /// Seconds between passes when nothing wakes the consumer.
        #[arg(long)]
        frequency: Option<u64>,
    },

    /// Write one task file and print its path.
    Enqueue {
        #[arg(long)]
        spool_dir: Option<PathBuf>,
        #[arg(long)]
        metadata: String,
        #[arg(long)]
        payload_file: Option<PathBuf>,
        #[arg(long)]
        priority: Option<u32>,
        /// Earliest execution time, RFC 3339.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Decode a task file.
    Inspect {
        file: PathBuf,
        /// Print a JSON summary instead of text.
        #[arg(long)]
        json: bool,
    },
}

/// Logs the metadata of every task and completes it.
struct EchoHandler;

#[async_trait]
impl SpoolHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    async fn handle(&self, task: &SpoolTask) -> Verdict {
        info!(
            task = task.name(),
            metadata = %String::from_utf8_lossy(task.metadata().as_bytes()),
            payload_len = task.payload().len(),
            "echo"
        );
        Verdict::Done
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spool=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SpoolConfig::from_file(path)?,
        None => SpoolConfig::default(),
    };

    match cli.command {
        Command::Consume {
            spool_dir,
            ordered,
            frequency,
        } => {
            let mut config = override_dir(config, spool_dir);
            if ordered {
                config = config.with_ordered(true);
            }
            if let Some(secs) = frequency {
                config = config.with_frequency_secs(secs);
            }
            consume(config).await
        }
        Command::Enqueue {
            spool_dir,
            metadata,
            payload_file,
            priority,
            at,
        } => enqueue(override_dir(config, spool_dir), metadata, payload_file, priority, at),
        Command::Inspect { file, json } => inspect(&file, json),
    }
}

fn override_dir(config: SpoolConfig, dir: Option<PathBuf>) -> SpoolConfig {
    match dir {
        Some(dir) => config.with_spool_dir(dir),
        None => config,
    }
}

async fn consume(config: SpoolConfig) -> anyhow::Result<()> {
    let ctx = SpoolContext::new(config)?;
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoHandler))?;

    let supervisor = Supervisor::new(ctx.clone(), Arc::new(registry))
        .with_isolated_stdin(true)
        .start();
    info!(spool_dir = %ctx.spool_dir().display(), "spooler running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("received Ctrl+C, shutting down...");
    supervisor.shutdown().await;
    Ok(())
}

fn enqueue(
    config: SpoolConfig,
    metadata: String,
    payload_file: Option<PathBuf>,
    priority: Option<u32>,
    at: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let ctx = SpoolContext::new(config)?;
    let spool = Spool::new(ctx);

    let mut request = EnqueueRequest::new(Metadata::new(metadata)?).sequence(spool.next_sequence());
    if let Some(path) = payload_file {
        let payload = std::fs::read(&path)
            .with_context(|| format!("reading payload {}", path.display()))?;
        request = request.payload(payload);
    }
    if let Some(priority) = priority {
        request = request.priority(Priority::new(priority));
    }
    if let Some(at) = at {
        request = request.scheduled_at(at);
    }

    let path = spool.enqueue(request)?;
    println!("{}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct Summary {
    file: PathBuf,
    host: Option<String>,
    pid: Option<u32>,
    metadata_len: usize,
    payload_len: usize,
    metadata: String,
}

fn inspect(file: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let record = match SpoolRecord::decode(&bytes) {
        Ok(record) => record,
        Err(reason) => bail!("{} is not a valid spool file: {reason}", file.display()),
    };
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(SpoolName::parse);

    let summary = Summary {
        file: file.to_path_buf(),
        host: name.as_ref().map(|n| n.host.clone()),
        pid: name.as_ref().map(|n| n.pid),
        metadata_len: record.metadata().len(),
        payload_len: record.payload().len(),
        metadata: String::from_utf8_lossy(record.metadata().as_bytes()).into_owned(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("file:         {}", summary.file.display());
    if let (Some(host), Some(pid)) = (&summary.host, summary.pid) {
        println!("producer:     {host} (pid {pid})");
    }
    println!("metadata len: {}", summary.metadata_len);
    println!("payload len:  {}", summary.payload_len);
    println!("metadata:     {}", summary.metadata);
    Ok(())
}
