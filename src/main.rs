use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use drover::agent::{Agent, Collaborators, EVENT_QUEUE_DEPTH};
use drover::checkpoint::FileCheckpointStore;
use drover::config::{AgentConfig, RecoveryMode};
use drover::gc::{DeferredRemover, DfProbe};
use drover::isolator::CommandIsolator;
use drover::resources::Resources;
use drover::shutdown::install_shutdown_handler;
use drover::updates::DirectUpdateManager;

#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version)]
#[command(about = "A per-node cluster agent that runs tasks on behalf of frameworks")]
struct Args {
    /// Hostname advertised to the master
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// Root directory for executor run directories and the checkpoint
    #[arg(long, default_value = "/tmp/drover")]
    work_dir: PathBuf,

    /// Directory containing the drover-executor launcher binary
    #[arg(long, default_value = "/usr/libexec/drover")]
    launcher_dir: PathBuf,

    /// Total cpus offered to the cluster
    #[arg(long, default_value = "1.0")]
    cpus: f64,

    /// Total memory offered to the cluster, in megabytes
    #[arg(long, default_value = "1024")]
    mem_mb: u64,

    /// Total disk offered to the cluster, in megabytes
    #[arg(long, default_value = "10240")]
    disk_mb: u64,

    /// Node attributes advertised to the master (format: key=value)
    #[arg(long = "attribute")]
    attributes: Vec<String>,

    /// How recovery treats executors found in the checkpoint
    #[arg(long, default_value = "reconnect")]
    recover: RecoverArg,

    /// Fail startup on any recovery inconsistency instead of skipping the
    /// damaged record
    #[arg(long)]
    strict: bool,

    /// Grace period before a shut-down executor is force killed, in seconds
    #[arg(long, default_value = "5")]
    executor_shutdown_grace_secs: u64,

    /// How long recovered executors get to re-register, in seconds
    #[arg(long, default_value = "10")]
    executor_reregister_timeout_secs: u64,

    /// Maximum retention of old run directories at zero disk usage, in days
    #[arg(long, default_value = "7")]
    gc_delay_days: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RecoverArg {
    Reconnect,
    Cleanup,
}

impl From<RecoverArg> for RecoveryMode {
    fn from(arg: RecoverArg) -> Self {
        match arg {
            RecoverArg::Reconnect => RecoveryMode::Reconnect,
            RecoverArg::Cleanup => RecoveryMode::Cleanup,
        }
    }
}

fn parse_attributes(pairs: &[String]) -> drover::resources::Attributes {
    let mut attributes = drover::resources::Attributes::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                attributes.insert(key.to_string(), value.to_string());
            }
            None => tracing::warn!(attribute = %pair, "Invalid attribute, expected key=value"),
        }
    }
    attributes
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::new(args.hostname, args.work_dir)
        .with_resources(Resources::new(args.cpus, args.mem_mb, args.disk_mb));
    config.launcher_dir = args.launcher_dir;
    config.attributes = parse_attributes(&args.attributes);
    config.executor_shutdown_grace = Duration::from_secs(args.executor_shutdown_grace_secs);
    config.executor_reregister_timeout =
        Duration::from_secs(args.executor_reregister_timeout_secs);
    config.gc_delay = Duration::from_secs(args.gc_delay_days * 24 * 3600);

    tracing::info!(
        hostname = %config.hostname,
        work_dir = %config.work_dir.display(),
        resources = %config.resources,
        "Starting drover agent"
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let collaborators = Collaborators {
        isolator: Arc::new(CommandIsolator::new(events_tx.clone())),
        updates: Arc::new(DirectUpdateManager::new()),
        checkpoint: Arc::new(FileCheckpointStore::new(config.checkpoint_path())),
        disk_probe: Arc::new(DfProbe::new(config.work_dir.clone())),
        gc: Arc::new(DeferredRemover::new()),
    };

    let mut agent = Agent::new(config, events_tx.clone(), collaborators);
    agent.recover(args.recover.into(), args.strict).await?;

    let _shutdown = install_shutdown_handler(events_tx);
    agent.run(events_rx).await;

    tracing::info!("Agent stopped");
    Ok(())
}
