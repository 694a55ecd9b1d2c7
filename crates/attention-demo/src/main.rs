//! Attention kernel demo CLI.
//!
//! Commands:
//! - run: create circles, send each a line, print what comes back
//! - publish: write the topology's stable records to a concept store

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use attention_kernel::{
    mailbox, AttentionKernelBuilder, BranchPayload, ConceptRegistry, ConceptStore,
    InMemoryConceptStore, KernelConfig, Received, RequesterMsg,
};

mod topology;

#[derive(Parser)]
#[command(name = "attention-demo")]
#[command(version)]
#[command(about = "Drive a sample topology through the attention kernel")]
struct Cli {
    /// Kernel configuration (JSON); defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of pods, overriding the configuration
    #[arg(long)]
    pods: Option<usize>,

    /// Greeting handed to every echo child
    #[arg(long, default_value = "hello from the circle")]
    greeting: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create circles and exchange one line with each
    Run {
        /// Number of circles
        #[arg(long, default_value = "4")]
        circles: usize,

        /// Line sent to every circle
        #[arg(long, default_value = "ping")]
        line: String,

        /// Seconds to wait for any single reply
        #[arg(long, default_value = "5")]
        wait_secs: u64,
    },

    /// Publish the topology to an in-memory concept store and list it
    Publish,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => KernelConfig::from_json_file(path)?,
        None => KernelConfig::default(),
    };
    if let Some(pods) = cli.pods {
        config.pool.size = pods;
    }

    let registry = Arc::new(topology::build(&cli.greeting).context("building topology")?);

    match cli.command {
        Commands::Run {
            circles,
            line,
            wait_secs,
        } => run(config, registry, circles, line, Duration::from_secs(wait_secs)).await,
        Commands::Publish => {
            let store = prepare_store(&registry)?;
            println!("\n=== Concept Store ===");
            for cid in registry.ids() {
                let versions = store.versions(cid)?.unwrap_or_default();
                println!(
                    "{:>10}  {:<24} versions {:?}",
                    cid,
                    registry.name_of(cid).unwrap_or("?"),
                    versions
                );
            }
            Ok(())
        }
    }
}

/// Publishing failures are fatal: the kernel never starts without a store.
fn prepare_store(registry: &ConceptRegistry) -> Result<InMemoryConceptStore> {
    let store = InMemoryConceptStore::new();
    let published = registry
        .publish(&store)
        .context("concept store unavailable")?;
    info!(published = published, "concept store ready");
    Ok(store)
}

async fn run(
    config: KernelConfig,
    registry: Arc<ConceptRegistry>,
    circles: usize,
    line: String,
    wait: Duration,
) -> Result<()> {
    prepare_store(&registry)?;

    let kernel = AttentionKernelBuilder::new(config, registry).spawn()?;
    let (console, mut inbox) = mailbox::<RequesterMsg>("console");

    for _ in 0..circles {
        kernel.create_circle(console.clone())?;
    }

    let mut created = 0;
    let mut echoed = 0;
    while created < circles || echoed < created {
        let msg = match tokio::time::timeout(wait, inbox.recv(None)).await {
            Ok(Received::Message(msg)) => msg,
            Ok(_) => bail!("console mailbox closed"),
            Err(_) => bail!(
                "no reply within {:?} ({} of {} circles, {} echoes)",
                wait,
                created,
                circles,
                echoed
            ),
        };

        match msg {
            RequesterMsg::CircleCreated { circle } => {
                created += 1;
                println!("circle created  {circle}");
                circle.send(BranchPayload::Text {
                    premise: topology::LINE,
                    text: line.clone(),
                })?;
            }
            RequesterMsg::CircleFailed { reason } => bail!("circle creation failed: {reason}"),
            RequesterMsg::BranchAddress { brid } => println!("branch reported {brid}"),
            RequesterMsg::Notice { from, text } => {
                echoed += 1;
                println!("echo from {from}: {text}");
            }
        }
    }

    let stats = kernel.pool_stats().await?;
    println!("\n=== Pool ===");
    println!("Pods:       {}", stats.size);
    println!("Forwarded:  {}", stats.forwarded);
    println!("Released:   {}", stats.released);
    println!("Retries:    {}", stats.retries);
    println!("Saturated:  {} time(s)", stats.overflow_warnings);
    for (load, pid) in &stats.free {
        println!("  pod_{pid}: {load} branches");
    }

    kernel.shutdown().await?;
    Ok(())
}
