//! CLI binary for validating content and running Lattice flows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use lattice_flow::{FlowEngine, FlowOptions};
use lattice_store::{
    BreakerConfig, CircuitBreaker, HttpRuleStore, InMemoryRuleStore, RuleCache, RuleStore,
};
use lattice_types::{CheckpointPhase, FlowState, Stage};
use lattice_validation::{TriageEngine, ValidationEngine};

#[derive(Parser)]
#[command(name = "lattice", version, about = "Provenance-gated content validation and flow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Rule store base URL
    #[arg(long, global = true, default_value = "http://localhost:8000")]
    store_url: String,

    /// Use the seeded in-memory rule store instead of a live one
    #[arg(long, global = true)]
    offline: bool,

    /// Rule store request timeout in milliseconds
    #[arg(long, global = true, default_value = "5000")]
    store_timeout_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Comprehensive,
    Selective,
}

#[derive(Clone, Copy, ValueEnum)]
enum PhaseArg {
    PreWriting,
    MidWriting,
    PostWriting,
}

impl From<PhaseArg> for CheckpointPhase {
    fn from(phase: PhaseArg) -> Self {
        match phase {
            PhaseArg::PreWriting => CheckpointPhase::PreWriting,
            PhaseArg::MidWriting => CheckpointPhase::MidWriting,
            PhaseArg::PostWriting => CheckpointPhase::PostWriting,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Research,
    Audience,
    Writer,
    Style,
    Quality,
}

impl From<StageArg> for Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Research => Stage::Research,
            StageArg::Audience => Stage::Audience,
            StageArg::Writer => Stage::Writer,
            StageArg::Style => Stage::Style,
            StageArg::Quality => Stage::Quality,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate content once, without a flow
    Validate {
        /// Content text, or - to read a file via --file
        content: Option<String>,

        /// Read content from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Target platform tag
        #[arg(short, long, default_value = "linkedin")]
        platform: String,

        /// Validation mode
        #[arg(short, long, value_enum, default_value = "comprehensive")]
        mode: ModeArg,

        /// Checkpoint phase (selective mode only)
        #[arg(short, long, value_enum)]
        checkpoint: Option<PhaseArg>,
    },

    /// Run content through the full five-stage flow
    Run {
        /// Content text, or - to read a file via --file
        content: Option<String>,

        /// Read content from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Target platform tag
        #[arg(short, long, default_value = "linkedin")]
        platform: String,

        /// Pause for approval after these stages
        #[arg(long, value_enum)]
        checkpoint_after: Vec<StageArg>,

        /// Automatically approve checkpoints instead of stopping
        #[arg(long)]
        auto_approve: bool,

        /// Print flow events as they happen
        #[arg(short, long)]
        watch: bool,
    },

    /// Score content against audience-profile and novelty collections
    Triage {
        /// Content text, or - to read a file via --file
        content: Option<String>,

        /// Read content from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Report rule store, cache, and circuit breaker health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Arc<dyn RuleStore> = if cli.offline {
        Arc::new(InMemoryRuleStore::seeded())
    } else {
        Arc::new(HttpRuleStore::new(
            &cli.store_url,
            Duration::from_millis(cli.store_timeout_ms),
        )?)
    };

    match cli.command {
        Commands::Validate {
            content,
            file,
            platform,
            mode,
            checkpoint,
        } => {
            let content = read_content(content, file)?;
            cmd_validate(store, &content, &platform, mode, checkpoint).await?;
        }
        Commands::Run {
            content,
            file,
            platform,
            checkpoint_after,
            auto_approve,
            watch,
        } => {
            let content = read_content(content, file)?;
            cmd_run(store, &content, &platform, checkpoint_after, auto_approve, watch).await?;
        }
        Commands::Triage { content, file } => {
            let content = read_content(content, file)?;
            cmd_triage(store, &content).await?;
        }
        Commands::Health => {
            cmd_health(store).await;
        }
    }
    Ok(())
}

fn read_content(content: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    match (content, file) {
        (Some(text), None) if text != "-" => Ok(text),
        (_, Some(path)) => Ok(std::fs::read_to_string(path)?),
        _ => anyhow::bail!("provide content text or --file"),
    }
}

async fn cmd_validate(
    store: Arc<dyn RuleStore>,
    content: &str,
    platform: &str,
    mode: ModeArg,
    checkpoint: Option<PhaseArg>,
) -> anyhow::Result<()> {
    let engine = ValidationEngine::new(
        store,
        Arc::new(RuleCache::new(Duration::from_secs(300))),
        Arc::new(CircuitBreaker::new("rule_store", BreakerConfig::default())),
    );

    let result = match mode {
        ModeArg::Comprehensive => {
            engine
                .validate_comprehensive(content, platform, HashMap::new())
                .await?
        }
        ModeArg::Selective => {
            let phase = checkpoint
                .ok_or_else(|| anyhow::anyhow!("selective validation requires --checkpoint"))?;
            engine
                .validate_selective(content, platform, phase.into(), HashMap::new())
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_run(
    store: Arc<dyn RuleStore>,
    content: &str,
    platform: &str,
    checkpoint_after: Vec<StageArg>,
    auto_approve: bool,
    watch: bool,
) -> anyhow::Result<()> {
    let engine = FlowEngine::new(store);

    let mut options = FlowOptions::default();
    for stage in checkpoint_after {
        options = options.with_checkpoint_after(stage.into());
    }

    let events = engine.subscribe();
    if watch {
        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(events);
            while let Some(Ok(event)) = stream.next().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!(%err, "Failed to serialize flow event"),
                }
            }
        });
    }

    let flow_id = engine.submit(content, platform, options).await;
    tracing::info!(flow = %flow_id, "Flow submitted");

    loop {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let status = engine.status(&flow_id).await?;
        match status.state {
            FlowState::Completed | FlowState::Failed => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                break;
            }
            FlowState::Paused => {
                let pending = engine.pending_checkpoints().await;
                let Some(checkpoint) = pending.into_iter().find(|c| c.flow_id == flow_id) else {
                    continue;
                };
                if auto_approve {
                    tracing::info!(checkpoint = %checkpoint.checkpoint_id, "Auto-approving checkpoint");
                    engine
                        .resolve_checkpoint(&checkpoint.checkpoint_id, true, None)
                        .await?;
                } else {
                    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                    tracing::info!(
                        checkpoint = %checkpoint.checkpoint_id,
                        "Flow paused awaiting approval; re-run with --auto-approve to continue"
                    );
                    break;
                }
            }
            FlowState::Pending | FlowState::Running => {}
        }
    }
    Ok(())
}

async fn cmd_triage(store: Arc<dyn RuleStore>, content: &str) -> anyhow::Result<()> {
    let engine = TriageEngine::new(
        store,
        Arc::new(CircuitBreaker::new("triage_store", BreakerConfig::default())),
    );
    let (scores, decision) = engine.triage(content).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "scores": scores,
            "decision": decision,
        }))?
    );
    Ok(())
}

async fn cmd_health(store: Arc<dyn RuleStore>) {
    let engine = FlowEngine::new(store);
    let report = engine.health().await;
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to render health report: {err}"),
    }
}
