mod config;
mod error;
mod kernel;
mod limits;
mod llm;
mod logging;
mod mcp;
mod ollama;
mod openai;
mod paths;
mod pipeline;
mod shard;
mod spawn_queue;
mod tool_relevance;
mod workspace;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use kernel::Kernel;
use llm::{LlmClient, OllamaLlmClient, OpenAiLlmClient, TieredModelSelector};
use limits::DefaultLimitsEnforcer;
use logging::LoggingSettings;
use pipeline::{execution, ActionPipeline, PipelineConfig};
use shard::ShardManager;
use spawn_queue::{Priority, QueueConfig as RuntimeQueueConfig, SpawnQueue};

#[derive(Parser)]
#[command(name = "shardcore", version, about = "Shard orchestration core: fact-driven agent lifecycle, priority spawn queue, and OODA action pipeline")]
struct Cli {
    /// Log level override (info, debug, trace, ...).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print queue backpressure and active-shard status.
    Status,
    /// Spawn a shard of the given type with a task description.
    Spawn {
        #[arg(long)]
        shard_type: String,
        #[arg(long)]
        task: String,
        #[arg(long, value_enum, default_value = "normal")]
        priority: CliPriority,
    },
    /// Print spawn-queue counters.
    QueueStats,
    /// Drive one Perception->Executive->Constitution->Router->Execution
    /// pass over a natural-language instruction.
    Act {
        input: String,
    },
    /// Tool-compilation subcommands.
    Tools {
        #[command(subcommand)]
        action: ToolsCommand,
    },
}

#[derive(Subcommand)]
enum ToolsCommand {
    /// Compile a token-budget-fitted tool set for a shard type/task.
    Compile {
        #[arg(long)]
        shard_type: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value_t = 2000)]
        token_budget: usize,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl From<CliPriority> for Priority {
    fn from(p: CliPriority) -> Self {
        match p {
            CliPriority::Low => Priority::Low,
            CliPriority::Normal => Priority::Normal,
            CliPriority::High => Priority::High,
            CliPriority::Critical => Priority::Critical,
        }
    }
}

fn build_llm_client(config: &Config) -> Arc<dyn LlmClient> {
    let models = TieredModelSelector {
        fast: "qwen3-coder:latest".to_string(),
        balanced: "qwen3-coder:latest".to_string(),
        high_reasoning: "qwen3-coder:latest".to_string(),
    };
    let default_model = config.models.first();
    match default_model.map(|m| m.provider.as_str()) {
        Some("openai") => {
            let m = default_model.unwrap();
            Arc::new(OpenAiLlmClient::new(m.url.clone(), m.api_key.clone(), models))
        }
        _ => {
            let (url, api_key) = default_model
                .map(|m| (m.url.clone(), m.api_key.clone()))
                .unwrap_or_else(|| ("http://127.0.0.1:11434".to_string(), None));
            Arc::new(OllamaLlmClient::new(url, api_key, models))
        }
    }
}

fn build_runtime_queue_config(config: &config::QueueConfig) -> RuntimeQueueConfig {
    RuntimeQueueConfig {
        max_queue_size: config.max_queue_size,
        max_queue_per_priority: config.max_queue_per_priority,
        default_timeout: Duration::from_secs(config.default_timeout_secs),
        high_water_mark: config.high_water_mark,
        worker_count: config.worker_count,
        drain_timeout: Duration::from_secs(config.drain_timeout_secs),
    }
}

/// Reads `~/.shardcore/prompts/<shard_type>.md` for persistent/user shards,
/// matching the on-disk prompt layout the factory resolution step expects.
fn load_prompt(shard_type: &str) -> Option<String> {
    let path = paths::prompts_dir().join(format!("{shard_type}.md"));
    std::fs::read_to_string(path).ok()
}

async fn bootstrap(config: &Config) -> Result<(Arc<ShardManager>, Arc<SpawnQueue>)> {
    let kernel = Arc::new(Kernel::new());
    let llm = build_llm_client(config);
    let limits: Arc<dyn limits::LimitsEnforcer> = Arc::new(DefaultLimitsEnforcer::default());

    let manager = Arc::new(
        ShardManager::new(kernel, llm, Some(limits.clone())).with_callbacks(
            Some(Arc::new(load_prompt)),
            None,
            None,
        ),
    );
    for (name, profile) in &config.shard_profiles.profiles {
        manager.define_profile(name, profile.clone());
    }

    let queue = Arc::new(SpawnQueue::new(
        build_runtime_queue_config(&config.queue),
        Arc::downgrade(&manager),
        limits,
    ));
    queue.start();
    manager.attach_spawn_queue(queue.clone()).await;
    manager.start_system_shards().await;

    Ok((manager, queue))
}

/// Builds an `ActionPipeline` with the default read/write/exec handlers
/// bound against `root`, matching the route table in §4.4. The learning
/// candidate threshold comes from `shardcore.toml`'s `[learning]` table;
/// `auto_promote` is intentionally not read here or anywhere else in the
/// pipeline — a learning candidate is never auto-promoted into the
/// taxonomy, per Invariant #6.
fn build_action_pipeline(
    kernel: Arc<Kernel>,
    root: std::path::PathBuf,
    config: &Config,
) -> Arc<ActionPipeline> {
    let pipeline_config = PipelineConfig {
        learning_candidate_threshold: config.learning.threshold,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(ActionPipeline::new(kernel, pipeline_config));
    pipeline.router.register(
        "read_file",
        Arc::new(execution::ReadFileHandler { root: root.clone() }),
    );
    pipeline.router.register(
        "write_file",
        Arc::new(execution::WriteFileHandler { root: root.clone() }),
    );
    pipeline
        .router
        .register("exec_cmd", Arc::new(execution::ExecCmdHandler));
    pipeline
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_tracing_with_settings(LoggingSettings {
        level: cli.log_level.as_deref(),
        directory: None,
        retention_days: None,
    })?;

    let config = Config::load()?;
    let (manager, queue) = bootstrap(&config).await?;

    match cli.command {
        Commands::Status => {
            let status = queue.backpressure_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Spawn { shard_type, task, priority } => {
            let result = manager
                .spawn_with_priority(&shard_type, &task, None, priority.into())
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::QueueStats => {
            println!("{}", serde_json::to_string_pretty(&queue.stats())?);
        }
        Commands::Act { input } => {
            let root = workspace::resolve_workspace_root(None)?;
            let pipeline = build_action_pipeline(manager.kernel().clone(), root, &config);
            let action_id = pipeline.process_input(&input).await;
            match action_id {
                Some(id) => {
                    println!("action {id}");
                    for fact in pipeline.kernel.query("execution_result") {
                        println!("{fact:?}");
                    }
                    for fact in pipeline.kernel.query("routing_result") {
                        println!("{fact:?}");
                    }
                }
                None => println!("no action derived (ambiguous or unmapped intent)"),
            }
        }
        Commands::Tools { action } => match action {
            ToolsCommand::Compile { shard_type, task, token_budget } => {
                let kernel = manager.kernel();
                let store_path = paths::data_dir().join("tools.redb");
                let store = mcp::store::RedbToolStore::open(&store_path)?;
                let embedder = mcp::HashingEmbedder;
                let ctx = mcp::compiler::ToolCompilationContext {
                    shard_type: &shard_type,
                    task_description: &task,
                    token_budget,
                };
                let compiled = mcp::compiler::compile(
                    kernel,
                    &store,
                    &embedder,
                    &mcp::compiler::CompilerThresholds::default(),
                    &ctx,
                )?;
                println!("{}", mcp::render::render(&compiled));
            }
        },
    }

    manager.stop_all().await;
    Ok(())
}
