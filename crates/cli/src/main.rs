//! `flowforge` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`   : run the engine and the API server.
//! - `migrate` : run pending database migrations.
//! - `validate`: validate a workflow JSON file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use db::{MemoryStore, PgStore, Store};
use engine::{validate_workflow, Engine, EngineConfig, WorkflowDefinition};
use nodes::NodeRegistry;

#[derive(Parser)]
#[command(name = "flowforge", about = "Workflow automation engine", version)]
struct Cli {
    /// `pretty` or `json` log lines.
    #[arg(long, env = "FLOWFORGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine and the REST/WebSocket API.
    Serve(ServeArgs),
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "FLOWFORGE_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Postgres URL; the in-memory store is used when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "FLOWFORGE_DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    #[arg(long, env = "FLOWFORGE_WORKERS", default_value_t = 8)]
    workers: usize,

    #[arg(long, env = "FLOWFORGE_MAX_PARALLEL_NODES", default_value_t = 8)]
    max_parallel_nodes: usize,

    #[arg(long, env = "FLOWFORGE_SCHEDULER_TICK_SECS", default_value_t = 5)]
    scheduler_tick_secs: u64,

    /// Consecutive failures before a schedule disables itself.
    #[arg(long, env = "FLOWFORGE_SCHEDULE_FAILURE_THRESHOLD", default_value_t = 5)]
    schedule_failure_threshold: u32,

    #[arg(long, env = "FLOWFORGE_WEBHOOK_WAIT_TIMEOUT_SECS", default_value_t = 30)]
    webhook_wait_timeout_secs: u64,
}

impl ServeArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers.max(1),
            max_parallel_nodes: self.max_parallel_nodes.max(1),
            scheduler_tick: Duration::from_secs(self.scheduler_tick_secs.max(1)),
            schedule_failure_threshold: self.schedule_failure_threshold,
            webhook_wait_timeout: Duration::from_secs(self.webhook_wait_timeout_secs),
            ..EngineConfig::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = matches!(format, LogFormat::Json);
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied successfully");
            Ok(())
        }
        Command::Validate { path } => validate(&path),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = match &args.database_url {
        Some(url) => {
            let pool = db::pool::create_pool(url, args.max_connections)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Arc::new(Engine::builder(store).config(args.engine_config()).build());
    let tasks = engine.start().await.context("failed to start engine")?;

    let served = api::serve(&args.bind, engine).await;
    for task in tasks {
        task.abort();
    }
    served.with_context(|| format!("api server on {} failed", args.bind))?;
    info!("shut down cleanly");
    Ok(())
}

/// Accepts either a bare definition or a workflow body with the graph at
/// the top level or under `definition`.
fn validate(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content).context("invalid JSON")?;
    let graph = value.get("definition").unwrap_or(&value);
    let definition = WorkflowDefinition::from_value(graph)?;

    match validate_workflow(&definition, &NodeRegistry::with_builtins()) {
        Ok(order) => {
            println!("✅ Workflow is valid. Execution order: {order:?}");
            Ok(())
        }
        Err(err) => bail!("❌ Validation failed: {err}"),
    }
}
