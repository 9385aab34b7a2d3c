use clap::{Parser, Subcommand};
use grepwise::alarm::{spawn_alarm_scheduler, AlarmEngine};
use grepwise::buffer::{spawn_flusher, LogBuffer};
use grepwise::cluster::{spawn_heartbeat_loop, Coordinator};
use grepwise::config::AppConfig;
use grepwise::index::IndexEngine;
use grepwise::ingestion::{build_router, SourceRegistry};
use grepwise::notifications::NoopTransport;
use grepwise::query;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "grepwise")]
#[command(about = "Log ingestion, indexing, search, and alerting core")]
#[command(version)]
struct Cli {
    /// Base path for the config file (tries <base>.{yml,yaml,json,toml}).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start ingestion, indexing, alarm evaluation, and the HTTP ingest surface.
    Run {
        /// Port for the HTTP ingestion surface.
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run a single query pipeline against the existing index and print the result.
    Query {
        text: String,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },
    /// Print the effective configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
}

fn load_config(cli_config: &Option<PathBuf>) -> anyhow::Result<AppConfig> {
    match cli_config {
        Some(path) => Ok(AppConfig::from_file(path)?),
        None => {
            let base = dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("grepwise")
                .join("config");
            Ok(AppConfig::load_or_default(&base)?)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => {
            let config = load_config(&cli.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Query { text, start, end } => {
            let config = load_config(&cli.config)?;
            let index = IndexEngine::new(config)?;
            let result = query::run_pipeline(&index, &text, start, end).await?;
            println!("{:#?}", result);
        }
        Commands::Run { port } => {
            let config = load_config(&cli.config)?;
            info!(index_path = %config.index_path.display(), "starting grepwise");

            let index = Arc::new(IndexEngine::new(config.clone())?);
            let buffer = Arc::new(LogBuffer::new(config.max_buffer_size, index.clone()));
            let _flusher = spawn_flusher(buffer.clone(), config.flush_interval_ms);

            let coordinator = Coordinator::new(
                config.cluster.node_id.clone(),
                format!("http://0.0.0.0:{port}"),
                config.cluster.heartbeat_timeout_ms,
                config.cluster.horizontal_scaling.enabled,
            );
            let _heartbeat = spawn_heartbeat_loop(coordinator.clone(), config.cluster.heartbeat_interval_ms);

            let registry = Arc::new(SourceRegistry::new(buffer.clone(), coordinator.clone()));
            registry.start_all_enabled().await;

            let alarm_engine = Arc::new(AlarmEngine::new(index.clone(), Arc::new(NoopTransport)));
            let now_provider: Arc<dyn Fn() -> i64 + Send + Sync> = Arc::new(|| chrono::Utc::now().timestamp_millis());
            let _alarm_scheduler = spawn_alarm_scheduler(alarm_engine.clone(), config.alarm.evaluation_interval_ms, now_provider);

            let app = build_router(registry.http_state());
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            info!(port, "HTTP ingestion surface listening");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
