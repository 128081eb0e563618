//! Demo host: starts the server in-process and runs a scripted client session.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use reel_server::{RpcServer, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "reel-demo")]
#[command(about = "Run the reel service host with a scripted client", long_about = None)]
struct Args {
    /// JSON file with server configuration; missing fields use defaults
    #[arg(long, env = "REEL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of calls executing at once
    #[arg(long, env = "REEL_MAX_CONCURRENT_CALLS")]
    max_concurrent_calls: Option<u32>,

    /// Override how long `slow` blocks, in milliseconds
    #[arg(long, env = "REEL_SLOW_DURATION_MS")]
    slow_duration_ms: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, env = "REEL_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Keep serving after the script until Ctrl-C
    #[arg(long)]
    hold: bool,
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(limit) = args.max_concurrent_calls {
        config.max_concurrent_calls = limit;
    }
    if let Some(ms) = args.slow_duration_ms {
        config.slow_duration_ms = ms;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);
    let config = load_config(&args)?;

    let server = RpcServer::start(config);
    let mut client = server.connect();

    let top10 = client.top10().await?;
    println!("{}", serde_json::to_string_pretty(&top10)?);

    client.set_state(Uuid::new_v4()).await?;
    let data = client.get_data().await?;
    info!(%data, "state after a fresh call");

    if let Err(e) = client.throw_fault().await {
        info!(error = %e, "fault received as expected");
    }

    let started = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(client.slow(), client.slow(), client.slow());
    a?;
    b?;
    c?;
    info!(elapsed_ms = started.elapsed().as_millis(), "three slow calls finished");

    client.search().await?;
    let hits = client.wait_for_all_results(Duration::from_secs(30)).await?;
    info!(results = hits.len(), "search completed");

    let scope = server.transaction_scope();
    let person = Uuid::new_v4();
    client.begin_transaction(&scope, person).await?;
    client.complete_transaction(&scope).await?;
    let rows = scope.commit()?;
    info!(rows, "transaction committed");

    if args.hold {
        info!("serving until Ctrl-C");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    }

    client.close();
    if !server.shutdown(Duration::from_secs(10)).await {
        warn!("shutdown finished with calls still in flight");
    }
    Ok(())
}
