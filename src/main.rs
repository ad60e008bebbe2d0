#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use courier::config::Config;
use courier::dedup::DedupCache;
use courier::dispatch::Dispatcher;
use courier::gateway::{self, AppState};
use courier::outbound::WhatsAppSender;
use courier::pipeline::ResponseGenerator;
use courier::providers::gemini::GeminiProvider;
use courier::status::StatusTracker;
use courier::store::SqliteStore;
use courier::tools;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "courier", version, about = "WhatsApp enrollment assistant gateway")]
struct Cli {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook gateway.
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check configuration and credentials without serving.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::load_or_init(cli.config).await?;

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Doctor => doctor(&config),
    }
}

async fn serve(mut config: Config, port_override: Option<u16>) -> Result<()> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let store = Arc::new(SqliteStore::open(Path::new(&config.storage.db_path))?);
    let provider = Arc::new(GeminiProvider::new(
        &config.ai.api_base_url,
        &config.ai.api_key,
        &config.ai.model,
        config.ai.max_output_tokens,
    ));
    let generator = Arc::new(ResponseGenerator::new(
        provider,
        store.clone(),
        tools::enrollment_tools(store),
        config.ai.temperature,
        config.pipeline.max_tool_iterations,
        config.pipeline.history_limit,
        config.pipeline.reply_max_chars,
    ));
    let sender = Arc::new(WhatsAppSender::new(
        &config.whatsapp.api_base_url,
        &config.whatsapp.phone_number_id,
        &config.whatsapp.access_token,
    ));
    let dispatcher = Arc::new(Dispatcher::spawn(
        config.pipeline.workers,
        config.pipeline.queue_capacity,
        generator,
        sender,
    ));

    let state = AppState {
        dedup: Arc::new(DedupCache::new(config.dedup_window())),
        dispatcher,
        status: Arc::new(StatusTracker::new()),
        verify_token: Arc::from(config.whatsapp.verify_token.as_str()),
        app_secret: Arc::from(config.whatsapp.app_secret.as_str()),
    };

    if state.app_secret.is_empty() {
        tracing::warn!("no app secret configured; webhook signatures will not be verified");
    }

    tokio::select! {
        result = gateway::serve(state, &config.gateway.host, config.gateway.port) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

fn doctor(config: &Config) -> Result<()> {
    println!("config: {}", config.config_path.display());
    println!("gateway: {}:{}", config.gateway.host, config.gateway.port);

    let check = |label: &str, ok: bool| {
        println!("{} {label}", if ok { "ok  " } else { "MISS" });
    };
    check("whatsapp.phone_number_id", !config.whatsapp.phone_number_id.is_empty());
    check("whatsapp.access_token", !config.whatsapp.access_token.is_empty());
    check("whatsapp.verify_token", !config.whatsapp.verify_token.is_empty());
    check("whatsapp.app_secret", !config.whatsapp.app_secret.is_empty());
    check("ai.api_key", !config.ai.api_key.is_empty());

    match SqliteStore::open(Path::new(&config.storage.db_path)) {
        Ok(store) => {
            let programs = store.list_programs().map(|p| p.len()).unwrap_or(0);
            println!("ok   storage.db_path ({} programs seeded)", programs);
        }
        Err(e) => println!("FAIL storage.db_path: {e:#}"),
    }
    Ok(())
}
