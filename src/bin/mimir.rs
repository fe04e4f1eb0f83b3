//! mimir: operator CLI
//!
//! Inspect and reset the context-cache registry and persisted sessions.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimir::cache::registry::load_registry;
use mimir::{CacheCoordinator, Config, GeminiCacheClient, MimirError, Secrets, SessionDb};
use serde_json::{Map, Value};

/// Mimir operator CLI
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::PKG_VERSION)]
#[command(about = "Context-cache and session maintenance")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the persisted cache registry as JSON
    Status,

    /// Delete every tracked remote cache and empty the registry
    Clear,

    /// List persisted sessions, most recent first
    Sessions,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Status => {
            let cache = config.cache_config();
            let path = cache
                .registry_path
                .ok_or_else(|| MimirError::Configuration("no registry path".into()))?;
            let entries = load_registry(&path)?;
            let map: Map<String, Value> = entries
                .into_iter()
                .map(|(key, handle)| (key.to_string(), Value::String(handle)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }

        Command::Clear => {
            let secrets = Secrets::load()?;
            let api_key = secrets.gemini_api_key().ok_or_else(|| {
                MimirError::Configuration(
                    "no Gemini API key (set [gemini] api_key in secrets.toml or GEMINI_API_KEY)"
                        .into(),
                )
            })?;
            let remote = GeminiCacheClient::with_base_url(api_key, &config.gemini.base_url)?;
            let coordinator = CacheCoordinator::new(Arc::new(remote), config.cache_config());
            let removed = coordinator.clear().await;
            println!("cleared {removed} cache entries");
        }

        Command::Sessions => {
            let sessions = config.session_config();
            let path = sessions
                .db_path
                .ok_or_else(|| MimirError::Configuration("no session database path".into()))?;
            let db = SessionDb::open(&path)?;
            let list = db.list()?;
            if list.is_empty() {
                println!("no sessions");
            }
            for s in list {
                let cached = if s.is_cached() { "cached" } else { "uncached" };
                println!(
                    "{}  {}  turns={}  {}  {}  {}",
                    s.session_id,
                    s.last_active.format("%Y-%m-%d %H:%M:%S"),
                    s.turn_count,
                    cached,
                    s.mode,
                    if s.title.is_empty() { &s.content_ref } else { &s.title },
                );
            }
        }
    }

    Ok(())
}
