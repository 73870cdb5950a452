use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worker_cache::cache::{CacheRegistry, ClearTarget};
use worker_cache::config::Config;
use worker_cache::server::{self, ServerConfig, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "worker-cache")]
#[command(about = "Two-tier response cache for the digital worker", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/worker-cache/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cache admin server and the cleanup scheduler
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Allow cross-origin requests
        #[arg(long, default_value = "false")]
        cors: bool,
    },
    /// Print cache statistics
    Stats {
        /// url, llm, prompt, translate, tool or all
        #[arg(short = 't', long = "type", default_value = "all")]
        cache_type: String,
    },
    /// Remove cached entries
    Clear {
        /// url, llm, prompt, translate, tool or all
        #[arg(short = 't', long = "type")]
        cache_type: String,
    },
    /// Expire stale entries and enforce the disk ceiling once
    Cleanup,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worker_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    // Invalid settings stop us here, before anything is served
    let config = Config::load_from(&config_path, |name| std::env::var(name).ok())
        .with_context(|| format!("Invalid configuration ({})", config_path.display()))?;

    match cli.command {
        Commands::Serve { port, host, cors } => {
            let server_config = ServerConfig {
                port,
                host,
                cors_enabled: cors,
            };
            server::start_server(server_config, config, Some(config_path)).await?;
        }
        Commands::Stats { cache_type } => {
            let target = parse_target(&cache_type)?;
            let registry = CacheRegistry::new(&config.cache);
            let report = registry.stats(target).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Clear { cache_type } => {
            let target = parse_target(&cache_type)?;
            let registry = CacheRegistry::new(&config.cache);
            let report = registry.clear(target).await?;
            println!("Removed {} cached entries", report.total_removed);
            for (namespace, counts) in &report.cleared {
                println!("  {:<10} disk: {:>6}", namespace.as_str(), counts.disk);
            }
        }
        Commands::Cleanup => {
            let registry = CacheRegistry::new(&config.cache);
            let summary = registry.cleanup().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.is_ok() {
                anyhow::bail!("cleanup failed for {} namespace(s)", summary.errors.len());
            }
        }
        Commands::Config => {
            println!("# {}", config_path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn parse_target(raw: &str) -> Result<ClearTarget> {
    raw.parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .with_context(|| format!("Unknown cache type '{}'", raw))
}
