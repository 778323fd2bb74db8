//! llmux - Unified request router for multiple AI chat providers
//!
//! A local service that fronts several upstream AI providers behind one
//! endpoint, falling through provider and model tiers until one answers.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmux::Config;

#[derive(Parser)]
#[command(name = "llmux")]
#[command(about = "Unified request router for multiple AI chat providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the router server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and their models
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llmux=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");

            let (mut cfg, key_sources) = Config::from_file_with_env(&config)?;

            for (provider, source) in &key_sources {
                tracing::info!(provider = %provider, key_source = %source, "Resolved API key");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            llmux::server::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;

            println!("Configuration OK: {}", config);
            println!("  listen: {}", cfg.server.listen);
            match &cfg.database {
                Some(db) => println!("  database: {}", db.path),
                None => println!("  database: disabled"),
            }
            println!(
                "  cache: {} (ttl {}s, max {} entries)",
                if cfg.cache.enabled { "enabled" } else { "disabled" },
                cfg.cache.ttl_secs,
                cfg.cache.max_entries
            );
            println!(
                "  rate limit: {} (min interval {}ms)",
                if cfg.rate_limit.enabled { "enabled" } else { "disabled" },
                cfg.rate_limit.min_interval_ms
            );
            println!("  providers: {}", cfg.providers.len());

            for (provider, source) in &key_sources {
                println!("    {} key: {}", provider, source);
            }

            Ok(())
        }

        Commands::Providers { config } => {
            let (cfg, _) = Config::from_file_with_env(&config)?;

            if cfg.providers.is_empty() {
                println!("No providers configured");
                return Ok(());
            }

            for provider in &cfg.providers {
                let key_status = if provider.api_key.is_some() || !provider.kind.requires_key() {
                    "available"
                } else {
                    "no key"
                };
                println!("{} ({}, {})", provider.name, provider.kind, key_status);

                for model in &provider.models {
                    let name = model.display_name.as_deref().unwrap_or(&model.id);
                    println!(
                        "  {} [{}] - {} {}/day",
                        model.id, name, model.quota_limit, model.quota_unit
                    );
                }
            }

            Ok(())
        }
    }
}
