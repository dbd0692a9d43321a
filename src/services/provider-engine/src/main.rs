//! Command line entry point for the NumGate Provider Engine
//!
//! Runs single domain operations against providers loaded from the configured
//! store and prints the result as JSON:
//! - catalog lookups (countries, services, prices)
//! - balance and activation status checks
//! - balance sync for every active provider, with breaker state and metrics
//! - importing provider records into the store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use provider_engine::{EngineConfig, EngineServices};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "numgate", version, about = "Query virtual number providers through the provider engine")]
struct Cli {
    /// Configuration file, overrides NUMGATE_CONFIG_FILE
    #[arg(long, global = true, env = "NUMGATE_CONFIG_FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List a provider's countries
    Countries { provider: String },
    /// List a provider's services, optionally for one country
    Services {
        provider: String,
        #[arg(long)]
        country: Option<String>,
    },
    /// List prices in internal points
    Prices {
        provider: String,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        service: Option<String>,
    },
    /// Show a provider's balance
    Balance { provider: String },
    /// Check the status of one or more activations
    Status {
        provider: String,
        #[arg(required = true)]
        activation_ids: Vec<String>,
    },
    /// Sync every active provider's balance and report breaker state
    SyncBalances,
    /// Save the provider records of a JSON file to the configured store
    Import { file: String },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Some(ref path) = cli.config {
        std::env::set_var("NUMGATE_CONFIG_FILE", path);
    }

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    info!("Starting NumGate provider engine v{}", provider_engine::VERSION);

    if let Err(e) = run(cli.command, config).await {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(command: Command, config: EngineConfig) -> Result<()> {
    let services = Arc::new(
        EngineServices::from_config(config)
            .await
            .context("Failed to initialize engine services")?,
    );

    match command {
        Command::Countries { provider } => {
            let provider = services.provider(&provider).await?;
            print_json(&provider.get_countries().await?)
        }
        Command::Services { provider, country } => {
            let provider = services.provider(&provider).await?;
            print_json(&provider.get_services(country.as_deref()).await?)
        }
        Command::Prices {
            provider,
            country,
            service,
        } => {
            let provider = services.provider(&provider).await?;
            print_json(
                &provider
                    .get_prices(country.as_deref(), service.as_deref())
                    .await?,
            )
        }
        Command::Balance { provider } => {
            let provider = services.provider(&provider).await?;
            print_json(&provider.get_balance().await?)
        }
        Command::Status {
            provider,
            activation_ids,
        } => {
            let provider = services.provider(&provider).await?;
            print_json(&provider.get_statuses(&activation_ids).await)
        }
        Command::SyncBalances => print_json(&services.sync_report().await?),
        Command::Import { file } => {
            let count = services.import_providers(&file).await?;
            info!(count, "Provider records imported");
            print_json(&serde_json::json!({ "imported": count }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = &config.observability.log_level;
    let filter = EnvFilter::try_new(log_level).or_else(|_| EnvFilter::try_new("info"))?;

    // Logs go to stderr so command output stays parseable
    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        "pretty" | "text" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
