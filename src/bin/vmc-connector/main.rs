// ABOUTME: Command line entry point for the vmc connector agent
// ABOUTME: Runs the agent and provides key validation, status and aggregator management commands
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # vmc-connector
//!
//! ```bash
//! # Run until Ctrl-C (default command)
//! vmc-connector run
//!
//! # Check a key before saving it
//! vmc-connector validate-key vmc_<tenant>_<random>_<checksum>
//! vmc-connector set-key vmc_<tenant>_<random>_<checksum>
//!
//! # Register a database and check it is reachable
//! vmc-connector aggregator add --name sales --engine postgresql --database sales --username reader --password secret
//! vmc-connector test-connection <AGGREGATOR_ID>
//!
//! # Forget the key, every aggregator and every stored credential
//! vmc-connector reset --yes
//! ```

mod commands;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tracing::info;
use uuid::Uuid;

use vmc_connector::agent::Agent;
use vmc_connector::config::{AgentConfig, SettingsUpdate};
use vmc_connector::crypto::{mask_api_key, validate_api_key_detailed};
use vmc_connector::logging::init_logging;

use commands::aggregator::{self, AggregatorAction};

#[derive(Parser)]
#[command(
    name = "vmc-connector",
    version,
    about = "On-premise connector agent",
    long_about = "Exposes read-only access to local databases to the vmc control plane over an outbound tunnel"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the control plane and serve commands until Ctrl-C
    Run,
    /// Check an API key's format and checksum
    ValidateKey {
        /// Key to check
        key: String,
    },
    /// Validate and save the API key in settings
    SetKey {
        /// Key to save
        key: String,
    },
    /// Print settings, vault and offline queue summary
    Status,
    /// Manage registered databases
    Aggregator {
        #[command(subcommand)]
        action: AggregatorAction,
    },
    /// Open a pool to a registered database and run a trivial read
    TestConnection {
        /// Aggregator id
        id: Uuid,
    },
    /// Delete settings and vault contents
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::from_env()?;
    init_logging(&config.log)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::ValidateKey { key } => {
            validate_key(&key);
            Ok(())
        }
        Commands::SetKey { key } => set_key(config, key).await,
        Commands::Status => status(config).await,
        Commands::Aggregator { action } => {
            let agent = Agent::new(config).await?;
            aggregator::execute(&agent, action).await
        }
        Commands::TestConnection { id } => {
            let agent = Agent::new(config).await?;
            aggregator::test_connection(&agent, id).await
        }
        Commands::Reset { yes } => reset(config, yes).await,
    }
}

async fn run(config: AgentConfig) -> Result<()> {
    let agent = Agent::new(config).await?;
    agent.start().await?;
    info!("Connector agent running; press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("Shutdown requested");
    agent.shutdown().await;
    Ok(())
}

fn validate_key(key: &str) {
    let validation = validate_api_key_detailed(key);
    if validation.valid {
        let tenant = validation
            .tenant_id
            .map(|t| t.to_string())
            .unwrap_or_default();
        println!("Valid API key for tenant {tenant}");
    } else {
        println!("Invalid API key: {}", validation.reason.unwrap_or_default());
    }
}

async fn set_key(config: AgentConfig, key: String) -> Result<()> {
    let validation = validate_api_key_detailed(&key);
    if !validation.valid {
        bail!(
            "Refusing to save key: {}",
            validation.reason.unwrap_or_default()
        );
    }
    let agent = Agent::new(config).await?;
    let masked = mask_api_key(&key);
    agent
        .settings()
        .save(SettingsUpdate {
            api_key: Some(key),
            ..SettingsUpdate::default()
        })
        .await?;
    println!("Saved API key {masked}");
    Ok(())
}

async fn reset(config: AgentConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Reset deletes the API key, all aggregators and all credentials; pass --yes to confirm");
    }
    let agent = Agent::new(config).await?;
    agent.reset().await?;
    println!("Settings and vault cleared");
    Ok(())
}

async fn status(config: AgentConfig) -> Result<()> {
    let data_dir = config.data_dir.clone();
    let agent = Agent::new(config).await?;
    let settings = agent.settings().load().await?;
    let report = agent.status().await?;
    let summary = json!({
        "dataDir": data_dir.display().to_string(),
        "apiKey": settings.api_key.as_deref().map(mask_api_key),
        "aggregators": settings.aggregators.len(),
        "credentials": agent.vault().list().await?.len(),
        "pendingResults": report.pending_results,
        "connection": report.connection,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
