// ABOUTME: Aggregator management commands: add, list, remove and connection test
// ABOUTME: Secrets go to the vault; the aggregator entry only references the credential id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use anyhow::{anyhow, Result};
use clap::Subcommand;
use uuid::Uuid;

use vmc_connector::agent::Agent;
use vmc_connector::aggregators::NewAggregator;
use vmc_connector::query_engine::DatabaseEngine;
use vmc_connector::vault::{CredentialKind, NewCredential};

#[derive(Subcommand)]
pub enum AggregatorAction {
    /// Register a database
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// postgresql, mysql, mssql or sqlite
        #[arg(long)]
        engine: DatabaseEngine,
        /// Server host (ignored for sqlite)
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Server port; the engine default when omitted
        #[arg(long)]
        port: Option<u16>,
        /// Database name, or file path for sqlite
        #[arg(long)]
        database: String,
        /// Login
        #[arg(long)]
        username: Option<String>,
        /// Password, stored encrypted in the vault
        #[arg(long)]
        password: Option<String>,
    },
    /// List registered databases
    List,
    /// Remove a database and its stored credential
    Remove {
        /// Aggregator id
        id: Uuid,
    },
}

pub async fn execute(agent: &Agent, action: AggregatorAction) -> Result<()> {
    match action {
        AggregatorAction::Add {
            name,
            engine,
            host,
            port,
            database,
            username,
            password,
        } => {
            let credential_id = match password {
                Some(password) => Some(
                    agent
                        .vault()
                        .store(NewCredential {
                            name: name.clone(),
                            kind: CredentialKind::Database,
                            host: Some(host.clone()),
                            port,
                            database: Some(database.clone()),
                            username: username.clone(),
                            password: Some(password),
                            token: None,
                        })
                        .await?,
                ),
                None => None,
            };
            let aggregator = agent
                .aggregators()
                .add(NewAggregator {
                    name,
                    engine,
                    host,
                    port,
                    database,
                    username,
                    credential_id,
                })
                .await?;
            println!("Added aggregator {} ({})", aggregator.id, aggregator.engine);
        }
        AggregatorAction::List => {
            let aggregators = agent.aggregators().list().await?;
            if aggregators.is_empty() {
                println!("No aggregators registered");
            }
            for a in aggregators {
                let port = a
                    .port
                    .or_else(|| a.engine.default_port())
                    .map(|p| format!(":{p}"))
                    .unwrap_or_default();
                println!(
                    "{}  {:<20} {:<10} {}{}/{}",
                    a.id, a.name, a.engine, a.host, port, a.database
                );
            }
        }
        AggregatorAction::Remove { id } => {
            let removed = agent
                .aggregators()
                .delete(id)
                .await?
                .ok_or_else(|| anyhow!("Aggregator {id} not found"))?;
            if let Some(credential_id) = removed.credential_id {
                agent.vault().delete(credential_id).await?;
            }
            println!("Removed aggregator {} ({})", removed.id, removed.name);
        }
    }
    Ok(())
}

pub async fn test_connection(agent: &Agent, id: Uuid) -> Result<()> {
    let aggregator = agent
        .aggregators()
        .get_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("Aggregator {id} not found"))?;
    let credential = match aggregator.credential_id {
        Some(credential_id) => Some(agent.vault().require(credential_id).await?),
        None => None,
    };
    let config = aggregator.database_config(credential.as_ref());

    let outcome = agent.engine().test_connection(&config).await;
    agent.engine().pools().close_all().await;
    outcome?;
    println!("Connection to {} ({}) succeeded", aggregator.name, aggregator.engine);
    Ok(())
}
