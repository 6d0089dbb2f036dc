// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host Provider Admin - operator CLI
//!
//! Runs schema migrations and manages the credential documents providers
//! read their zone tables, offerings and templates from.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use host_provider_backends::{PROVIDER_IDS, validate_credential};
use host_provider_core::{Config, Stores};
use serde_json::Value;
use tracing::{info, warn};

/// Host provider operator CLI.
#[derive(Parser, Debug)]
#[command(name = "host-provider-admin", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// List the known provider identifiers
    Providers,
    /// Manage provider credentials
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
}

#[derive(Subcommand, Debug)]
enum CredentialAction {
    /// Validate and store a credential document read from a JSON file
    Add {
        /// Provider identifier (cloudstack, ec2, gce, azure, k8s)
        #[arg(long)]
        provider: String,
        /// Environment the credential serves
        #[arg(long)]
        environment: String,
        /// Path to the JSON document
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a stored credential document
    Show {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        environment: String,
    },
    /// Delete a stored credential document
    Delete {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        environment: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "host_provider_core=info,host_provider_backends=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    if let Commands::Providers = cli.command {
        for id in PROVIDER_IDS {
            println!("{id}");
        }
        return Ok(());
    }

    let config = Config::from_env()?;
    // Connecting runs the migrations.
    let stores = Stores::connect(&config.database_url)
        .await
        .context("failed to connect to the host provider database")?;
    info!("Connected to database");

    match cli.command {
        Commands::Migrate => info!("Schema is up to date"),
        Commands::Providers => {}
        Commands::Credential { action } => credential(&stores, action).await?,
    }
    Ok(())
}

async fn credential(stores: &Stores, action: CredentialAction) -> anyhow::Result<()> {
    match action {
        CredentialAction::Add {
            provider,
            environment,
            file,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let Value::Object(content) = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?
            else {
                bail!("{} must contain a JSON object", file.display());
            };

            validate_credential(&provider, &content)?;
            stores
                .credentials
                .upsert(&provider, &environment, &content)
                .await?;
            info!(provider = %provider, environment = %environment, "Credential stored");
        }
        CredentialAction::Show {
            provider,
            environment,
        } => {
            let Some(content) = stores.credentials.get(&provider, &environment).await? else {
                bail!("no credential for {provider}/{environment}");
            };
            println!("{}", serde_json::to_string_pretty(&content)?);
        }
        CredentialAction::Delete {
            provider,
            environment,
        } => {
            if !stores.credentials.delete(&provider, &environment).await? {
                bail!("no credential for {provider}/{environment}");
            }
            info!(provider = %provider, environment = %environment, "Credential deleted");
        }
    }
    Ok(())
}
