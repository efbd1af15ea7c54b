//! Top-level command dispatch.
//!
//! Loads the manifest, opens the vault session, resolves provider
//! credentials, merges application secrets (deploy only), builds the
//! engine, runs exactly one operation, and renders the result.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CommandKind, OutputFormat, RunConfig};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::providers::{self, DeploymentResult, DeploymentStatus};
use crate::{credentials, secrets, vault};

pub async fn run(config: RunConfig) -> Result<()> {
    let mut manifest = Manifest::load_file(&config.manifest_path)?;
    info!(
        command = config.command.as_str(),
        application = %manifest.application.name,
        environment = %manifest.environment.name,
        provider = %manifest.provider.name,
        "starting"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested; aborting at the next safe point");
            signal_cancel.cancel();
        }
    });

    let vault_session = match manifest.vault.clone() {
        Some(vault_config) => Some(vault::Client::connect(&vault_config, &manifest).await?),
        None => None,
    };

    let bundle = credentials::resolve(&manifest, vault_session.as_ref()).await?;

    // The one sanctioned manifest mutation: fold resolved application
    // secrets into the environment map before the engine reads it.
    if config.command == CommandKind::Deploy {
        let resolved = secrets::resolve_app_secrets(&manifest, vault_session.as_ref()).await?;
        manifest.merge_resolved_secrets(resolved);
    }

    let engine = providers::create_engine(&manifest, &bundle, &cancel).await?;

    match config.command {
        CommandKind::Deploy => {
            let result = engine.deploy(&manifest).await?;
            render_result(config.output, &result)
        }
        CommandKind::Rollback => {
            let result = engine.rollback(&manifest).await?;
            render_result(config.output, &result)
        }
        CommandKind::Stop => {
            engine.stop(&manifest).await?;
            println!(
                "stopped {}/{}",
                manifest.application.name, manifest.environment.name
            );
            Ok(())
        }
        CommandKind::Destroy => {
            engine.destroy(&manifest).await?;
            println!(
                "destroyed {}/{}",
                manifest.application.name, manifest.environment.name
            );
            Ok(())
        }
        CommandKind::Status => {
            let status = engine.status(&manifest).await?;
            render_status(config.output, &status)
        }
    }
}

fn render_result(output: OutputFormat, result: &DeploymentResult) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Text => {
            println!("application: {}", result.application);
            println!("environment: {}", result.environment);
            println!("status:      {}", result.status);
            if let Some(url) = &result.url {
                println!("url:         {url}");
            }
            println!("{}", result.message);
        }
    }
    Ok(())
}

fn render_status(output: OutputFormat, status: &DeploymentStatus) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(status)?),
        OutputFormat::Text => {
            println!("application: {}", status.application);
            println!("environment: {}", status.environment);
            println!("status:      {}", status.status);
            if let Some(health) = &status.health {
                println!("health:      {health}");
            }
            if let Some(url) = &status.url {
                println!("url:         {url}");
            }
            if let Some(updated) = &status.last_updated {
                println!("updated:     {updated}");
            }
        }
    }
    Ok(())
}
