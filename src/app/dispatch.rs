use crate::Config;
use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Effective settings as TOML, with the API key masked.
pub fn render_config(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    shown.api_key = shown.api_key.as_deref().map(mask_secret);
    let body = toml::to_string_pretty(&shown).context("Failed to serialize config")?;
    Ok(format!(
        "# {}\n# workspace: {}\n# database: {}\n\n{body}",
        config.config_path.display(),
        config.workspace_dir.display(),
        config.database_path().display(),
    ))
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            info!("Starting ClubLLM gateway on {host}:{port}");
            crate::gateway::run_gateway(&host, port, Arc::new(config)).await
        }
        Commands::Chat { message } => crate::app::chat::run(&config, message).await,
        Commands::Config => {
            print!("{}", render_config(&config)?);
            Ok(())
        }
    }
}
