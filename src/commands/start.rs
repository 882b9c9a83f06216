use anyhow::Result;
use colored::Colorize;
use db_inspector::{config, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Loads configuration and runs the server until SIGTERM/SIGINT.
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting DB Inspector...".green());

    let cfg = config::load_config(config_path)?;
    info!(
        "Loaded configuration from {} (database {}:{})",
        config_path.display(),
        cfg.database.host,
        cfg.database.port
    );

    // Blocks until shutdown
    server::start_server(cfg).await?;

    Ok(())
}
