use anyhow::Result;
use colored::Colorize;
use db_inspector::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration with the password masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", render(&cfg)?);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config(config_path)?;
    // the URL form of the target must be buildable too
    cfg.database.dsn()?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Server: {}:{}", cfg.server.host, cfg.server.port);
    println!(
        "  Database: {}@{}:{}/{}",
        cfg.database.user, cfg.database.host, cfg.database.port, cfg.database.name
    );
    println!(
        "  Reconnect backoff: {}ms -> {}ms",
        cfg.reconnect.initial_delay_ms, cfg.reconnect.max_delay_ms
    );
    println!(
        "  Metrics: {}",
        if cfg.metrics.enabled { cfg.metrics.endpoint.as_str() } else { "disabled" }
    );

    info!("Configuration validation successful");
    Ok(())
}

/// TOML rendering of the configuration with secrets masked
fn render(cfg: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(&cfg.masked())?)
}
