use anyhow::Result;
use colored::Colorize;
use db_inspector::database::StatusKind;
use db_inspector::{config, server};
use std::path::Path;
use tracing::warn;

/// Execute the check command
///
/// Connects once, prints the status as JSON and closes the connection. A
/// failed connection is reported in the output, not as a command error.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let db = server::build_database_service(&cfg)?;

    if let Err(e) = db.init_db().await {
        warn!("Initial database connection failed: {}", e);
    }

    let status = db.check_status().await;
    db.close_db().await?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if status.status == StatusKind::Ok {
        println!("{}", "✓ Database is reachable".green());
    } else {
        println!("{}", format!("✗ Database status: {}", status.status.as_str()).red());
    }

    Ok(())
}
