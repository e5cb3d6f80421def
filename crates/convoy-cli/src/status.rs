//! `convoy status` — show provider and workspace status.
//!
//! There is no config file to report on: every setting here is read
//! straight from the environment, the same way `build_agent_loop` reads it.

use anyhow::Result;
use colored::Colorize;

use convoy_providers::registry::PROVIDERS;

use crate::helpers;

/// Run the status command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "🦀 Convoy Status".cyan().bold());
    println!();

    // Workspace
    let workspace = helpers::resolve_workspace();
    let ws_exists = workspace.exists();
    println!(
        "  {:<18} {} {}",
        "Workspace:".bold(),
        workspace.display(),
        if ws_exists {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Model
    println!("  {:<18} {}", "Model:".bold(), helpers::resolve_model());

    println!(
        "  {:<18} {}",
        "Restrict fs/exec:".bold(),
        helpers::resolve_restrict_to_workspace()
    );

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    let providers_map = helpers::providers_from_env();

    for spec in PROVIDERS {
        let status = if let Some(prov_config) = providers_map.get(spec.name) {
            if prov_config.is_configured() {
                format!("{} (key set via ${})", "✓".green(), spec.env_key)
            } else {
                "· not configured".dimmed().to_string()
            }
        } else {
            "· not configured".dimmed().to_string()
        };
        println!("    {:<20} {}", spec.display_name, status);
    }

    // Brave Search (read directly by the web-search tool at call time)
    println!();
    let brave_status = if std::env::var("BRAVE_API_KEY").unwrap_or_default().is_empty() {
        "· not configured".dimmed().to_string()
    } else {
        format!("{} (key set)", "✓".green())
    };
    println!("  {:<18} {}", "Brave Search:".bold(), brave_status);

    println!();

    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
