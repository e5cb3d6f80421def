//! `convoy onboard` — initialize the workspace.
//!
//! There's no config file to write: runtime settings are read from the
//! environment (see `helpers::providers_from_env`/`resolve_model`). This
//! command only scaffolds the workspace directory and its bootstrap files.

use anyhow::Result;
use colored::Colorize;

use convoy_core::utils::get_data_path;

use crate::helpers;

/// Run the onboard command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "🦀 Convoy — Setup".cyan().bold());
    println!();

    let data_dir = get_data_path();
    let workspace = helpers::resolve_workspace();

    // 1. Ensure workspace directory
    std::fs::create_dir_all(&workspace)?;
    println!("  {} workspace at {}", "✓".green(), workspace.display());

    // 2. Create memory directory
    let memory_dir = workspace.join("memory");
    std::fs::create_dir_all(&memory_dir)?;
    println!("  {} memory dir at {}", "✓".green(), memory_dir.display());

    // 3. Create bootstrap template files if they don't exist
    create_template(&workspace.join("AGENTS.md"), AGENTS_TEMPLATE)?;
    create_template(&workspace.join("SOUL.md"), SOUL_TEMPLATE)?;
    create_template(&workspace.join("USER.md"), USER_TEMPLATE)?;
    create_template(&memory_dir.join("MEMORY.md"), MEMORY_TEMPLATE)?;

    // 4. Create skills directory (empty; drop a skill's SKILL.md in here)
    let skills_dir = workspace.join("skills");
    std::fs::create_dir_all(&skills_dir)?;
    println!("  {} skills dir at {}", "✓".green(), skills_dir.display());

    // 5. Create sessions + history directories
    let sessions_dir = workspace.join("sessions");
    std::fs::create_dir_all(&sessions_dir)?;
    let history_dir = data_dir.join("history");
    std::fs::create_dir_all(&history_dir)?;

    println!();
    println!(
        "{}",
        "  Setup complete! Set an API key (e.g. ANTHROPIC_API_KEY) and run `convoy agent` to start chatting.".green()
    );
    println!();

    Ok(())
}

/// Create a template file if it doesn't exist.
fn create_template(path: &std::path::Path, content: &str) -> Result<()> {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    if path.exists() {
        println!("  {} {} already exists", "✓".green(), name);
    } else {
        std::fs::write(path, content)?;
        println!("  {} created {}", "✓".green(), name);
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────

const AGENTS_TEMPLATE: &str = r#"# Agents

Configuration and personality for your AI agents.

## Default Agent: Convoy

- **Name**: Convoy
- **Role**: Personal AI assistant
- **Style**: Concise, helpful, technical when needed
"#;

const USER_TEMPLATE: &str = r#"# User Profile

Tell Convoy about yourself so it can personalize its responses.

## About Me

- **Name**: (your name)
- **Role**: (your role/profession)
- **Preferences**: (communication preferences)
"#;

const SOUL_TEMPLATE: &str = r#"# Soul

I am Convoy, a lightweight AI assistant built in Rust.

## Personality

- Helpful and friendly
- Concise and to the point
- Curious and eager to learn

## Values

- Accuracy over speed
- User privacy and safety
- Transparency in actions
"#;

const MEMORY_TEMPLATE: &str = r#"# Long-term Memory

Convoy persists important information here automatically.
You can also edit this file directly.
"#;

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
