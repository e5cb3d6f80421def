//! Shared CLI helpers — path expansion, response printing, version banner,
//! and the env-var-driven runtime settings that stand in for a config file.

use std::collections::HashMap;
use std::path::PathBuf;

use colored::Colorize;

use convoy_providers::registry::{ProviderConfig, PROVIDERS};

/// Model used when `CONVOY_MODEL` isn't set.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Resolve the workspace directory: `CONVOY_WORKSPACE` env var, else the
/// default `~/.convoy/workspace`.
pub fn resolve_workspace() -> PathBuf {
    match std::env::var("CONVOY_WORKSPACE") {
        Ok(path) if !path.is_empty() => expand_tilde(&path),
        _ => convoy_core::utils::get_default_workspace_path(),
    }
}

/// Resolve the default model: `CONVOY_MODEL` env var, else [`DEFAULT_MODEL`].
pub fn resolve_model() -> String {
    std::env::var("CONVOY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
}

/// Whether filesystem/exec tools should be confined to the workspace.
/// Defaults to `true`; set `CONVOY_RESTRICT_TO_WORKSPACE=0` to disable.
pub fn resolve_restrict_to_workspace() -> bool {
    match std::env::var("CONVOY_RESTRICT_TO_WORKSPACE") {
        Ok(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
        Err(_) => true,
    }
}

/// Build the `{provider name -> ProviderConfig}` map the provider registry
/// needs, reading each provider's API key (and optional `*_API_BASE`
/// override) straight from the environment. There is no config file —
/// every provider is "configured" purely by having its env var set.
pub fn providers_from_env() -> HashMap<String, ProviderConfig> {
    let mut map = HashMap::new();
    for spec in PROVIDERS {
        let api_key = std::env::var(spec.env_key).unwrap_or_default();
        if api_key.is_empty() {
            continue;
        }
        let api_base = std::env::var(format!("{}_API_BASE", spec.name.to_uppercase()))
            .ok()
            .filter(|s| !s.is_empty());
        map.insert(
            spec.name.to_string(),
            ProviderConfig {
                api_key,
                api_base,
                extra_headers: None,
            },
        );
    }
    map
}

/// Print an agent response to stdout.
pub fn print_response(response: &str, _render_markdown: bool) {
    // TODO: add termimad or similar markdown renderer when render_markdown=true
    println!();
    println!("{}", "🦀 Convoy".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();
}

/// Print the banner shown at REPL start.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "{}  v{}",
        "🦀 Convoy".cyan().bold(),
        version.dimmed()
    );
    println!(
        "{}",
        "Type a message, or \"exit\" to quit.".dimmed()
    );
    println!();
}

/// Print a "thinking" spinner placeholder (for non-log mode).
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_home() {
        let result = expand_tilde("~/foo/bar");
        assert!(result.ends_with("foo/bar"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn expand_tilde_no_tilde() {
        let result = expand_tilde("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn expand_tilde_bare() {
        let result = expand_tilde("~");
        assert!(!result.to_string_lossy().contains('~'));
    }

    #[test]
    fn expand_tilde_relative() {
        let result = expand_tilde("relative/path");
        assert_eq!(result, PathBuf::from("relative/path"));
    }

    #[test]
    fn resolve_model_default() {
        std::env::remove_var("CONVOY_MODEL");
        assert_eq!(resolve_model(), DEFAULT_MODEL);
    }

    #[test]
    fn resolve_model_env_override() {
        std::env::set_var("CONVOY_MODEL", "gpt-4o-mini");
        assert_eq!(resolve_model(), "gpt-4o-mini");
        std::env::remove_var("CONVOY_MODEL");
    }

    #[test]
    fn providers_from_env_picks_up_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert!(!providers_from_env().contains_key("anthropic"));

        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test");
        let map = providers_from_env();
        assert!(map.get("anthropic").unwrap().is_configured());
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn resolve_restrict_to_workspace_default_true() {
        std::env::remove_var("CONVOY_RESTRICT_TO_WORKSPACE");
        assert!(resolve_restrict_to_workspace());
    }

    #[test]
    fn resolve_restrict_to_workspace_disabled() {
        std::env::set_var("CONVOY_RESTRICT_TO_WORKSPACE", "0");
        assert!(!resolve_restrict_to_workspace());
        std::env::remove_var("CONVOY_RESTRICT_TO_WORKSPACE");
    }
}
