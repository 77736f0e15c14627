//! `switchyard config`: configuration management commands.

use clap::Subcommand;
use std::path::Path;
use switchyard_config::AppConfig;

#[derive(Subcommand, Clone, Copy, Default)]
pub enum ConfigAction {
    /// Print the effective config with secrets redacted
    #[default]
    Show,
    /// Check the config and report warnings
    Validate,
    /// Print the config file path
    Path,
}

pub fn run(config_path: &Path, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => show(config_path),
        ConfigAction::Validate => validate(config_path),
        ConfigAction::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

fn show(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_path)?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// A copy safe to print.
fn redacted(mut config: AppConfig) -> AppConfig {
    const MASK: &str = "[REDACTED]";
    if config.gateway.api_key.is_some() {
        config.gateway.api_key = Some(MASK.into());
    }
    if let Some(local) = &mut config.gateway.local {
        if local.api_key.is_some() {
            local.api_key = Some(MASK.into());
        }
    }
    config
}

fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = match AppConfig::load_from(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("Config error: {e}");
            return Err(e.into());
        }
    };
    println!("Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No aggregator API key (set SWITCHYARD_API_KEY or OPENROUTER_API_KEY)".to_string());
    }
    if config.generation.temperature.trim().parse::<f32>().is_err() {
        warnings.push(format!(
            "generation.temperature '{}' is not a number; runs use the fallback",
            config.generation.temperature
        ));
    }
    if config.generation.max_tokens.trim().parse::<u32>().is_err() {
        warnings.push(format!(
            "generation.max_tokens '{}' is not a number; runs use the fallback",
            config.generation.max_tokens
        ));
    }
    for w in &warnings {
        println!("  warning: {w}");
    }

    println!();
    println!("  Model:      {}", config.generation.model);
    println!("  Backend:    {}", config.gateway.default_backend);
    println!("  Fallback:   {}", config.gateway.fallback_enabled);
    println!("  Iterations: {}", config.orchestrator.max_iterations);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked() {
        let mut config = AppConfig::default();
        config.gateway.api_key = Some("sk-or-v1-secret".into());
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("sk-or-v1-secret"));
        assert!(shown.contains("[REDACTED]"));
    }
}
