//! `switchyard import`: print a `[[server]]` catalog entry.

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use switchyard_mcp::{ImportOptions, ServerSpec, apply_preset, import_one_click};

#[derive(Args)]
pub struct ImportArgs {
    /// One-click JSON document (`{"mcpServers": {...}}`)
    #[arg(long, conflicts_with = "preset", required_unless_present = "preset")]
    pub json: Option<PathBuf>,

    /// Preset key (see `switchyard mcp presets`)
    #[arg(long)]
    pub preset: Option<String>,

    /// Preset input as key=value; repeatable
    #[arg(long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, String)>,

    /// Session id override
    #[arg(long)]
    pub id: Option<String>,

    /// Display name override
    #[arg(long)]
    pub name: Option<String>,

    /// Owning agent id
    #[arg(long, default_value = "")]
    pub agent: String,
}

#[derive(Serialize)]
struct ServerEntry {
    server: Vec<ServerSpec>,
}

pub fn run(args: ImportArgs) -> anyhow::Result<()> {
    print!("{}", render(args)?);
    Ok(())
}

fn render(args: ImportArgs) -> anyhow::Result<String> {
    let options = ImportOptions {
        id: args.id,
        name: args.name,
        description: None,
        agent: args.agent,
    };
    let spec = match (&args.json, &args.preset) {
        (Some(path), _) => {
            let document =
                std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            import_one_click(&document, options)?
        }
        (None, Some(key)) => {
            let inputs: HashMap<String, String> = args.inputs.into_iter().collect();
            apply_preset(key, &inputs, options)?
        }
        (None, None) => anyhow::bail!("pass --json or --preset"),
    };
    Ok(toml::to_string_pretty(&ServerEntry { server: vec![spec] })?)
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}
