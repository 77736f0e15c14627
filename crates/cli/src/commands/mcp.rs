//! `switchyard mcp`: connect external servers and inspect their tools.

use clap::Subcommand;
use std::path::PathBuf;
use switchyard_config::AppConfig;
use switchyard_mcp::{SessionStatus, presets, qualified_name};

use crate::runtime;

#[derive(Subcommand)]
pub enum McpAction {
    /// Connect every server in a catalog and print its status
    Connect {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Connect and list each server's tools as the model sees them
    Tools {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// List the built-in server presets
    Presets,
}

pub async fn run(config: AppConfig, action: McpAction) -> anyhow::Result<()> {
    match action {
        McpAction::Connect { catalog } => {
            let runtime = runtime::open(config, &catalog).await?;
            runtime.connect_servers().await;
            let statuses = runtime.sessions.statuses().await;
            if statuses.is_empty() {
                println!("No servers in {}", catalog.display());
            }
            for status in &statuses {
                print_status(status);
            }
            runtime.sessions.shutdown().await;
        }
        McpAction::Tools { catalog } => {
            let runtime = runtime::open(config, &catalog).await?;
            runtime.connect_servers().await;
            for status in runtime.sessions.statuses().await {
                print_status(&status);
                for tool in runtime.sessions.tools(&status.id) {
                    let marker = if tool.active { " " } else { "-" };
                    println!("   {marker} {}", qualified_name(&status.id, &tool.name));
                    if !tool.description.is_empty() {
                        println!("       {}", tool.description);
                    }
                }
            }
            runtime.sessions.shutdown().await;
        }
        McpAction::Presets => {
            for preset in presets() {
                println!("{:<20} {} ({})", preset.key, preset.name, preset.transport);
                println!("{:<20} {}", "", preset.description);
                if !preset.inputs.is_empty() {
                    let inputs: Vec<&str> = preset.inputs.iter().map(|i| i.id).collect();
                    println!("{:<20} inputs: {}", "", inputs.join(", "));
                }
            }
        }
    }
    Ok(())
}

fn print_status(status: &SessionStatus) {
    let server = match (&status.server_name, &status.server_version) {
        (Some(name), Some(version)) => format!("{name} {version}"),
        (Some(name), None) => name.clone(),
        _ => "-".into(),
    };
    println!(
        "{:<16} {:<14} {:<16} {:?} tools={}",
        status.id,
        status.transport.to_string(),
        server,
        status.state,
        status.tool_count
    );
    if let Some(error) = &status.last_error {
        println!("{:<16} error: {error}", "");
    }
}
