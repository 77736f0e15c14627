//! `switchyard tools`: list what the model would be offered.

use std::path::Path;
use switchyard_config::AppConfig;

use crate::runtime;

pub async fn run(config: AppConfig, catalog: &Path, connect: bool) -> anyhow::Result<()> {
    let runtime = runtime::open(config, catalog).await?;
    if connect {
        runtime.connect_servers().await;
    }

    let catalog = runtime.orchestrator.catalog().await?;
    println!("{} tools for agent '{}':", catalog.len(), runtime.orchestrator.profile().name);
    for def in catalog.definitions() {
        println!();
        println!("  {}", def.name);
        if !def.description.is_empty() {
            println!("    {}", def.description);
        }
        if let Some(props) = def.parameters.get("properties").and_then(|p| p.as_object()) {
            let names: Vec<&str> = props.keys().map(String::as_str).collect();
            if !names.is_empty() {
                println!("    params: {}", names.join(", "));
            }
        }
    }

    if connect {
        runtime.sessions.shutdown().await;
    }
    Ok(())
}
