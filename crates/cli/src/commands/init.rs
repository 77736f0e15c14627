//! `switchyard init`: write the default config and a sample catalog.

use std::path::Path;
use switchyard_config::AppConfig;

pub const SAMPLE_CATALOG: &str = r#"# Agent catalog: the agent, its tools, external servers and documents.

# Built-in current_datetime and calculate tools
builtins = true

[agent]
name = "assistant"
role = "a helpful assistant"
goal = "answer the user's questions accurately"
policies = "never invent facts; say when you do not know"
task = "use the available tools when they help"
objective = "give a short, correct answer"
audience = "general users"
constraints = "answer in plain text"

# A Web tool. The payload is a curl command with {tokens}.
# [[tool]]
# name = "get_user"
# description = "Fetch a user by id"
# kind = "web"
# payload = "curl https://api.example.com/users/{id} -H 'Authorization: Bearer {var.API_TOKEN}'"
# [tool.parameters.id]
# type = "integer"
# description = "User id"
# required = true
# [[tool.variables]]
# key = "API_TOKEN"
# value = "changeme"
# secret = true

# An external tool server
# [[server]]
# id = "deepwiki"
# name = "DeepWiki"
# transport = "sse"
# url = "https://mcp.deepwiki.com/sse"

# Documents searchable through search_knowledge_base
# [[document]]
# content = "Support hours are 9:00 to 17:00, Monday to Friday."
# source = "support.md"
"#;

pub fn run(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
        println!("Created {}", dir.display());
    }

    write_unless_present(config_path, &AppConfig::default_toml(), force)?;
    write_unless_present(&dir.join("catalog.toml"), SAMPLE_CATALOG, force)?;

    println!();
    println!("Next steps:");
    println!("  1. export OPENROUTER_API_KEY=sk-or-v1-...");
    println!("  2. switchyard run --catalog {}", dir.join("catalog.toml").display());
    Ok(())
}

fn write_unless_present(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!("Kept existing {}", path.display());
        return Ok(());
    }
    std::fs::write(path, contents)?;
    println!("Wrote {}", path.display());
    Ok(())
}
