//! `switchyard run`: single-message or interactive conversation.

use anyhow::Context;
use base64::Engine;
use std::io::Write;
use std::path::{Path, PathBuf};
use switchyard_config::AppConfig;
use switchyard_core::agent::{ConversationContext, ConversationTurn};
use switchyard_core::message::ImageAttachment;
use switchyard_core::trace::RunReport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::runtime::{self, CONSOLE_TARGET, Runtime};

pub async fn run(
    config: AppConfig,
    catalog: &Path,
    message: Option<String>,
    image: Option<PathBuf>,
    intent: bool,
) -> anyhow::Result<()> {
    if !config.has_api_key() && config.gateway.default_backend != "local" {
        eprintln!("No aggregator API key configured.");
        eprintln!("Set SWITCHYARD_API_KEY or OPENROUTER_API_KEY, or add api_key under [gateway] in");
        eprintln!("  {}", AppConfig::config_dir().join("config.toml").display());
        anyhow::bail!("no API key found");
    }

    let runtime = runtime::open(config, catalog).await?;
    runtime.connect_servers().await;

    let image = image.as_deref().map(load_image).transpose()?;
    let result = match message {
        Some(message) => single(&runtime, message, image, intent).await,
        None => interactive(&runtime, intent).await,
    };
    runtime.sessions.shutdown().await;
    result
}

async fn single(runtime: &Runtime, message: String, image: Option<ImageAttachment>, intent: bool) -> anyhow::Result<()> {
    if intent {
        eprintln!("intent: {}", runtime.intent_classifier().classify(&message).await);
    }
    let mut context = ConversationContext::new(message).with_reply_target(CONSOLE_TARGET);
    context.image = image;

    let report = answer(runtime, &context).await;
    print_report(&report);
    match report.outcome {
        Ok(_) => Ok(()),
        Err(failure) => Err(failure.into()),
    }
}

async fn interactive(runtime: &Runtime, intent: bool) -> anyhow::Result<()> {
    let profile = runtime.orchestrator.profile();
    let catalog = runtime.orchestrator.catalog().await?;
    println!();
    println!("  Switchyard: interactive mode");
    println!("  Agent:  {}", profile.name);
    println!("  Model:  {}", profile.model.as_deref().unwrap_or(&runtime.config.generation.model));
    println!("  Tools:  {}", catalog.names().join(", "));
    println!();
    println!("  Type a message and press Enter. 'exit' quits, Ctrl+C cancels a run.");
    println!();

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if intent {
            eprintln!("  intent: {}", runtime.intent_classifier().classify(line).await);
        }

        let context = ConversationContext::new(line)
            .with_history(history.clone())
            .with_reply_target(CONSOLE_TARGET);
        let report = answer(runtime, &context).await;
        print_report(&report);

        history.push(ConversationTurn::user(line));
        if let Ok(text) = &report.outcome {
            history.push(ConversationTurn::assistant(text.as_str()));
        }
    }
    println!();
    Ok(())
}

/// Run once, cancelling on Ctrl+C.
async fn answer(runtime: &Runtime, context: &ConversationContext) -> RunReport {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    let report = runtime.orchestrator.run_with_cancel(context, cancel).await;
    watcher.abort();
    report
}

fn print_report(report: &RunReport) {
    println!();
    match &report.outcome {
        Ok(text) => {
            for line in text.lines() {
                println!("  Assistant > {line}");
            }
        }
        Err(failure) => println!("  [Error] {failure}"),
    }

    let trace = &report.trace;
    let tokens = trace
        .total_tokens()
        .map_or_else(|| "n/a".to_string(), |t| t.to_string());
    println!();
    println!(
        "  [{} iteration(s), {} tool call(s), {} tokens, {} ms via {}]",
        trace.iterations,
        trace.tool_calls.len(),
        tokens,
        trace.elapsed_ms,
        if trace.provider_used.is_empty() { "-" } else { &trace.provider_used }
    );
    for call in &trace.tool_calls {
        let status = if call.success { "ok" } else { "error" };
        println!("    {} {} ({} ms)", status, call.name, call.duration_ms);
    }
    for query in &trace.retrievals {
        println!(
            "    retrieval '{}': {}/{} in {} ms",
            query.query, query.returned, query.requested, query.latency_ms
        );
    }
    println!();
}

fn load_image(path: &Path) -> anyhow::Result<ImageAttachment> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(ImageAttachment::new(
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_mime_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.PNG");
        std::fs::write(&path, b"hi").unwrap();

        let image = load_image(&path).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_base64, "aGk=");
        assert!(load_image(&dir.path().join("missing.jpg")).is_err());
    }
}
