//! Logs command implementation.

use crate::commands::LogsArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use labelforge_core::Settings;
use labelforge_orchestrator::{LogEntry, ProcessRegistry};
use labelforge_training::LogKind;

pub async fn execute(settings: &Settings, args: &LogsArgs) -> Result<()> {
    let registry =
        ProcessRegistry::new(settings.max_memory_logs).with_log_dir(settings.log_dir(), settings.max_log_file_bytes);

    if let Some(path) = &args.report {
        let bytes = registry
            .save_report(&args.project, path)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("{} {} ({bytes} bytes)", "Report written to".green(), path.display());
        return Ok(());
    }

    if args.stats {
        let stats = registry.log_stats(&args.project).await;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            let path = stats.log_file_path.as_ref().map_or_else(|| "-".to_string(), |p| p.display().to_string());
            println!("  Log file: {path}");
            println!("  Size:     {} bytes", stats.file_size);
            println!("  Lines:    {}", stats.file_line_count);
        }
        return Ok(());
    }

    let entries = match &args.search {
        Some(keyword) => registry.search_logs(&args.project, keyword, true).await,
        None => registry.read_log_file(&args.project, args.tail).await,
    }
    .context("Failed to read training log")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("  {}", format!("No log lines for project '{}'", args.project).dimmed());
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &LogEntry) {
    let time = entry.time.format("%Y-%m-%d %H:%M:%S").to_string();
    let kind = format!("[{}]", entry.kind);
    let kind = match entry.kind {
        LogKind::Stderr | LogKind::Error => kind.red(),
        LogKind::Suggestion => kind.yellow(),
        LogKind::System => kind.cyan(),
        LogKind::Metric => kind.green(),
        LogKind::Stdout => kind.dimmed(),
    };
    println!("{} {} {}", time.dimmed(), kind, entry.message);
}
