//! Training command implementation.

use crate::commands::TrainArgs;
use crate::commands::events::{explain, render, status_colored};
use anyhow::Result;
use colored::Colorize;
use labelforge_core::Settings;
use labelforge_orchestrator::{ProcessStatus, TrainingOrchestrator};
use serde_json::json;

/// Run one training job in the foreground and stream its events.
pub async fn execute(settings: &Settings, args: &TrainArgs) -> Result<()> {
    let orchestrator = TrainingOrchestrator::from_settings(settings);
    let config = args.job.to_config(settings)?;
    let project_id = config.project_id.clone();

    let mut events = orchestrator.registry().subscribe_project(&project_id);
    let started = if args.dry_run {
        orchestrator.start_dry_run(config).await
    } else {
        orchestrator.start(config).await
    };
    let run = started.map_err(explain)?;

    if args.json {
        println!("{}", json!({ "event": "started", "projectId": project_id, "run": run }));
    } else {
        println!();
        println!("{}", format!("Training '{}'", run.name).bold().cyan());
        println!("  Batch: {}", run.batch);
        if let Some(pid) = run.pid {
            println!("  PID:   {}", pid.to_string().dimmed());
        }
        println!("  {}", "Press Ctrl-C to stop".dimmed());
        println!();
    }

    let wait = orchestrator.wait(&project_id);
    tokio::pin!(wait);
    let mut stop_requested = false;
    let status = loop {
        tokio::select! {
            status = &mut wait => break status,
            Some(event) = events.recv() => render(&event, args.json, false),
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                stop_requested = true;
                if let Err(e) = orchestrator.stop(&project_id).await {
                    tracing::warn!(error = %e, "Stop request failed");
                }
            }
        }
    };
    while let Some(event) = events.try_recv() {
        render(&event, args.json, false);
    }

    if !args.json {
        println!();
        println!("{} {}", "Training finished:".bold(), status_colored(status));
    }
    match status {
        ProcessStatus::Failed => anyhow::bail!("training failed for project '{project_id}'"),
        _ => Ok(()),
    }
}
