//! Queue command implementation.

use crate::commands::QueueCommand;
use crate::commands::events::{explain, render};
use anyhow::{Context, Result};
use colored::Colorize;
use labelforge_core::Settings;
use labelforge_orchestrator::{JobStatus, TrainingOrchestrator};
use labelforge_training::JobId;
use std::time::Duration;

pub async fn execute(settings: &Settings, command: QueueCommand) -> Result<()> {
    let orchestrator = TrainingOrchestrator::from_settings(settings);
    let queue = orchestrator.queue();

    match command {
        QueueCommand::Add { job, priority } => {
            let config = job.to_config(settings)?;
            let job = orchestrator.enqueue(config, priority).await.map_err(explain)?;
            println!("{} {} ({}, priority {})", "Queued".green(), job.id.as_str().cyan(), job.project_id(), job.priority);
        }
        QueueCommand::List { json } => {
            let jobs = queue.list().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
                return Ok(());
            }

            println!();
            println!("{}", format!("Job Queue ({})", jobs.len()).bold().cyan());
            println!();
            if jobs.is_empty() {
                println!("  {}", "No jobs queued.".dimmed());
                return Ok(());
            }
            println!("{:<40} {:<16} {:<10} {:>8} {:>7}  {}", "ID", "Project", "Status", "Priority", "Retries", "Created");
            println!("{}", "─".repeat(100));
            for job in jobs {
                let status = match job.status {
                    JobStatus::Pending => job.status.as_str().normal(),
                    JobStatus::Running => job.status.as_str().cyan(),
                    JobStatus::Completed => job.status.as_str().green(),
                    JobStatus::Failed => job.status.as_str().red(),
                    JobStatus::Cancelled => job.status.as_str().dimmed(),
                };
                println!(
                    "{:<40} {:<16} {:<10} {:>8} {:>7}  {}",
                    job.id.as_str(),
                    job.project_id(),
                    status,
                    job.priority,
                    format!("{}/{}", job.retry_count, job.max_retries),
                    job.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                );
                if let Some(error) = &job.error {
                    println!("    {}", error.red());
                }
            }
            println!();
        }
        QueueCommand::Cancel { id } => {
            queue.cancel(&JobId::from(id.as_str())).await.context("Failed to cancel job")?;
            println!("{} {}", "Cancelled".yellow(), id);
        }
        QueueCommand::Remove { id } => {
            queue.remove(&JobId::from(id.as_str())).await.context("Failed to remove job")?;
            println!("{} {}", "Removed".yellow(), id);
        }
        QueueCommand::Reorder { from, to } => {
            let order = queue.reorder(from, to).await.context("Failed to reorder queue")?;
            println!("{}", "Pending order:".bold());
            for (index, id) in order.iter().enumerate() {
                println!("  {index}. {id}");
            }
        }
        QueueCommand::Clear => {
            let removed = queue.clear_finished().await;
            println!("Removed {removed} finished job(s)");
        }
        QueueCommand::Run { until_empty, json } => run(&orchestrator, until_empty, json).await?,
    }
    Ok(())
}

/// Work through the queue in the foreground.
async fn run(orchestrator: &TrainingOrchestrator, until_empty: bool, json: bool) -> Result<()> {
    let mut events = orchestrator.registry().subscribe();
    let worker = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_queue_worker().await }
    });
    if !json {
        println!("{}", "Queue worker running, press Ctrl-C to stop".dimmed());
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            Some(event) = events.recv() => render(&event, json, true),
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if until_empty => {
                let stats = orchestrator.queue().stats().await;
                if stats.pending == 0 && stats.running == 0 && orchestrator.registry().running().await.is_empty() {
                    break;
                }
            }
        }
    }

    orchestrator.shutdown().await;
    while let Some(event) = events.try_recv() {
        render(&event, json, true);
    }
    worker.await.context("Queue worker panicked")?;
    Ok(())
}
