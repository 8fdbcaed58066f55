//! Rendering of training events and orchestrator errors.

use colored::Colorize;
use labelforge_core::ConfigIssue;
use labelforge_orchestrator::{OrchestratorError, ProcessEvent, ProcessStatus};
use labelforge_training::LogKind;
use serde_json::json;

/// Print one event. `with_project` prefixes lines with the project id.
pub fn render(event: &ProcessEvent, json_output: bool, with_project: bool) {
    if json_output {
        let value = match event {
            ProcessEvent::StatusChange { project_id, status } => {
                json!({ "event": "statusChange", "projectId": project_id, "status": status })
            }
            ProcessEvent::Pid { project_id, pid } => json!({ "event": "pid", "projectId": project_id, "pid": pid }),
            ProcessEvent::Log { project_id, entry } => json!({ "event": "log", "projectId": project_id, "log": entry }),
            ProcessEvent::Metric { project_id, metric } => {
                json!({ "event": "metric", "projectId": project_id, "metric": metric })
            }
        };
        println!("{value}");
        return;
    }

    let prefix = if with_project { format!("{} ", format!("[{}]", event.project_id()).dimmed()) } else { String::new() };
    match event {
        ProcessEvent::StatusChange { status, .. } => {
            println!("{prefix}{} {}", "Status:".bold(), status_colored(*status));
        }
        ProcessEvent::Log { entry, .. } => {
            let message = match entry.kind {
                LogKind::Stdout => entry.message.normal(),
                LogKind::Stderr => entry.message.red(),
                LogKind::Error => format!("✗ {}", entry.message).red().bold(),
                LogKind::Suggestion => format!("→ {}", entry.message).yellow(),
                LogKind::System => entry.message.cyan(),
                LogKind::Metric => entry.message.green(),
            };
            println!("{prefix}{message}");
        }
        // The pid is part of the "Training started" line; metric summaries
        // arrive as log lines.
        ProcessEvent::Pid { .. } | ProcessEvent::Metric { .. } => {}
    }
}

pub fn status_colored(status: ProcessStatus) -> colored::ColoredString {
    match status {
        ProcessStatus::Completed => status.as_str().green(),
        ProcessStatus::Failed => status.as_str().red(),
        ProcessStatus::Stopped => status.as_str().yellow(),
        ProcessStatus::Starting | ProcessStatus::Running => status.as_str().cyan(),
        ProcessStatus::Idle => status.as_str().dimmed(),
    }
}

/// Turn an orchestrator error into a user-facing message, listing every
/// field problem for schema failures.
pub fn explain(err: OrchestratorError) -> anyhow::Error {
    match err {
        OrchestratorError::Config(ConfigIssue::Schema(errors)) => {
            let mut message = String::from("Invalid training configuration:");
            for e in errors {
                message.push_str(&format!("\n  - {}: {}", e.field, e.message));
            }
            anyhow::anyhow!(message)
        }
        OrchestratorError::Config(ConfigIssue::OutsideRoot { path, root }) => anyhow::anyhow!(
            "Dataset {} is outside the project directory {} (set allow_external_datasets to permit this)",
            path.display(),
            root.display()
        ),
        other => anyhow::Error::new(other),
    }
}
