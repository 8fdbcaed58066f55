//! Plain-text training report.

use crate::process::{LogEntry, Metric, ProcessState};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

const WIDE: usize = 80;
const NARROW: usize = 40;

fn time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn loss(metric: &Metric, key: &str) -> String {
    metric.number(key).map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn percent(metric: &Metric, key: &str) -> String {
    metric.number(key).map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v * 100.0))
}

/// Render the report for `state` with the given (already merged) log lines.
#[must_use]
pub fn render(state: &ProcessState, logs: &[LogEntry], now: DateTime<Utc>) -> String {
    let wide = "=".repeat(WIDE);
    let narrow = "-".repeat(NARROW);
    let mut out = String::new();

    let _ = writeln!(out, "{wide}\nTraining Log Report\n{wide}\n");

    let _ = writeln!(out, "Summary\n{narrow}");
    let _ = writeln!(out, "Project: {}", state.project_id);
    if let Some(run) = &state.run_name {
        let _ = writeln!(out, "Run: {run}");
    }
    let _ = writeln!(out, "Exported: {}", time(now));
    let _ = writeln!(out, "Status: {}", state.status);
    if let Some(start) = state.start_time {
        let _ = writeln!(out, "Started: {}", time(start));
        if let Some(end) = state.end_time {
            let _ = writeln!(out, "Ended: {}", time(end));
            let secs = (end - start).num_seconds().max(0);
            let _ = writeln!(out, "Duration: {}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60);
        }
    }
    out.push('\n');

    if !state.metrics.is_empty() {
        let _ = writeln!(out, "Metrics\n{narrow}");
        let header = format!("{:<8}{:<14}{:<14}{:<12}{:<12}", "Epoch", "box_loss", "cls_loss", "mAP50", "mAP50-95");
        let _ = writeln!(out, "{}\n{}", header.trim_end(), "-".repeat(header.len()));
        for m in &state.metrics {
            let row = format!(
                "{:<8}{:<14}{:<14}{:<12}{:<12}",
                m.epoch,
                loss(m, "box_loss"),
                loss(m, "cls_loss"),
                percent(m, "mAP50"),
                percent(m, "mAP50_95"),
            );
            let _ = writeln!(out, "{}", row.trim_end());
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Logs\n{narrow}");
    for entry in logs {
        let _ = writeln!(
            out,
            "[{}] [{}] {}",
            time(entry.time),
            entry.kind.as_str().to_uppercase(),
            entry.message
        );
    }

    let _ = write!(out, "\n{wide}\nEnd of Report\n{wide}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessStatus;
    use labelforge_training::LogKind;
    use serde_json::{Map, Value};

    #[test]
    fn test_report_sections() {
        let start = Utc::now();
        let mut values = Map::new();
        values.insert("box_loss".into(), Value::from(1.23456));
        values.insert("mAP50".into(), Value::from(0.9));

        let state = ProcessState {
            project_id: "fish".into(),
            status: ProcessStatus::Completed,
            start_time: Some(start),
            end_time: Some(start + chrono::Duration::seconds(3725)),
            metrics: vec![Metric { epoch: 1, values, time: start }],
            ..ProcessState::default()
        };
        let logs = vec![LogEntry { time: start, kind: LogKind::System, message: "started".into() }];

        let report = render(&state, &logs, start);
        assert!(report.starts_with(&"=".repeat(80)));
        assert!(report.contains("Project: fish"));
        assert!(report.contains("Duration: 1h 2m 5s"));
        assert!(report.contains("1.2346"));
        assert!(report.contains("90.00%"));
        assert!(report.contains("[SYSTEM] started"));
        assert!(report.ends_with(&"=".repeat(80)));
    }
}
