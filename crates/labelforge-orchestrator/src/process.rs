//! Per-project process state: status, bounded logs and per-epoch metrics.
//!
//! The registry is shared by the orchestrator and its readers. Every mutation
//! is published on a broadcast channel; subscribers can filter on a project.

use crate::logfile::LogFile;
use crate::report;
use chrono::{DateTime, SubsecRound, Utc};
use labelforge_training::{LogKind, MetricUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Status of a project's training process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ProcessStatus {
    /// Starting or running.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    #[serde(rename = "msg")]
    pub message: String,
}

impl LogEntry {
    /// Entry stamped now, at millisecond precision so it matches what the
    /// log file stores.
    #[must_use]
    pub fn now(kind: LogKind, message: impl Into<String>) -> Self {
        Self { time: Utc::now().trunc_subsecs(3), kind, message: message.into() }
    }
}

/// Metrics recorded for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub epoch: u32,
    #[serde(flatten)]
    pub values: Map<String, Value>,
    pub time: DateTime<Utc>,
}

impl Metric {
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }
}

/// Snapshot of a project's process state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    pub project_id: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub run_name: Option<String>,
    pub logs: VecDeque<LogEntry>,
    pub metrics: Vec<Metric>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ProcessState {
    fn new(project_id: &str) -> Self {
        Self { project_id: project_id.to_string(), ..Self::default() }
    }
}

/// Registry notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    StatusChange { project_id: String, status: ProcessStatus },
    /// The tracked process id changed (`None` once the process is gone).
    Pid { project_id: String, pid: Option<u32> },
    Log { project_id: String, entry: LogEntry },
    Metric { project_id: String, metric: Metric },
}

impl ProcessEvent {
    #[must_use]
    pub fn project_id(&self) -> &str {
        match self {
            Self::StatusChange { project_id, .. }
            | Self::Pid { project_id, .. }
            | Self::Log { project_id, .. }
            | Self::Metric { project_id, .. } => project_id,
        }
    }
}

/// Receiver of registry events, optionally limited to one project.
#[derive(Debug)]
pub struct ProcessSubscription {
    rx: broadcast::Receiver<ProcessEvent>,
    project_id: Option<String>,
}

impl ProcessSubscription {
    /// Next matching event, or `None` once the registry is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.project_id.as_deref().is_none_or(|p| p == event.project_id()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Process event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ProcessEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.project_id.as_deref().is_none_or(|p| p == event.project_id()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Process event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Log statistics for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub memory_log_count: usize,
    pub file_size: u64,
    pub file_line_count: usize,
    pub log_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct FileSink {
    dir: PathBuf,
    max_bytes: u64,
}

/// Per-project process state shared by the orchestrator and its readers.
#[derive(Debug)]
pub struct ProcessRegistry {
    states: Mutex<HashMap<String, ProcessState>>,
    events: broadcast::Sender<ProcessEvent>,
    max_memory_logs: usize,
    files: Option<FileSink>,
}

impl ProcessRegistry {
    /// Create a registry that keeps at most `max_memory_logs` lines per
    /// project and writes no log files.
    #[must_use]
    pub fn new(max_memory_logs: usize) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { states: Mutex::new(HashMap::new()), events, max_memory_logs: max_memory_logs.max(1), files: None }
    }

    /// Also persist every line under `dir`, rotating files above `max_bytes`.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        self.files = Some(FileSink { dir: dir.into(), max_bytes });
        self
    }

    #[must_use]
    pub fn max_memory_logs(&self) -> usize {
        self.max_memory_logs
    }

    /// Events for every project.
    pub fn subscribe(&self) -> ProcessSubscription {
        ProcessSubscription { rx: self.events.subscribe(), project_id: None }
    }

    /// Events for one project.
    pub fn subscribe_project(&self, project_id: &str) -> ProcessSubscription {
        ProcessSubscription { rx: self.events.subscribe(), project_id: Some(project_id.to_string()) }
    }

    fn log_file(&self, project_id: &str) -> Option<LogFile> {
        self.files.as_ref().map(|sink| LogFile::new(&sink.dir, project_id, sink.max_bytes))
    }

    /// Path of the project's log file, if file logging is enabled.
    #[must_use]
    pub fn log_file_path(&self, project_id: &str) -> Option<PathBuf> {
        self.log_file(project_id).map(|f| f.path().to_path_buf())
    }

    fn emit(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }

    /// Reset a project's state for a new run and open a log file session.
    pub async fn begin_run(&self, project_id: &str, run_name: &str) {
        let mut states = self.states.lock().await;
        let mut state = ProcessState::new(project_id);
        state.run_name = Some(run_name.to_string());
        states.insert(project_id.to_string(), state);
        drop(states);

        if let Some(file) = self.log_file(project_id) {
            file.warn_on_error("header", file.write_header(project_id).await);
        }
        debug!(project_id, run_name, "Process state reset for new run");
    }

    /// Set the status. Running stamps the start time; terminal statuses
    /// stamp the end time and close the log file session.
    pub async fn set_status(&self, project_id: &str, status: ProcessStatus) {
        let mut states = self.states.lock().await;
        let state = states.entry(project_id.to_string()).or_insert_with(|| ProcessState::new(project_id));
        Self::apply_status(state, status);
        drop(states);
        self.after_status(project_id, status).await;
    }

    /// Set a terminal status unless the run was already stopped.
    ///
    /// Returns the status the project ends up with.
    pub async fn finish(&self, project_id: &str, status: ProcessStatus) -> ProcessStatus {
        let mut states = self.states.lock().await;
        let state = states.entry(project_id.to_string()).or_insert_with(|| ProcessState::new(project_id));
        if state.status == ProcessStatus::Stopped {
            return ProcessStatus::Stopped;
        }
        Self::apply_status(state, status);
        drop(states);
        self.after_status(project_id, status).await;
        status
    }

    fn apply_status(state: &mut ProcessState, status: ProcessStatus) {
        state.status = status;
        match status {
            ProcessStatus::Running => {
                state.start_time = Some(Utc::now());
                state.end_time = None;
            }
            s if s.is_terminal() => {
                state.end_time = Some(Utc::now());
                state.pid = None;
            }
            _ => {}
        }
    }

    async fn after_status(&self, project_id: &str, status: ProcessStatus) {
        if status.is_terminal() {
            if let Some(file) = self.log_file(project_id) {
                file.warn_on_error("footer", file.write_footer(status.as_str()).await);
            }
        }
        info!(project_id, status = %status, "Training status changed");
        self.emit(ProcessEvent::StatusChange { project_id: project_id.to_string(), status });
    }

    pub async fn set_pid(&self, project_id: &str, pid: Option<u32>) {
        let mut states = self.states.lock().await;
        states.entry(project_id.to_string()).or_insert_with(|| ProcessState::new(project_id)).pid = pid;
        drop(states);
        self.emit(ProcessEvent::Pid { project_id: project_id.to_string(), pid });
    }

    /// Append a log line, evicting the oldest once the cap is reached.
    pub async fn append_log(&self, project_id: &str, kind: LogKind, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::now(kind, message);
        let mut states = self.states.lock().await;
        let state = states.entry(project_id.to_string()).or_insert_with(|| ProcessState::new(project_id));
        while state.logs.len() >= self.max_memory_logs {
            state.logs.pop_front();
        }
        state.logs.push_back(entry.clone());
        drop(states);

        if let Some(file) = self.log_file(project_id) {
            file.warn_on_error("line", file.write_entry(&entry).await);
        }
        self.emit(ProcessEvent::Log { project_id: project_id.to_string(), entry: entry.clone() });
        entry
    }

    /// Merge metric values into the entry for their epoch.
    ///
    /// An update without an epoch belongs to the latest recorded epoch (or
    /// epoch 0 when none exists yet).
    pub async fn upsert_metric(&self, project_id: &str, update: MetricUpdate) -> Metric {
        let mut states = self.states.lock().await;
        let state = states.entry(project_id.to_string()).or_insert_with(|| ProcessState::new(project_id));
        let epoch = update.epoch.or_else(|| state.metrics.last().map(|m| m.epoch)).unwrap_or(0);

        let metric = match state.metrics.binary_search_by_key(&epoch, |m| m.epoch) {
            Ok(index) => {
                let existing = &mut state.metrics[index];
                existing.values.extend(update.values);
                existing.time = Utc::now();
                existing.clone()
            }
            Err(index) => {
                let metric = Metric { epoch, values: update.values, time: Utc::now() };
                state.metrics.insert(index, metric.clone());
                metric
            }
        };
        drop(states);

        self.emit(ProcessEvent::Metric { project_id: project_id.to_string(), metric: metric.clone() });
        metric
    }

    /// The most recent `limit` log lines (all of them when `None`).
    pub async fn logs(&self, project_id: &str, limit: Option<usize>) -> Vec<LogEntry> {
        let states = self.states.lock().await;
        let Some(state) = states.get(project_id) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |l| state.logs.len().saturating_sub(l));
        state.logs.iter().skip(skip).cloned().collect()
    }

    pub async fn metrics(&self, project_id: &str) -> Vec<Metric> {
        self.states.lock().await.get(project_id).map(|s| s.metrics.clone()).unwrap_or_default()
    }

    /// Current state; a project never seen before is idle.
    pub async fn snapshot(&self, project_id: &str) -> ProcessState {
        self.states.lock().await.get(project_id).cloned().unwrap_or_else(|| ProcessState::new(project_id))
    }

    pub async fn status(&self, project_id: &str) -> ProcessStatus {
        self.states.lock().await.get(project_id).map(|s| s.status).unwrap_or_default()
    }

    /// Projects with a starting or running process.
    pub async fn running(&self) -> Vec<String> {
        let states = self.states.lock().await;
        let mut ids: Vec<String> =
            states.values().filter(|s| s.status.is_active()).map(|s| s.project_id.clone()).collect();
        ids.sort();
        ids
    }

    /// Every known project, sorted by id.
    pub async fn all(&self) -> Vec<ProcessState> {
        let states = self.states.lock().await;
        let mut all: Vec<ProcessState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        all
    }

    /// Forget a project's in-memory state. Log files are kept.
    pub async fn clear(&self, project_id: &str) -> bool {
        self.states.lock().await.remove(project_id).is_some()
    }

    /// The last `limit` entries of the project's log file.
    pub async fn read_log_file(&self, project_id: &str, limit: usize) -> std::io::Result<Vec<LogEntry>> {
        match self.log_file(project_id) {
            Some(file) => file.read_tail(limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Case-insensitive search over in-memory logs, or over the log file
    /// when `from_file` is set.
    pub async fn search_logs(&self, project_id: &str, keyword: &str, from_file: bool) -> std::io::Result<Vec<LogEntry>> {
        let needle = keyword.to_lowercase();
        let source = if from_file {
            self.read_log_file(project_id, usize::MAX).await?
        } else {
            self.logs(project_id, None).await
        };
        Ok(source.into_iter().filter(|e| e.message.to_lowercase().contains(&needle)).collect())
    }

    /// In-memory logs with `from <= time <= to`.
    pub async fn logs_in_range(&self, project_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<LogEntry> {
        self.logs(project_id, None).await.into_iter().filter(|e| e.time >= from && e.time <= to).collect()
    }

    pub async fn log_stats(&self, project_id: &str) -> LogStats {
        let memory_log_count = self.states.lock().await.get(project_id).map_or(0, |s| s.logs.len());
        let file = self.log_file(project_id);
        let sizes = match &file {
            Some(file) => file.size_and_lines().await,
            None => None,
        };
        let (file_size, file_line_count) = sizes.unwrap_or((0, 0));
        LogStats { memory_log_count, file_size, file_line_count, log_file_path: file.map(|f| f.path().to_path_buf()) }
    }

    /// Plain-text report: summary, metrics table and every known log line
    /// (file and memory merged, duplicates dropped, oldest first).
    pub async fn export_report(&self, project_id: &str) -> String {
        let state = self.snapshot(project_id).await;
        let file_logs = match self.read_log_file(project_id, 10_000).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(project_id, error = %e, "Could not read training log file for report");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut merged: Vec<LogEntry> = file_logs
            .into_iter()
            .chain(state.logs.iter().cloned())
            .filter(|e| seen.insert((e.time, e.message.clone())))
            .collect();
        merged.sort_by_key(|e| e.time);

        report::render(&state, &merged, Utc::now())
    }

    /// Write the report to `path`, creating parent directories. Returns the
    /// number of bytes written.
    pub async fn save_report(&self, project_id: &str, path: &Path) -> std::io::Result<usize> {
        let content = self.export_report(project_id).await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &content).await?;
        info!(project_id, path = %path.display(), "Training report exported");
        Ok(content.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn update(epoch: Option<u32>, key: &str, value: f64) -> MetricUpdate {
        let mut values = Map::new();
        values.insert(key.to_string(), Value::from(value));
        MetricUpdate { epoch, values }
    }

    #[tokio::test]
    async fn test_log_cap_is_fifo() {
        let registry = ProcessRegistry::new(3);
        for i in 0..5 {
            registry.append_log("fish", LogKind::Stdout, format!("line {i}")).await;
        }
        let logs = registry.logs("fish", None).await;
        let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(registry.logs("fish", Some(1)).await[0].message, "line 4");
    }

    #[tokio::test]
    async fn test_metric_upsert_merges_by_epoch() {
        let registry = ProcessRegistry::new(10);
        registry.upsert_metric("fish", update(Some(2), "box_loss", 1.0)).await;
        registry.upsert_metric("fish", update(Some(1), "box_loss", 2.0)).await;
        registry.upsert_metric("fish", update(Some(2), "mAP50", 0.5)).await;
        registry.upsert_metric("fish", update(None, "mAP50_95", 0.3)).await;

        let metrics = registry.metrics("fish").await;
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].epoch, 1);
        assert_eq!(metrics[1].number("box_loss"), Some(1.0));
        assert_eq!(metrics[1].number("mAP50"), Some(0.5));
        assert_eq!(metrics[1].number("mAP50_95"), Some(0.3));
    }

    #[tokio::test]
    async fn test_metric_without_epoch_on_empty_state_is_epoch_zero() {
        let registry = ProcessRegistry::new(10);
        let metric = registry.upsert_metric("fish", update(None, "mAP50", 0.1)).await;
        assert_eq!(metric.epoch, 0);
    }

    #[tokio::test]
    async fn test_status_times_and_finish() {
        let registry = ProcessRegistry::new(10);
        assert_eq!(registry.status("fish").await, ProcessStatus::Idle);

        registry.set_status("fish", ProcessStatus::Running).await;
        registry.set_pid("fish", Some(42)).await;
        let state = registry.snapshot("fish").await;
        assert!(state.start_time.is_some());
        assert_eq!(state.pid, Some(42));
        assert_eq!(registry.running().await, vec!["fish".to_string()]);

        registry.set_status("fish", ProcessStatus::Stopped).await;
        assert_eq!(registry.finish("fish", ProcessStatus::Completed).await, ProcessStatus::Stopped);
        let state = registry.snapshot("fish").await;
        assert_eq!(state.status, ProcessStatus::Stopped);
        assert!(state.end_time.is_some());
        assert_eq!(state.pid, None);
    }

    #[tokio::test]
    async fn test_project_subscription_filters() {
        let registry = ProcessRegistry::new(10);
        let mut fish = registry.subscribe_project("fish");
        registry.append_log("cat", LogKind::Stdout, "meow").await;
        registry.append_log("fish", LogKind::Stdout, "blub").await;

        match fish.recv().await.unwrap() {
            ProcessEvent::Log { project_id, entry } => {
                assert_eq!(project_id, "fish");
                assert_eq!(entry.message, "blub");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_pid_is_published() {
        let registry = ProcessRegistry::new(10);
        let mut fish = registry.subscribe_project("fish");
        registry.set_pid("fish", Some(4242)).await;
        registry.set_pid("fish", None).await;

        assert_eq!(fish.try_recv(), Some(ProcessEvent::Pid { project_id: "fish".into(), pid: Some(4242) }));
        assert_eq!(fish.try_recv(), Some(ProcessEvent::Pid { project_id: "fish".into(), pid: None }));
        assert_eq!(fish.try_recv(), None);
    }

    #[tokio::test]
    async fn test_begin_run_resets_state() {
        let registry = ProcessRegistry::new(10);
        registry.append_log("fish", LogKind::Stdout, "old").await;
        registry.upsert_metric("fish", update(Some(1), "box_loss", 1.0)).await;

        registry.begin_run("fish", "exp").await;
        let state = registry.snapshot("fish").await;
        assert!(state.logs.is_empty());
        assert!(state.metrics.is_empty());
        assert_eq!(state.run_name.as_deref(), Some("exp"));
    }

    #[tokio::test]
    async fn test_file_logging_search_and_report() {
        let temp = TempDir::new().unwrap();
        let registry = ProcessRegistry::new(10).with_log_dir(temp.path(), 1024 * 1024);

        registry.begin_run("fish", "exp").await;
        registry.set_status("fish", ProcessStatus::Running).await;
        registry.append_log("fish", LogKind::Stdout, "Loading Weights").await;
        registry.append_log("fish", LogKind::Stderr, "CUDA out of memory").await;
        registry.upsert_metric("fish", update(Some(1), "mAP50", 0.5)).await;
        registry.set_status("fish", ProcessStatus::Failed).await;

        let file_logs = registry.read_log_file("fish", 100).await.unwrap();
        assert_eq!(file_logs.len(), 2);

        let hits = registry.search_logs("fish", "weights", true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(registry.search_logs("fish", "MEMORY", false).await.unwrap().len(), 1);

        let stats = registry.log_stats("fish").await;
        assert_eq!(stats.memory_log_count, 2);
        assert!(stats.file_size > 0);

        let report = registry.export_report("fish").await;
        assert_eq!(report.matches("Loading Weights").count(), 1);
        assert!(report.contains("50.00%"));

        let out = temp.path().join("reports").join("fish.txt");
        let written = registry.save_report("fish", &out).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap().len(), written);
    }

    #[tokio::test]
    async fn test_logs_in_range() {
        let registry = ProcessRegistry::new(10);
        let before = Utc::now() - chrono::Duration::seconds(1);
        registry.append_log("fish", LogKind::System, "start").await;
        let after = Utc::now() + chrono::Duration::seconds(1);

        assert_eq!(registry.logs_in_range("fish", before, after).await.len(), 1);
        assert!(registry.logs_in_range("fish", after, after).await.is_empty());
    }
}
