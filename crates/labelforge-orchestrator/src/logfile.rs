//! Per-project training log files.
//!
//! Each line is `[<rfc3339 time>] [<kind>] <message>`. Sessions are framed by
//! a header and footer, and a file that grew past the size limit is renamed
//! to `<project>_train_<millis>.log` before the next session or line.

use crate::process::LogEntry;
use chrono::{DateTime, SecondsFormat, Utc};
use labelforge_training::LogKind;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const BANNER_WIDTH: usize = 60;

/// `<log_dir>/<project>_train.log`
#[must_use]
pub fn log_file_path(log_dir: &Path, project_id: &str) -> PathBuf {
    log_dir.join(format!("{project_id}_train.log"))
}

/// Render one entry as a log file line (without the newline).
#[must_use]
pub fn format_line(entry: &LogEntry) -> String {
    format!(
        "[{}] [{}] {}",
        entry.time.to_rfc3339_opts(SecondsFormat::Millis, true),
        entry.kind,
        entry.message
    )
}

/// Parse a line written by [`format_line`]. Banner lines and anything else
/// without a leading timestamp yield `None`.
#[must_use]
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let rest = line.strip_prefix('[')?;
    let (time, rest) = rest.split_once(']')?;
    let time = DateTime::parse_from_rfc3339(time).ok()?.with_timezone(&Utc);
    let rest = rest.trim_start();

    let (kind, message) = rest
        .strip_prefix('[')
        .and_then(|r| r.split_once(']'))
        .and_then(|(kind, message)| parse_kind(kind).map(|k| (k, message.strip_prefix(' ').unwrap_or(message))))
        .unwrap_or((LogKind::Stdout, rest));

    Some(LogEntry { time, kind, message: message.to_string() })
}

fn parse_kind(kind: &str) -> Option<LogKind> {
    serde_json::from_value(serde_json::Value::String(kind.to_ascii_lowercase())).ok()
}

/// Appends to a project's log file, rotating it when it is too large.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
    max_bytes: u64,
}

impl LogFile {
    #[must_use]
    pub fn new(log_dir: &Path, project_id: &str, max_bytes: u64) -> Self {
        Self { path: log_file_path(log_dir, project_id), max_bytes }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a new session block.
    pub async fn write_header(&self, project_id: &str) -> io::Result<()> {
        let rule = "=".repeat(BANNER_WIDTH);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.append(&format!(
            "\n{rule}\nTraining Session Started: {now}\nProject ID: {project_id}\n{rule}\n"
        ))
        .await
    }

    /// Close the current session block.
    pub async fn write_footer(&self, status: &str) -> io::Result<()> {
        let rule = "=".repeat(BANNER_WIDTH);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.append(&format!("{rule}\nTraining Session Ended: {now}\nStatus: {status}\n{rule}\n")).await
    }

    pub async fn write_entry(&self, entry: &LogEntry) -> io::Result<()> {
        self.append(&format!("{}\n", format_line(entry))).await
    }

    async fn append(&self, text: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.rotate_if_needed().await?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    /// Rename the file aside when it exceeds the size limit.
    ///
    /// Returns the rotated path when a rotation happened.
    pub async fn rotate_if_needed(&self) -> io::Result<Option<PathBuf>> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if size <= self.max_bytes {
            return Ok(None);
        }

        let stem = self.path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let rotated = self.path.with_file_name(format!("{stem}_{}.log", Utc::now().timestamp_millis()));
        match fs::rename(&self.path, &rotated).await {
            Ok(()) => {}
            // A concurrent writer rotated it first.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
        debug!(from = %self.path.display(), to = %rotated.display(), "Rotated training log");
        Ok(Some(rotated))
    }

    /// The last `limit` parseable entries of the current file. A missing file
    /// has no entries.
    pub async fn read_tail(&self, limit: usize) -> io::Result<Vec<LogEntry>> {
        let content = match fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let entries: Vec<LogEntry> = content.lines().filter_map(parse_line).collect();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Size in bytes and number of lines, or `None` when the file is missing.
    pub async fn size_and_lines(&self) -> Option<(u64, usize)> {
        let bytes = fs::read(&self.path).await.ok()?;
        let lines = bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
        Some((bytes.len() as u64, lines))
    }

    /// Log a failed write instead of failing; file logging never breaks a run.
    pub(crate) fn warn_on_error(&self, what: &str, result: io::Result<()>) {
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to write training log {what}");
        }
    }
}
