//! Classification of the training program's output.
//!
//! Stdout lines starting with [`JSON_LOG_PREFIX`] carry a JSON object of
//! metrics. Other stdout lines are plain logs, but the usual ultralytics
//! progress and validation rows are also mined for metrics. Stderr lines are
//! checked for known GPU failure patterns.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Marker for structured metric lines on stdout.
pub const JSON_LOG_PREFIX: &str = "__JSON_LOG__";

// epoch/total  gpu_mem  box_loss  cls_loss  dfl_loss ...
static EPOCH_ROW: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)/(\d+)\s+([\d.]+G)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)").ok());

// all  images  instances  P  R  mAP50  mAP50-95
static VALIDATION_ROW: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^all\s+\d+\s+\d+\s+[\d.]+\s+[\d.]+\s+([\d.]+)\s+([\d.]+)").ok());

/// Category of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
    /// Written by the orchestrator itself (start, exit code, retries).
    System,
    /// Human readable metric summary.
    Metric,
    Error,
    /// Hint that follows a recognised failure.
    Suggestion,
}

impl LogKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
            Self::Metric => "metric",
            Self::Error => "error",
            Self::Suggestion => "suggestion",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric fields reported for one epoch (or for the latest epoch when
/// `epoch` is `None`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricUpdate {
    pub epoch: Option<u32>,
    pub values: Map<String, Value>,
}

impl MetricUpdate {
    fn from_object(mut values: Map<String, Value>) -> Self {
        let epoch = values
            .remove("epoch")
            .and_then(|v| v.as_u64())
            .and_then(|e| u32::try_from(e).ok());
        Self { epoch, values }
    }
}

/// What a stdout line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutLine {
    Blank,
    /// A structured metric line, with an optional summary for the log.
    Structured { update: MetricUpdate, summary: Option<String> },
    /// The marker was present but the payload was not a JSON object.
    Malformed { payload: String },
    /// A plain log line plus any metrics recognised in it.
    Plain { text: String, metrics: Vec<MetricUpdate> },
}

/// Classify one stdout line.
#[must_use]
pub fn parse_stdout_line(line: &str) -> StdoutLine {
    if line.trim().is_empty() {
        return StdoutLine::Blank;
    }

    if let Some(payload) = line.strip_prefix(JSON_LOG_PREFIX) {
        return match serde_json::from_str::<Map<String, Value>>(payload.trim()) {
            Ok(object) => {
                let summary = summarize_event(&object);
                StdoutLine::Structured { update: MetricUpdate::from_object(object), summary }
            }
            Err(_) => StdoutLine::Malformed { payload: payload.to_string() },
        };
    }

    let text = line.trim().to_string();
    let metrics = parse_epoch_row(&text).into_iter().chain(parse_validation_row(&text)).collect();
    StdoutLine::Plain { text, metrics }
}

fn format_number(value: Option<&Value>) -> String {
    value.and_then(Value::as_f64).map_or_else(|| "--".to_string(), |v| format!("{v:.4}"))
}

fn summarize_event(object: &Map<String, Value>) -> Option<String> {
    match object.get("event").and_then(Value::as_str)? {
        "epoch_end" => Some(format!(
            "Epoch {}/{}: box_loss={}, mAP50={}",
            object.get("epoch").map_or_else(|| "?".to_string(), ToString::to_string),
            object.get("epochs").map_or_else(|| "?".to_string(), ToString::to_string),
            format_number(object.get("box_loss")),
            format_number(object.get("mAP50")),
        )),
        "validation_complete" => {
            let metrics = object.get("metrics");
            Some(format!(
                "Validation complete - mAP50: {}, Precision: {}",
                format_number(metrics.and_then(|m| m.get("mAP50"))),
                format_number(metrics.and_then(|m| m.get("precision"))),
            ))
        }
        _ => None,
    }
}

/// Parse an ultralytics training progress row such as
/// `3/100  2.1G  1.234  0.567  0.890  12  640`.
#[must_use]
pub fn parse_epoch_row(line: &str) -> Option<MetricUpdate> {
    let caps = EPOCH_ROW.as_ref()?.captures(line)?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok()).map(Value::from);

    let mut values = Map::new();
    let total: Option<u64> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    values.insert("totalEpochs".to_string(), total.map_or(Value::Null, Value::from));
    values.insert("gpu_mem".to_string(), Value::from(caps.get(3)?.as_str()));
    values.insert("box_loss".to_string(), number(4)?);
    values.insert("cls_loss".to_string(), number(5)?);
    values.insert("dfl_loss".to_string(), number(6)?);

    let epoch = caps.get(1)?.as_str().parse().ok();
    Some(MetricUpdate { epoch, values })
}

/// Parse a validation summary row such as
/// `all  20  40  0.91  0.88  0.934  0.712`.
#[must_use]
pub fn parse_validation_row(line: &str) -> Option<MetricUpdate> {
    let caps = VALIDATION_ROW.as_ref()?.captures(line)?;
    let map50: f64 = caps.get(1)?.as_str().parse().ok()?;
    let map50_95: f64 = caps.get(2)?.as_str().parse().ok()?;

    let mut values = Map::new();
    values.insert("mAP50".to_string(), Value::from(map50));
    values.insert("mAP50_95".to_string(), Value::from(map50_95));
    Some(MetricUpdate { epoch: None, values })
}

/// Known failure patterns on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StderrIssue {
    OutOfMemory,
    NoGpu,
    Cuda,
}

impl StderrIssue {
    /// Recognise a failure pattern; checked in order OOM, missing GPU, CUDA.
    #[must_use]
    pub fn classify(line: &str) -> Option<Self> {
        let lower = line.to_lowercase();
        if is_out_of_memory(&lower) {
            Some(Self::OutOfMemory)
        } else if lower.contains("no cuda gpu") || lower.contains("no gpu") || lower.contains("cuda is not available") {
            Some(Self::NoGpu)
        } else if lower.contains("cuda") && (lower.contains("error") || lower.contains("failed")) {
            Some(Self::Cuda)
        } else {
            None
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OutOfMemory => "Out of GPU memory",
            Self::NoGpu => "GPU unavailable",
            Self::Cuda => "CUDA error",
        }
    }

    #[must_use]
    pub fn suggestions(self) -> &'static [&'static str] {
        match self {
            Self::OutOfMemory => &["reduce the batch size", "reduce imgsz", "try a smaller model"],
            Self::NoGpu => &["check that the NVIDIA driver is installed", "set device to cpu"],
            Self::Cuda => &[
                "the CUDA version may not match the installed driver",
                "update the NVIDIA driver",
            ],
        }
    }
}

fn is_out_of_memory(lower: &str) -> bool {
    lower.contains("out of memory")
        || lower.contains("cudamalloc")
        || lower.split(|c: char| !c.is_ascii_alphanumeric()).any(|word| word == "oom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_line() {
        let line = r#"__JSON_LOG__{"event": "epoch_end", "epoch": 3, "epochs": 10, "box_loss": 1.5, "mAP50": 0.25}"#;
        let StdoutLine::Structured { update, summary } = parse_stdout_line(line) else {
            panic!("expected structured line");
        };
        assert_eq!(update.epoch, Some(3));
        assert_eq!(update.values["box_loss"], 1.5);
        assert!(!update.values.contains_key("epoch"));
        assert_eq!(summary.as_deref(), Some("Epoch 3/10: box_loss=1.5000, mAP50=0.2500"));
    }

    #[test]
    fn test_malformed_structured_line() {
        assert!(matches!(parse_stdout_line("__JSON_LOG__{oops"), StdoutLine::Malformed { .. }));
        assert!(matches!(parse_stdout_line("__JSON_LOG__[1, 2]"), StdoutLine::Malformed { .. }));
    }

    #[test]
    fn test_blank_and_plain_lines() {
        assert_eq!(parse_stdout_line("   "), StdoutLine::Blank);
        assert_eq!(
            parse_stdout_line("  Loading weights  "),
            StdoutLine::Plain { text: "Loading weights".to_string(), metrics: vec![] }
        );
    }

    #[test]
    fn test_epoch_row() {
        let update = parse_epoch_row("5/100      2.31G      1.234      0.567      0.891         12        640").unwrap();
        assert_eq!(update.epoch, Some(5));
        assert_eq!(update.values["gpu_mem"], "2.31G");
        assert_eq!(update.values["cls_loss"], 0.567);
        assert_eq!(update.values["totalEpochs"], 100);
    }

    #[test]
    fn test_validation_row() {
        let StdoutLine::Plain { metrics, .. } =
            parse_stdout_line("                   all         20         40      0.912      0.884      0.934      0.712")
        else {
            panic!("expected plain line");
        };
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].epoch, None);
        assert_eq!(metrics[0].values["mAP50_95"], 0.712);
    }

    #[test]
    fn test_stderr_classification() {
        assert_eq!(
            StderrIssue::classify("RuntimeError: CUDA out of memory. Tried to allocate"),
            Some(StderrIssue::OutOfMemory)
        );
        assert_eq!(StderrIssue::classify("torch: OOM when allocating"), Some(StderrIssue::OutOfMemory));
        assert_eq!(StderrIssue::classify("No CUDA GPUs are available"), Some(StderrIssue::NoGpu));
        assert_eq!(StderrIssue::classify("CUDA error: device-side assert"), Some(StderrIssue::Cuda));
        assert_eq!(StderrIssue::classify("loading room.jpg"), None);
        assert!(!StderrIssue::OutOfMemory.suggestions().is_empty());
    }
}
