//! Annotation records as stored by the annotation editor.

use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::debug;

/// Kind of an annotation record. Anything the export does not understand is
/// kept as `Other` and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Bbox,
    Keypoint,
    #[serde(other)]
    Other,
}

/// One record in pixel coordinates of its image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub class_index: Option<u32>,
    #[serde(default)]
    pub keypoint_index: Option<usize>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub parent_id: Option<String>,
}

impl AnnotationRecord {
    #[must_use]
    pub fn is_bbox(&self) -> bool {
        self.kind == AnnotationKind::Bbox
    }

    #[must_use]
    pub fn is_keypoint(&self) -> bool {
        self.kind == AnnotationKind::Keypoint
    }

    #[must_use]
    pub fn class_index(&self) -> u32 {
        self.class_index.unwrap_or(0)
    }

    #[must_use]
    pub fn keypoint_index(&self) -> usize {
        self.keypoint_index.unwrap_or(0)
    }
}

/// Ids are written as strings by the editor but older files carry numbers.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.and_then(|raw| match raw {
        RawId::Text(s) if s.is_empty() => None,
        RawId::Text(s) => Some(s),
        RawId::Int(n) => Some(n.to_string()),
        RawId::Float(f) => Some(f.to_string()),
    }))
}

/// Load the records for one image.
///
/// A missing file means "no annotations". An unreadable or malformed file is
/// logged and also treated as empty so one bad file never aborts an export.
#[must_use]
pub fn load_annotations(path: &Path) -> Vec<AnnotationRecord> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read annotation file");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<AnnotationRecord>>(&bytes) {
        Ok(records) => records,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to parse annotation file");
            Vec::new()
        }
    }
}

/// True when the records contain at least one bbox or keypoint.
#[must_use]
pub fn has_shapes(records: &[AnnotationRecord]) -> bool {
    records.iter().any(|r| r.is_bbox() || r.is_keypoint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_mixed_records() {
        let json = r#"[
            {"type": "bbox", "id": "b1", "x": 10, "y": 20, "width": 30, "height": 40, "classIndex": 2},
            {"type": "keypoint", "id": 7, "x": 15.5, "y": 25, "keypointIndex": 3, "parentId": "b1"},
            {"type": "polygon", "id": "p1", "points": [[0, 0]]}
        ]"#;
        let records: Vec<AnnotationRecord> = serde_json::from_str(json).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records[0].is_bbox());
        assert_eq!(records[0].class_index(), 2);
        assert_eq!(records[1].id.as_deref(), Some("7"));
        assert_eq!(records[1].parent_id.as_deref(), Some("b1"));
        assert_eq!(records[1].keypoint_index(), 3);
        assert_eq!(records[2].kind, AnnotationKind::Other);
    }

    #[test]
    fn test_null_parent_is_none() {
        let json = r#"[{"type": "keypoint", "x": 1, "y": 2, "parentId": null}]"#;
        let records: Vec<AnnotationRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].parent_id, None);
        assert_eq!(records[0].keypoint_index(), 0);
    }

    #[test]
    fn test_load_missing_and_corrupt_files() {
        let temp = TempDir::new().unwrap();
        assert!(load_annotations(&temp.path().join("missing.json")).is_empty());

        let bad = temp.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(load_annotations(&bad).is_empty());
    }

    #[test]
    fn test_has_shapes() {
        let records: Vec<AnnotationRecord> =
            serde_json::from_str(r#"[{"type": "note"}]"#).unwrap();
        assert!(!has_shapes(&records));
    }
}
