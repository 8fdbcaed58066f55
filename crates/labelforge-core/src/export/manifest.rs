//! The `data.yaml` dataset manifest.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Left/right keypoint pairs of the 17-point body skeleton used by the editor.
/// Points 1 and 2 sit on the midline and map to themselves.
const BODY_FLIP_IDX: [usize; 17] = [0, 1, 2, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15];

/// Dataset manifest consumed by the training program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Dataset root, forward-slash separated.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    pub kpt_shape: [usize; 2],
    pub flip_idx: Vec<usize>,
    pub names: BTreeMap<u32, String>,
}

impl DatasetManifest {
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        debug!(path = %path.display(), "Wrote dataset manifest");
        Ok(())
    }

    pub fn read(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Horizontal flip permutation: body pairs for 17 keypoints, identity otherwise.
#[must_use]
pub fn flip_idx(num_keypoints: usize) -> Vec<usize> {
    if num_keypoints == BODY_FLIP_IDX.len() {
        BODY_FLIP_IDX.to_vec()
    } else {
        (0..num_keypoints).collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectConfig {
    /// Either `{"0": "name", ...}` or `["name", ...]`.
    #[serde(default)]
    class_mapping: serde_json::Value,
}

impl ProjectConfig {
    fn class_name(&self, index: u32) -> Option<&str> {
        match &self.class_mapping {
            serde_json::Value::Object(map) => map.get(&index.to_string())?.as_str(),
            serde_json::Value::Array(items) => items.get(usize::try_from(index).ok()?)?.as_str(),
            _ => None,
        }
    }
}

/// Build `index -> name` for classes `0..=max_class`.
///
/// Names come from the project's `config.json` `classMapping`; a missing
/// file, entry or blank name falls back to `class_<i>`. Names are trimmed and
/// inner whitespace runs become `_`.
#[must_use]
pub fn class_names(config_file: &Path, max_class: u32) -> BTreeMap<u32, String> {
    let config = std::fs::read(config_file)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<ProjectConfig>(&bytes).ok());

    (0..=max_class)
        .map(|i| {
            let name = config
                .as_ref()
                .and_then(|c| c.class_name(i))
                .map(sanitize_class_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("class_{i}"));
            (i, name)
        })
        .collect()
}

fn sanitize_class_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flip_idx() {
        assert_eq!(flip_idx(17)[1], 1);
        assert_eq!(flip_idx(17)[3], 4);
        assert_eq!(flip_idx(17)[16], 15);
        assert_eq!(flip_idx(4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_class_names_from_config() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.json");
        std::fs::write(
            &config,
            r#"{"classMapping": {"0": "  red   fish ", "1": "", "2": 7}}"#,
        )
        .unwrap();

        let names = class_names(&config, 3);
        assert_eq!(names[&0], "red_fish");
        assert_eq!(names[&1], "class_1");
        assert_eq!(names[&2], "class_2");
        assert_eq!(names[&3], "class_3");
    }

    #[test]
    fn test_class_names_from_array_mapping() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.json");
        std::fs::write(&config, r#"{"classMapping": ["cat", "big dog"]}"#).unwrap();

        let names = class_names(&config, 1);
        assert_eq!(names[&1], "big_dog");
    }

    #[test]
    fn test_class_names_without_config() {
        let names = class_names(Path::new("/nonexistent/config.json"), 0);
        assert_eq!(names.len(), 1);
        assert_eq!(names[&0], "class_0");
    }

    #[test]
    fn test_manifest_omits_empty_splits() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.yaml");
        let manifest = DatasetManifest {
            path: "/data/set".to_string(),
            train: Some("images/train".to_string()),
            val: None,
            test: None,
            kpt_shape: [17, 3],
            flip_idx: flip_idx(17),
            names: class_names(Path::new("missing"), 0),
        };
        manifest.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("train: images/train"));
        assert!(!text.contains("val:"));
        assert!(!text.contains("test:"));
        assert_eq!(DatasetManifest::read(&path).unwrap(), manifest);
    }
}
