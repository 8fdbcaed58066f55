use crate::error::CoreResult;
use crate::paths::validate_segment;
use std::path::{Path, PathBuf};

/// Filesystem layout of one annotation project.
///
/// Default layout is `<projects_dir>/<project_id>/{uploads,annotations,dataset}`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project_id: String,
    root: PathBuf,
}

impl ProjectLayout {
    /// Layout for `project_id` under `projects_dir`. The id must be a single
    /// path segment.
    pub fn new(projects_dir: &Path, project_id: &str) -> CoreResult<Self> {
        validate_segment(project_id, "project id")?;
        Ok(Self { project_id: project_id.to_string(), root: projects_dir.join(project_id) })
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    #[must_use]
    pub fn annotations_dir(&self) -> PathBuf {
        self.root.join("annotations")
    }

    /// Annotation file for an uploaded image: `annotations/<image file>.json`.
    #[must_use]
    pub fn annotation_file(&self, image_file: &str) -> PathBuf {
        self.annotations_dir().join(format!("{image_file}.json"))
    }

    /// Project configuration (class mapping lives here).
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    #[must_use]
    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join("dataset")
    }

    #[must_use]
    pub fn dataset_manifest(&self) -> PathBuf {
        self.dataset_dir().join("data.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp.path(), "fish").unwrap();

        assert!(layout.uploads_dir().ends_with("fish/uploads"));
        assert!(layout.annotation_file("a.jpg").ends_with("fish/annotations/a.jpg.json"));
        assert!(layout.dataset_manifest().ends_with("fish/dataset/data.yaml"));
    }

    #[test]
    fn test_layout_rejects_traversal_id() {
        let temp = TempDir::new().unwrap();
        assert!(ProjectLayout::new(temp.path(), "../etc").is_err());
    }
}
