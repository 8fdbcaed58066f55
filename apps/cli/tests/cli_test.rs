//! Integration tests for the `labelforge` binary.
//!
//! Every test runs with HOME and the working directory pointed at a temp dir
//! so no real settings file is picked up.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Env {
    temp: TempDir,
}

impl Env {
    fn new() -> Self {
        Self { temp: TempDir::new().unwrap() }
    }

    fn projects(&self) -> PathBuf {
        self.temp.path().join("projects")
    }

    fn data(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("labelforge").unwrap();
        cmd.current_dir(self.temp.path())
            .env("HOME", self.temp.path())
            .env_remove("LABELFORGE_PROJECTS_DIR")
            .env_remove("LABELFORGE_DATA_DIR")
            .env_remove("LABELFORGE_PYTHON")
            .env_remove("RUST_LOG")
            .arg("--projects-dir")
            .arg(self.projects())
            .arg("--data-dir")
            .arg(self.data());
        cmd
    }

    /// A project with `count` annotated 32x32 images.
    fn project(&self, name: &str, count: usize) -> PathBuf {
        let root = self.projects().join(name);
        std::fs::create_dir_all(root.join("uploads")).unwrap();
        std::fs::create_dir_all(root.join("annotations")).unwrap();
        for i in 0..count {
            let file = format!("img{i}.png");
            image::RgbImage::new(32, 32).save(root.join("uploads").join(&file)).unwrap();
            std::fs::write(
                root.join("annotations").join(format!("{file}.json")),
                r#"[{"type": "bbox", "id": "b1", "x": 2, "y": 2, "width": 10, "height": 10, "classIndex": 0},
                    {"type": "keypoint", "id": "k1", "x": 5, "y": 5, "keypointIndex": 0, "parentId": "b1"}]"#,
            )
            .unwrap();
        }
        root
    }
}

fn write_manifest(project: &Path) {
    let dataset = project.join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    std::fs::write(dataset.join("data.yaml"), "path: .\n").unwrap();
}

#[test]
fn test_no_command_prints_help() {
    let env = Env::new();
    env.cmd().assert().success().stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_export_json() {
    let env = Env::new();
    let project = env.project("fish", 5);

    let assert = env.cmd().args(["export", "fish", "--seed", "7", "--json"]).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("export output should be JSON");

    assert_eq!(json["stats"]["images"], 5);
    assert_eq!(json["stats"]["train"]["images"], 4);
    assert_eq!(json["stats"]["val"]["images"], 1);
    assert_eq!(json["stats"]["keypoints"], 5);
    assert!(project.join("dataset").join("data.yaml").exists());
}

#[test]
fn test_export_human_output() {
    let env = Env::new();
    env.project("fish", 2);

    env.cmd()
        .args(["export", "fish", "--no-shuffle", "--train", "1.0", "--val", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Export complete"))
        .stdout(predicate::str::contains("train"));
}

#[test]
fn test_export_rejects_bad_ratios() {
    let env = Env::new();
    env.project("fish", 2);

    env.cmd()
        .args(["export", "fish", "--train", "0.9", "--val", "0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds 1"));
}

#[test]
fn test_queue_add_list_cancel() {
    let env = Env::new();
    let project = env.project("fish", 1);
    write_manifest(&project);

    let output = env.cmd().args(["queue", "add", "fish", "--priority", "3"]).assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("Queued"));

    let assert = env.cmd().args(["queue", "list", "--json"]).assert().success();
    let jobs: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["priority"], 3);
    assert_eq!(jobs[0]["status"], "pending");
    let id = jobs[0]["id"].as_str().unwrap().to_string();

    env.cmd().args(["queue", "cancel", &id]).assert().success();
    env.cmd().args(["queue", "cancel", &id]).assert().failure().stderr(predicate::str::contains("already cancelled"));

    env.cmd().args(["queue", "clear"]).assert().success().stdout(predicate::str::contains("Removed 1"));
}

#[test]
fn test_queue_add_rejects_missing_dataset() {
    let env = Env::new();
    env.project("fish", 1);

    env.cmd()
        .args(["queue", "add", "fish"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_queue_add_reports_schema_errors() {
    let env = Env::new();
    let project = env.project("fish", 1);
    write_manifest(&project);

    env.cmd()
        .args(["queue", "add", "fish", "--epochs", "0", "--device", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("epochs"))
        .stderr(predicate::str::contains("device"));
}

#[test]
fn test_status_json() {
    let env = Env::new();
    let assert = env.cmd().args(["status", "--json"]).assert().success();
    let json: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(json["queue"]["total"], 0);
    assert!(json["settings"]["projectsDir"].as_str().unwrap().ends_with("projects"));
}

#[test]
fn test_logs_without_file() {
    let env = Env::new();
    env.cmd()
        .args(["logs", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No log lines"));
}

#[cfg(unix)]
#[test]
fn test_train_foreground_run() {
    let env = Env::new();
    let project = env.project("fish", 1);
    write_manifest(&project);
    let script = env.temp.path().join("train.sh");
    std::fs::write(&script, "echo 'epoch done'\nexit 0\n").unwrap();

    env.cmd()
        .arg("--python")
        .arg("/bin/sh")
        .arg("--script")
        .arg(&script)
        .args(["train", "fish", "--epochs", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("epoch done"))
        .stdout(predicate::str::contains("completed"));

    env.cmd()
        .args(["logs", "fish", "--search", "EPOCH"])
        .assert()
        .success()
        .stdout(predicate::str::contains("epoch done"));
}

#[cfg(unix)]
#[test]
fn test_train_failure_exits_non_zero() {
    let env = Env::new();
    let project = env.project("fish", 1);
    write_manifest(&project);
    let script = env.temp.path().join("train.sh");
    std::fs::write(&script, "echo 'bad things' >&2\nexit 4\n").unwrap();

    env.cmd()
        .arg("--python")
        .arg("/bin/sh")
        .arg("--script")
        .arg(&script)
        .args(["train", "fish"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("exited with code 4"));
}
