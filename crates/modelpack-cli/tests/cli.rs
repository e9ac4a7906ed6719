//! Offline end-to-end runs of the `modelpack` binary.

use std::path::Path;
use std::process::{Command, Output};

const MODELS: &str = r#"
defaults:
  version: "0.4.0"
  registries: { primary: "ghcr.io/acme/inference", secondary: "docker.io/acme/inference" }
  lookup: { attempts: 1 }
models:
  - { id: "org/m1", short: "m1", revision: "0123456789abcdef" }
  - { id: "org/m2", short: "m2", permissive: true, gated: false, override_spdx: "mit" }
"#;

fn modelpack(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_modelpack"))
        .args(args)
        .env_remove("HF_TOKEN")
        .env("RUST_LOG", "warn")
        .output()
        .expect("run modelpack")
}

fn write_config(dir: &Path, content: &str) -> String {
    let path = dir.join("models.yaml");
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn resolve_offline_prints_conservative_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), MODELS);

    let out = modelpack(&["resolve", "--config", &config, "--offline"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc["schema_version"], "1");
    let jobs = doc["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    assert_eq!(jobs[0]["license_id"], "unknown");
    assert_eq!(jobs[0]["is_gated"], true);
    assert_eq!(jobs[0]["build_fat"], false);
    assert_eq!(jobs[0]["build_slim"], true);

    assert_eq!(jobs[1]["license_id"], "mit");
    assert_eq!(jobs[1]["build_fat"], true);
    assert!(doc["warning_count"].as_u64().unwrap() > 0);
}

#[test]
fn resolve_is_deterministic_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), MODELS);
    let matrix = dir.path().join("matrix.json");
    let summary = dir.path().join("summary.md");
    let bundles = dir.path().join("bundles");

    let first = modelpack(&["resolve", "--config", &config, "--offline"]);
    let second = modelpack(&["resolve", "--config", &config, "--offline"]);
    assert_eq!(first.stdout, second.stdout);

    let out = modelpack(&[
        "resolve",
        "--config",
        &config,
        "--offline",
        "--output",
        matrix.to_str().unwrap(),
        "--summary",
        summary.to_str().unwrap(),
        "--harvest-dir",
        bundles.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(out.stdout.is_empty());
    let summary_md = std::fs::read_to_string(&summary).unwrap();
    assert!(summary_md.contains("| m2 |"));
    assert!(summary_md.contains("| no (gated) |"));
    assert!(bundles.join("m2/model/LICENSE").exists());
    assert!(!bundles.join("m1").exists());

    let rendered = modelpack(&["summary", "--matrix", matrix.to_str().unwrap()]);
    assert!(rendered.status.success());
    assert!(String::from_utf8_lossy(&rendered.stdout).contains("## Totals"));
}

#[test]
fn resolve_github_format_has_include() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), MODELS);

    let out = modelpack(&[
        "resolve", "--config", &config, "--offline", "--format", "github",
    ]);
    assert!(out.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc["include"].as_array().unwrap().len(), 2);
}

#[test]
fn duplicate_short_exits_non_zero_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &MODELS.replace("short: \"m2\"", "short: \"m1\""));

    let out = modelpack(&["resolve", "--config", &config, "--offline"]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("duplicate short name"));
}

#[test]
fn harvest_offline_vendors_text() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("bundle");

    let out = modelpack(&[
        "harvest",
        "--model",
        "org/m1",
        "--license",
        "MIT",
        "--offline",
        "--out",
        out_dir.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let license = std::fs::read_to_string(out_dir.join("model/LICENSE")).unwrap();
    assert!(license.starts_with("MIT License"));
    assert!(out_dir.join("MANIFEST.json").exists());
    assert!(std::fs::read_to_string(out_dir.join("NOTICE"))
        .unwrap()
        .contains("2. Model: org/m1"));

    let labels: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out_dir.join("oci-labels.json")).unwrap()).unwrap();
    assert_eq!(
        labels["org.opencontainers.image.url"],
        "https://huggingface.co/org/m1"
    );
}

#[test]
fn harvest_into_a_file_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();

    let out = modelpack(&[
        "harvest",
        "--model",
        "org/m1",
        "--offline",
        "--out",
        blocker.to_str().unwrap(),
    ]);
    assert!(!out.status.success());
}
