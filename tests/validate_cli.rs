//! CLI tests for offline policy validation.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

const VALID_POLICY: &str = r#"
apiVersion: optipod.dev/v1alpha1
kind: OptimizationPolicy
metadata:
  name: web-rightsizing
  namespace: optipod-system
spec:
  mode: Recommend
  selector:
    namespaces:
      allow: ["prod"]
  metricsConfig:
    provider: metrics-server
    window: 1h
    percentile: P90
    safetyFactor: 1.2
  resourceBounds:
    cpu: { min: 100m, max: 4000m }
    memory: { min: 128Mi, max: 8Gi }
"#;

fn manifest(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn validate_accepts_well_formed_policy() {
    let file = manifest(VALID_POLICY);
    Command::cargo_bin("optipod")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("web-rightsizing is valid"));
}

#[test]
fn validate_rejects_min_above_max() {
    let file = manifest(&VALID_POLICY.replace("min: 100m", "min: 8000m"));
    Command::cargo_bin("optipod")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("min 8000m exceeds max 4000m"));
}

#[test]
fn validate_rejects_malformed_manifest() {
    let file = manifest("this is not: [valid");
    Command::cargo_bin("optipod")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn validate_rejects_missing_file() {
    Command::cargo_bin("optipod")
        .unwrap()
        .arg("validate")
        .arg("/nonexistent/policy.yaml")
        .assert()
        .failure();
}
