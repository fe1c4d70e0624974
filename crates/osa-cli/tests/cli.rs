use assert_cmd::Command;
use osa_cli::manifest::read_manifest;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join(relative)
}

fn run_case(out: &Path, run_id: &str) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("osa").unwrap();
    cmd.args([
        "--log-level",
        "warn",
        "run",
        "--case",
        repo_path("test_data/cases/forecast.yaml").to_str().unwrap(),
        "--config",
        repo_path("test_data/cases/workflow.toml").to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--run-id",
        run_id,
    ])
    .assert()
}

#[test]
fn osa_run_stores_results_and_manifest() {
    let out = tempdir().unwrap();
    run_case(out.path(), "cli-run")
        .success()
        .stdout(predicate::str::contains("Run cli-run: 3 states (1 failed)"))
        .stdout(predicate::str::contains("1 unsafe"))
        .stdout(predicate::str::contains("Recorded run manifest"));

    let run_dir = out.path().join("cli-run");
    for file in ["parameters.json", "status.json", "results.json", "rules_results.json"] {
        assert!(run_dir.join(file).exists(), "missing {}", file);
    }

    let manifest = fs::read_dir(out.path())
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("run-") && name.ends_with(".json"))
        })
        .expect("run manifest");
    let manifest = read_manifest(&manifest).unwrap();
    assert_eq!(manifest.run_id, "cli-run");
    assert_eq!(manifest.command, "run");
    assert_eq!(manifest.status, "success");
    assert!(manifest
        .params
        .iter()
        .any(|p| p.name == "states" && p.value == "3"));
}

#[test]
fn osa_run_flags_override_config() {
    let out = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("osa").unwrap();
    cmd.args([
        "run",
        "--case",
        repo_path("test_data/cases/forecast.yaml").to_str().unwrap(),
        "--config",
        repo_path("test_data/cases/workflow.toml").to_str().unwrap(),
        "--out",
        out.path().to_str().unwrap(),
        "--run-id",
        "one-state",
        "--states",
        "1",
        "--threads",
        "1",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Run one-state: 1 states (0 failed)"));

    let params = fs::read_to_string(out.path().join("one-state/parameters.json")).unwrap();
    let params: serde_json::Value = serde_json::from_str(&params).unwrap();
    assert_eq!(params["states"], 1);
    assert_eq!(params["case_date"], "2024-01-15T10:00:00Z");
}

#[test]
fn osa_run_rejects_missing_case() {
    let out = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("osa").unwrap();
    cmd.args([
        "run",
        "--case",
        "/nonexistent/case.yaml",
        "--out",
        out.path().to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to load case"));
}

#[test]
fn osa_summary_writes_failures_and_violations() {
    let out = tempdir().unwrap();
    run_case(out.path(), "summarized").success();

    let csv_path = out.path().join("summary.csv");
    let mut cmd = Command::cargo_bin("osa").unwrap();
    cmd.args([
        "summary",
        "--store",
        out.path().to_str().unwrap(),
        "--run",
        "summarized",
        "--out",
        csv_path.to_str().unwrap(),
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("summary rows"));

    let table = fs::read_to_string(&csv_path).unwrap();
    let mut lines = table.lines();
    assert_eq!(
        lines.next(),
        Some(
            "WorkflowId,Basecase,Contingency,State,FailureStep,FailureDescription,\
             ViolationType,Violation,ViolationStep,Equipment,Value,Limit"
        )
    );
    let rows: Vec<&str> = lines.collect();
    // State 2 never converges.
    assert!(rows.iter().any(|row| row.starts_with("summarized,")
        && row.contains(",Empty-Contingency,2,LOAD_FLOW,")));
    // L1 is above its limit before any outage.
    assert!(rows
        .iter()
        .any(|row| row.contains(",Empty-Contingency,0,,,STEADY_STATE,CURRENT,LOAD_FLOW,L1,120,100")));
    assert!(rows.iter().any(|row| row.contains(
        ",N2_L1_L2,0,POSTCONTINGENCY_LOAD_FLOW,Post contingency load flow does not converge,"
    )));
    assert!(rows
        .iter()
        .any(|row| row.contains(",N1_L2,0,,,MCLA_RULE,TRANSIENT,SECURITY_RULES,")));
    assert!(rows
        .iter()
        .any(|row| row.contains(",N1_L2,0,,,SECURITY_INDEX,TRANSIENT,TIME_DOMAIN_SIM,")));
    assert!(rows
        .iter()
        .any(|row| row.contains(",N1_L2,1,,,STEADY_STATE,CURRENT,POSTCONTINGENCY_LOAD_FLOW,L1,")));
    assert!(!rows.iter().any(|row| row.contains("N1_G1")));
}

#[test]
fn osa_summary_of_unknown_run_fails() {
    let out = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("osa").unwrap();
    cmd.args([
        "summary",
        "--store",
        out.path().to_str().unwrap(),
        "--run",
        "missing",
        "--out",
        out.path().join("summary.csv").to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no stored run 'missing'"));
}
