//! Run manifests written next to stored runs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osa_workflow::RunSummary;

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub manifest_id: String,
    pub run_id: String,
    pub command: String,
    pub version: String,
    pub timestamp: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub outputs: Vec<String>,
    pub params: Vec<Param>,
    /// CI and environment variables captured when the run was recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<Param>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

const ENV_KEYS: &[&str] = &[
    "OSA_ENV",
    "OSA_RELEASE_VERSION",
    "GITHUB_RUN_ID",
    "GITHUB_WORKFLOW",
    "GITHUB_SHA",
];

fn collect_env() -> Vec<Param> {
    ENV_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| Param::new(*key, value)))
        .collect()
}

/// Record a `run-<uuid>.json` manifest for a finished run under `dir`.
pub fn record_manifest(
    dir: &Path,
    command: &str,
    summary: &RunSummary,
    outputs: &[PathBuf],
    params: Vec<Param>,
    duration_ms: u128,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let manifest_id = Uuid::new_v4().to_string();
    let manifest = ManifestEntry {
        manifest_id: manifest_id.clone(),
        run_id: summary.run_id.to_string(),
        command: command.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        status: if summary.failure.is_none() {
            "success".to_string()
        } else {
            "failure".to_string()
        },
        duration_ms: Some(duration_ms),
        failure: summary.failure.clone(),
        outputs: outputs.iter().map(|p| p.display().to_string()).collect(),
        params,
        env: collect_env(),
    };
    let json = serde_json::to_string_pretty(&manifest)?;
    let path = dir.join(format!("run-{}.json", manifest_id));
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn read_manifest(path: &Path) -> Result<ManifestEntry> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let manifest = serde_json::from_str(&json)?;
    Ok(manifest)
}
