//! Persistence of run results.
//!
//! The workflow writes through a [`ResultStore`]. Failures to store are
//! logged by the caller and never abort a run. Two stores are provided: an
//! in-process [`MemoryStore`] and a [`JsonStore`] that keeps one directory of
//! pretty-printed JSON files per run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use osa_core::{ContingencyId, LimitViolation, NetworkVariant, OnlineStep, RunId, StateId, WorkStatus};

use crate::config::WorkflowParameters;
use crate::engines::Metrics;
use crate::results::{ForecastAnalysis, RulesTable, WcaTable};

/// Violations found after applying one contingency to one state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostContingencyViolations {
    pub converged: bool,
    #[serde(default)]
    pub violations: Vec<LimitViolation>,
}

/// Everything stored for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    #[serde(default)]
    pub parameters: Option<WorkflowParameters>,
    #[serde(default)]
    pub status: BTreeMap<StateId, WorkStatus>,
    #[serde(default)]
    pub results: Option<ForecastAnalysis>,
    #[serde(default)]
    pub rules_results: RulesTable,
    #[serde(default)]
    pub wca_results: WcaTable,
    #[serde(default)]
    pub wca_rules_results: RulesTable,
    #[serde(default)]
    pub violations: BTreeMap<StateId, BTreeMap<OnlineStep, Vec<LimitViolation>>>,
    #[serde(default)]
    pub post_contingency_violations:
        BTreeMap<StateId, BTreeMap<ContingencyId, PostContingencyViolations>>,
    #[serde(default)]
    pub metrics: BTreeMap<StateId, BTreeMap<OnlineStep, Metrics>>,
    #[serde(default)]
    pub states: BTreeMap<StateId, NetworkVariant>,
}

/// Sink for run results.
///
/// Per-state methods are called concurrently from state tasks; run-level
/// methods are called once when the run ends.
pub trait ResultStore: Send + Sync {
    fn store_parameters(&self, run: &RunId, parameters: &WorkflowParameters) -> Result<()>;

    fn store_status(&self, run: &RunId, status: &BTreeMap<StateId, WorkStatus>) -> Result<()>;

    fn store_results(&self, run: &RunId, results: &ForecastAnalysis) -> Result<()>;

    fn store_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()>;

    fn store_wca_results(&self, run: &RunId, results: &WcaTable) -> Result<()>;

    fn store_wca_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()>;

    fn store_violations(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        violations: &[LimitViolation],
    ) -> Result<()>;

    fn store_post_contingency_violations(
        &self,
        run: &RunId,
        state: StateId,
        contingency: &ContingencyId,
        converged: bool,
        violations: &[LimitViolation],
    ) -> Result<()>;

    fn store_metrics(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        metrics: &Metrics,
    ) -> Result<()>;

    fn store_state(&self, run: &RunId, state: StateId, variant: &NetworkVariant) -> Result<()>;
}

/// In-process store, queryable after the run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<BTreeMap<RunId, StoredRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, run: &RunId) -> Option<StoredRun> {
        self.runs.lock().get(run).cloned()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.lock().keys().cloned().collect()
    }

    fn with_run(&self, run: &RunId, apply: impl FnOnce(&mut StoredRun)) -> Result<()> {
        let mut runs = self.runs.lock();
        apply(runs.entry(run.clone()).or_default());
        Ok(())
    }
}

impl ResultStore for MemoryStore {
    fn store_parameters(&self, run: &RunId, parameters: &WorkflowParameters) -> Result<()> {
        self.with_run(run, |stored| stored.parameters = Some(parameters.clone()))
    }

    fn store_status(&self, run: &RunId, status: &BTreeMap<StateId, WorkStatus>) -> Result<()> {
        self.with_run(run, |stored| stored.status = status.clone())
    }

    fn store_results(&self, run: &RunId, results: &ForecastAnalysis) -> Result<()> {
        self.with_run(run, |stored| stored.results = Some(results.clone()))
    }

    fn store_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()> {
        self.with_run(run, |stored| stored.rules_results = results.clone())
    }

    fn store_wca_results(&self, run: &RunId, results: &WcaTable) -> Result<()> {
        self.with_run(run, |stored| stored.wca_results = results.clone())
    }

    fn store_wca_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()> {
        self.with_run(run, |stored| stored.wca_rules_results = results.clone())
    }

    fn store_violations(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        violations: &[LimitViolation],
    ) -> Result<()> {
        self.with_run(run, |stored| {
            stored
                .violations
                .entry(state)
                .or_default()
                .insert(step, violations.to_vec());
        })
    }

    fn store_post_contingency_violations(
        &self,
        run: &RunId,
        state: StateId,
        contingency: &ContingencyId,
        converged: bool,
        violations: &[LimitViolation],
    ) -> Result<()> {
        self.with_run(run, |stored| {
            stored
                .post_contingency_violations
                .entry(state)
                .or_default()
                .insert(
                    contingency.clone(),
                    PostContingencyViolations {
                        converged,
                        violations: violations.to_vec(),
                    },
                );
        })
    }

    fn store_metrics(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        metrics: &Metrics,
    ) -> Result<()> {
        self.with_run(run, |stored| {
            stored
                .metrics
                .entry(state)
                .or_default()
                .insert(step, metrics.clone());
        })
    }

    fn store_state(&self, run: &RunId, state: StateId, variant: &NetworkVariant) -> Result<()> {
        self.with_run(run, |stored| {
            stored.states.insert(state, variant.clone());
        })
    }
}

const PARAMETERS_FILE: &str = "parameters.json";
const STATUS_FILE: &str = "status.json";
const RESULTS_FILE: &str = "results.json";
const RULES_RESULTS_FILE: &str = "rules_results.json";
const WCA_RESULTS_FILE: &str = "wca_results.json";
const WCA_RULES_RESULTS_FILE: &str = "wca_rules_results.json";
const VIOLATIONS_FILE: &str = "violations.json";
const POST_CONTINGENCY_VIOLATIONS_FILE: &str = "post_contingency_violations.json";
const METRICS_FILE: &str = "metrics.json";
const STATES_DIR: &str = "states";

/// Store writing `<root>/<run-id>/*.json`.
///
/// Per-state data is merged into one file per kind; a lock serializes the
/// read-modify-write cycles of concurrent state tasks.
#[derive(Debug)]
pub struct JsonStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    /// Read back everything stored for `run`. Missing files are left empty.
    pub fn load(&self, run: &RunId) -> Result<StoredRun> {
        let dir = self.run_dir(run);
        if !dir.is_dir() {
            anyhow::bail!("no stored run '{}' under '{}'", run, self.root.display());
        }
        let mut stored = StoredRun {
            parameters: read_optional(&dir.join(PARAMETERS_FILE))?,
            status: read_or_default(&dir.join(STATUS_FILE))?,
            results: read_optional(&dir.join(RESULTS_FILE))?,
            rules_results: read_or_default(&dir.join(RULES_RESULTS_FILE))?,
            wca_results: read_or_default(&dir.join(WCA_RESULTS_FILE))?,
            wca_rules_results: read_or_default(&dir.join(WCA_RULES_RESULTS_FILE))?,
            violations: read_or_default(&dir.join(VIOLATIONS_FILE))?,
            post_contingency_violations: read_or_default(
                &dir.join(POST_CONTINGENCY_VIOLATIONS_FILE),
            )?,
            metrics: read_or_default(&dir.join(METRICS_FILE))?,
            states: BTreeMap::new(),
        };
        let states_dir = dir.join(STATES_DIR);
        if states_dir.is_dir() {
            for entry in fs::read_dir(&states_dir)
                .with_context(|| format!("listing '{}'", states_dir.display()))?
            {
                let path = entry?.path();
                let variant: NetworkVariant = read_json(&path)?;
                stored.states.insert(variant.id.state, variant);
            }
        }
        Ok(stored)
    }

    fn write<T: Serialize>(&self, run: &RunId, file: &str, value: &T) -> Result<()> {
        let _guard = self.lock.lock();
        write_json(&self.run_dir(run).join(file), value)
    }

    fn merge<T>(&self, run: &RunId, file: &str, apply: impl FnOnce(&mut T)) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _guard = self.lock.lock();
        let path = self.run_dir(run).join(file);
        let mut value: T = read_or_default(&path)?;
        apply(&mut value);
        write_json(&path, &value)
    }
}

impl ResultStore for JsonStore {
    fn store_parameters(&self, run: &RunId, parameters: &WorkflowParameters) -> Result<()> {
        self.write(run, PARAMETERS_FILE, parameters)
    }

    fn store_status(&self, run: &RunId, status: &BTreeMap<StateId, WorkStatus>) -> Result<()> {
        self.write(run, STATUS_FILE, status)
    }

    fn store_results(&self, run: &RunId, results: &ForecastAnalysis) -> Result<()> {
        self.write(run, RESULTS_FILE, results)
    }

    fn store_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()> {
        self.write(run, RULES_RESULTS_FILE, results)
    }

    fn store_wca_results(&self, run: &RunId, results: &WcaTable) -> Result<()> {
        self.write(run, WCA_RESULTS_FILE, results)
    }

    fn store_wca_rules_results(&self, run: &RunId, results: &RulesTable) -> Result<()> {
        self.write(run, WCA_RULES_RESULTS_FILE, results)
    }

    fn store_violations(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        violations: &[LimitViolation],
    ) -> Result<()> {
        self.merge(
            run,
            VIOLATIONS_FILE,
            |all: &mut BTreeMap<StateId, BTreeMap<OnlineStep, Vec<LimitViolation>>>| {
                all.entry(state).or_default().insert(step, violations.to_vec());
            },
        )
    }

    fn store_post_contingency_violations(
        &self,
        run: &RunId,
        state: StateId,
        contingency: &ContingencyId,
        converged: bool,
        violations: &[LimitViolation],
    ) -> Result<()> {
        self.merge(
            run,
            POST_CONTINGENCY_VIOLATIONS_FILE,
            |all: &mut BTreeMap<StateId, BTreeMap<ContingencyId, PostContingencyViolations>>| {
                all.entry(state).or_default().insert(
                    contingency.clone(),
                    PostContingencyViolations {
                        converged,
                        violations: violations.to_vec(),
                    },
                );
            },
        )
    }

    fn store_metrics(
        &self,
        run: &RunId,
        state: StateId,
        step: OnlineStep,
        metrics: &Metrics,
    ) -> Result<()> {
        self.merge(
            run,
            METRICS_FILE,
            |all: &mut BTreeMap<StateId, BTreeMap<OnlineStep, Metrics>>| {
                all.entry(state).or_default().insert(step, metrics.clone());
            },
        )
    }

    fn store_state(&self, run: &RunId, state: StateId, variant: &NetworkVariant) -> Result<()> {
        let file = format!("{}/state-{}.json", STATES_DIR, state);
        self.write(run, &file, variant)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating result directory '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing '{}'", path.display()))?;
    fs::write(path, json).with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing '{}'", path.display()))
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.exists() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    Ok(read_optional(path)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_core::{Limit, LimitKind, VariantId};
    use tempfile::TempDir;

    fn violation(subject: &str) -> LimitViolation {
        LimitViolation {
            subject: subject.to_string(),
            kind: LimitKind::Current,
            value: 120.0,
            limit: 100.0,
            reduction: 1.0,
        }
    }

    #[test]
    fn json_store_merges_per_state_writes() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let run = RunId::new("run-1");
        let c1 = ContingencyId::new("C1");

        store
            .store_violations(&run, StateId::new(0), OnlineStep::LoadFlow, &[violation("L1")])
            .unwrap();
        store
            .store_violations(&run, StateId::new(1), OnlineStep::LoadFlow, &[violation("L2")])
            .unwrap();
        store
            .store_post_contingency_violations(&run, StateId::new(1), &c1, false, &[])
            .unwrap();
        let mut metrics = Metrics::new();
        metrics.insert("iterations".into(), "7".into());
        store
            .store_metrics(&run, StateId::new(1), OnlineStep::LoadFlow, &metrics)
            .unwrap();

        let mut variant = NetworkVariant::new(VariantId::base(StateId::new(1)));
        variant.set_limit("L2", Limit::current(10.0));
        store.store_state(&run, StateId::new(1), &variant).unwrap();
        store
            .store_parameters(&run, &WorkflowParameters::default())
            .unwrap();

        let stored = store.load(&run).unwrap();
        assert_eq!(stored.violations.len(), 2);
        assert_eq!(
            stored.violations[&StateId::new(1)][&OnlineStep::LoadFlow][0].subject,
            "L2"
        );
        assert!(!stored.post_contingency_violations[&StateId::new(1)][&c1].converged);
        assert_eq!(
            stored.metrics[&StateId::new(1)][&OnlineStep::LoadFlow]["iterations"],
            "7"
        );
        assert_eq!(stored.states[&StateId::new(1)], variant);
        assert_eq!(stored.parameters, Some(WorkflowParameters::default()));
        assert!(stored.results.is_none());
    }

    #[test]
    fn loading_an_unknown_run_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(store.load(&RunId::new("missing")).is_err());
    }

    #[test]
    fn memory_store_keeps_runs_apart() {
        let store = MemoryStore::new();
        let a = RunId::new("a");
        let b = RunId::new("b");
        store
            .store_violations(&a, StateId::new(0), OnlineStep::LoadFlow, &[violation("L1")])
            .unwrap();
        store.store_wca_results(&b, &WcaTable::new()).unwrap();

        assert_eq!(store.run_ids(), vec![a.clone(), b.clone()]);
        assert_eq!(store.run(&a).unwrap().violations.len(), 1);
        assert!(store.run(&b).unwrap().violations.is_empty());
    }
}
