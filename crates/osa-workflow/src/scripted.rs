//! Deterministic engines driven by a YAML case file.
//!
//! A case describes the base network, the contingency catalog and, for every
//! contingency, what each engine answers: its cluster, its rule verdict,
//! whether its post-contingency load flow converges, what the optimizer does
//! and which security indices impact analysis reports. The CLI runs cases
//! with these engines and the integration tests use them to script runs.
//!
//! ```yaml
//! network:
//!   id: demo
//!   case_date: 2024-01-15T10:00:00Z
//!   quantities: { L1: 80.0 }
//!   limits: { L1: { kind: CURRENT, value: 100.0 } }
//! contingencies:
//!   - id: N1_L1
//!     elements: [{ type: branch, id: L1 }]
//!     cluster: 3
//!     verdict: UNSAFE
//!     indices: [{ kind: TRANSIENT, ok: false }]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use osa_core::{
    ActionOutcome, ClusterAssignment, ClusterNum, Contingency, ContingencyCatalog,
    ContingencyElement, ContingencyId, CoreResult, Limit, Network, NetworkVariant,
    OptimizerStatus, ParameterValue, SecurityIndex, SecurityIndexKind, SecurityStatus,
    SecurityVerdict, StateId, VariantId,
};

use crate::engines::{
    ContingencyClassifier, CorrectiveOptimizer, DynamicSimulator, ImpactReport,
    LoadFlowEngine, LoadFlowReport, Metrics, PostContingencyState, RuleEvaluator, Sampler,
    SimulationState, StabilizationReport, StabilizationStatus,
};
use crate::error::{Error, Result};

/// Base network of a scripted case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedNetwork {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub case_date: DateTime<Utc>,
    #[serde(default)]
    pub quantities: BTreeMap<String, f64>,
    #[serde(default)]
    pub limits: BTreeMap<String, Limit>,
}

/// What the optimizer answers for one contingency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerScript {
    Actions,
    #[default]
    NoActions,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedIndex {
    pub kind: SecurityIndexKind,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedContingency {
    pub id: String,
    #[serde(default)]
    pub elements: Vec<ContingencyElement>,
    #[serde(default = "default_cluster")]
    pub cluster: ClusterNum,
    #[serde(default = "default_verdict")]
    pub verdict: SecurityStatus,
    /// Verdicts that differ from `verdict` in specific states.
    #[serde(default)]
    pub state_verdicts: BTreeMap<u32, SecurityStatus>,
    #[serde(default = "default_true")]
    pub rules_available: bool,
    /// Whether the post-contingency load flow converges.
    #[serde(default = "default_true")]
    pub converges: bool,
    #[serde(default)]
    pub optimizer: OptimizerScript,
    /// Indices reported by impact analysis; a single ok transient index when empty.
    #[serde(default)]
    pub indices: Vec<ScriptedIndex>,
}

fn default_cluster() -> ClusterNum {
    ClusterNum::TWO
}

fn default_verdict() -> SecurityStatus {
    SecurityStatus::Safe
}

fn default_true() -> bool {
    true
}

fn default_sampling_step() -> f64 {
    0.01
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadFlowScript {
    /// States whose load flow does not converge.
    #[serde(default)]
    pub non_converging_states: BTreeSet<u32>,
    /// States whose load flow raises an error.
    #[serde(default)]
    pub failing_states: BTreeSet<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingScript {
    /// Quantities of state `s` are scaled by `1 + step * s`.
    #[serde(default = "default_sampling_step")]
    pub step: f64,
    /// States whose sampling raises an error.
    #[serde(default)]
    pub failing_states: BTreeSet<u32>,
}

impl Default for SamplingScript {
    fn default() -> Self {
        Self {
            step: default_sampling_step(),
            failing_states: BTreeSet::new(),
        }
    }
}

/// A complete scripted case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedCase {
    pub network: ScriptedNetwork,
    #[serde(default)]
    pub contingencies: Vec<ScriptedContingency>,
    #[serde(default)]
    pub load_flow: LoadFlowScript,
    #[serde(default)]
    pub sampling: SamplingScript,
    #[serde(default)]
    pub stabilization: StabilizationStatus,
    /// When set, worst-case clustering fails with this message.
    #[serde(default)]
    pub clustering_error: Option<String>,
}

impl ScriptedCase {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a case from a YAML (or JSON) file.
    pub fn load(path: &Path) -> Result<Self> {
        let load = || -> anyhow::Result<Self> {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading case '{}'", path.display()))?;
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("json") => {
                    serde_json::from_str(&data).context("parsing case json")
                }
                _ => serde_yaml::from_str(&data).context("parsing case yaml"),
            }
        };
        load().map_err(|source| Error::CaseLoad {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn network(&self) -> Network {
        let mut base = NetworkVariant::new(VariantId::base(StateId::new(0)));
        base.quantities = self.network.quantities.clone();
        base.limits = self.network.limits.clone();
        Network {
            id: self.network.id.clone(),
            name: self.network.name.clone(),
            case_date: self.network.case_date,
            base,
        }
    }

    pub fn catalog(&self) -> CoreResult<ContingencyCatalog> {
        ContingencyCatalog::from_contingencies(
            self.contingencies
                .iter()
                .map(|c| Contingency::new(c.id.clone(), c.elements.clone())),
        )
    }

    fn contingency(&self, id: &ContingencyId) -> anyhow::Result<&ScriptedContingency> {
        self.contingencies
            .iter()
            .find(|c| c.id == id.as_str())
            .ok_or_else(|| anyhow!("contingency {} is not scripted", id))
    }
}

/// Invocation counts of a [`ScriptedEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub classify: usize,
    pub sample: usize,
    pub load_flow: usize,
    pub post_contingency_load_flow: usize,
    pub rules: usize,
    pub wca_rules: usize,
    pub optimize: usize,
    pub stabilize: usize,
    pub analyze_impact: usize,
}

#[derive(Debug, Default)]
struct Counters {
    classify: AtomicUsize,
    sample: AtomicUsize,
    load_flow: AtomicUsize,
    post_contingency_load_flow: AtomicUsize,
    rules: AtomicUsize,
    wca_rules: AtomicUsize,
    optimize: AtomicUsize,
    stabilize: AtomicUsize,
    analyze_impact: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Every engine role, answering from a [`ScriptedCase`].
#[derive(Debug)]
pub struct ScriptedEngine {
    case: ScriptedCase,
    counters: Counters,
}

impl ScriptedEngine {
    pub fn new(case: ScriptedCase) -> Arc<Self> {
        Arc::new(Self {
            case,
            counters: Counters::default(),
        })
    }

    pub fn case(&self) -> &ScriptedCase {
        &self.case
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        CallCounts {
            classify: load(&c.classify),
            sample: load(&c.sample),
            load_flow: load(&c.load_flow),
            post_contingency_load_flow: load(&c.post_contingency_load_flow),
            rules: load(&c.rules),
            wca_rules: load(&c.wca_rules),
            optimize: load(&c.optimize),
            stabilize: load(&c.stabilize),
            analyze_impact: load(&c.analyze_impact),
        }
    }

    fn verdict(&self, contingency: &Contingency, variant: &NetworkVariant) -> anyhow::Result<SecurityVerdict> {
        let script = self.case.contingency(&contingency.id)?;
        if !script.rules_available {
            return Ok(SecurityVerdict::rules_unavailable(vec![format!(
                "{}_rule",
                contingency.id
            )]));
        }
        let status = script
            .state_verdicts
            .get(&variant.id.state.value())
            .copied()
            .unwrap_or(script.verdict);
        // Rules predict the indices impact analysis would report.
        Ok(script
            .indices
            .iter()
            .fold(SecurityVerdict::new(status), |verdict, index| {
                verdict.with_index_result(index.kind.as_str(), index.ok)
            }))
    }
}

impl ContingencyClassifier for ScriptedEngine {
    fn classify(
        &self,
        contingencies: &[Arc<Contingency>],
        _base: &NetworkVariant,
    ) -> anyhow::Result<Vec<ClusterAssignment>> {
        bump(&self.counters.classify);
        if let Some(message) = &self.case.clustering_error {
            bail!("{}", message);
        }
        contingencies
            .iter()
            .map(|contingency| {
                let script = self.case.contingency(&contingency.id)?;
                let mut assignment = ClusterAssignment::new(contingency.id.clone(), script.cluster);
                if script.cluster.needs_analysis() {
                    assignment
                        .causes
                        .push(format!("cluster {} assigned by script", script.cluster));
                }
                Ok(assignment)
            })
            .collect()
    }
}

impl Sampler for ScriptedEngine {
    fn sample(&self, state: StateId, variant: &mut NetworkVariant) -> anyhow::Result<()> {
        bump(&self.counters.sample);
        if self.case.sampling.failing_states.contains(&state.value()) {
            bail!("no forecast data for state {}", state);
        }
        variant.scale_quantities(1.0 + self.case.sampling.step * f64::from(state.value()));
        Ok(())
    }
}

impl LoadFlowEngine for ScriptedEngine {
    fn solve(&self, variant: &mut NetworkVariant) -> anyhow::Result<LoadFlowReport> {
        if let Some(contingency) = &variant.id.contingency {
            bump(&self.counters.post_contingency_load_flow);
            let script = self.case.contingency(contingency)?;
            return Ok(if script.converges {
                LoadFlowReport::converged().with_metric("iterations", 4)
            } else {
                LoadFlowReport::diverged().with_metric("iterations", 50)
            });
        }

        bump(&self.counters.load_flow);
        let state = variant.id.state.value();
        if self.case.load_flow.failing_states.contains(&state) {
            bail!("load flow solver crashed on state {}", state);
        }
        Ok(if self.case.load_flow.non_converging_states.contains(&state) {
            LoadFlowReport::diverged()
                .with_metric("iterations", 50)
                .with_metric("status", "diverged")
        } else {
            LoadFlowReport::converged().with_metric("iterations", 3)
        })
    }
}

impl RuleEvaluator for ScriptedEngine {
    fn evaluate(
        &self,
        contingency: &Contingency,
        variant: &NetworkVariant,
    ) -> anyhow::Result<SecurityVerdict> {
        bump(&self.counters.rules);
        self.verdict(contingency, variant)
    }

    fn evaluate_wca(
        &self,
        contingency: &Contingency,
        variant: &NetworkVariant,
    ) -> anyhow::Result<SecurityVerdict> {
        bump(&self.counters.wca_rules);
        self.verdict(contingency, variant)
    }
}

impl CorrectiveOptimizer for ScriptedEngine {
    fn optimize(&self, input: &PostContingencyState<'_>) -> anyhow::Result<ActionOutcome> {
        bump(&self.counters.optimize);
        let id = &input.contingency.id;
        let script = self.case.contingency(id)?;
        match script.optimizer {
            OptimizerScript::Actions => {
                let mut actions = BTreeMap::new();
                for element in &input.contingency.elements {
                    let equipment = element.equipment_id().to_string();
                    let mut parameters = BTreeMap::new();
                    parameters.insert("redispatch".to_string(), ParameterValue::Flag(true));
                    let mut per_equipment = BTreeMap::new();
                    per_equipment.insert(equipment.clone(), parameters);
                    actions.insert(format!("relieve_{}", equipment), per_equipment);
                }
                Ok(ActionOutcome::found(
                    id.clone(),
                    OptimizerStatus::ManualCorrectiveActionFound,
                    Some(format!("plan-{}-{}", input.state, id)),
                    actions,
                ))
            }
            OptimizerScript::NoActions => Ok(ActionOutcome::not_found(
                id.clone(),
                OptimizerStatus::NoCorrectiveActionFound,
            )),
            OptimizerScript::Error => bail!("optimizer crashed on contingency {}", id),
        }
    }
}

impl DynamicSimulator for ScriptedEngine {
    fn stabilize(&self, variant: &NetworkVariant) -> anyhow::Result<StabilizationReport> {
        bump(&self.counters.stabilize);
        let mut metrics = Metrics::new();
        metrics.insert("status".to_string(), format!("{:?}", self.case.stabilization));
        Ok(StabilizationReport {
            status: self.case.stabilization,
            metrics,
            state: SimulationState {
                variant: variant.clone(),
            },
        })
    }

    fn analyze_impact(
        &self,
        _state: &SimulationState,
        contingencies: &[ContingencyId],
    ) -> anyhow::Result<ImpactReport> {
        bump(&self.counters.analyze_impact);
        let mut indices = Vec::new();
        for id in contingencies {
            let script = self.case.contingency(id)?;
            if script.indices.is_empty() {
                indices.push(SecurityIndex::new(id.clone(), SecurityIndexKind::Transient, true));
            }
            indices.extend(
                script
                    .indices
                    .iter()
                    .map(|index| SecurityIndex::new(id.clone(), index.kind, index.ok)),
            );
        }
        let mut metrics = Metrics::new();
        metrics.insert("contingencies".to_string(), contingencies.len().to_string());
        Ok(ImpactReport { indices, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE: &str = r#"
network:
  id: demo
  case_date: 2024-01-15T10:00:00Z
  quantities: { L1: 80.0, L2: 20.0 }
  limits: { L1: { kind: CURRENT, value: 100.0 } }
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    cluster: 1
  - id: C2
    elements: [{ type: generator, id: G1 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    state_verdicts: { 2: UNSAFE }
    optimizer: actions
    indices: [{ kind: TRANSIENT, ok: false }]
load_flow:
  non_converging_states: [3]
"#;

    #[test]
    fn case_parses_with_defaults() {
        let case = ScriptedCase::from_yaml_str(CASE).unwrap();
        assert_eq!(case.contingencies.len(), 2);
        assert_eq!(case.contingencies[0].cluster, ClusterNum::ONE);
        assert_eq!(case.contingencies[0].verdict, SecurityStatus::Safe);
        assert!(case.contingencies[0].converges);
        assert_eq!(case.stabilization, StabilizationStatus::Completed);
        assert_eq!(case.sampling.step, 0.01);

        let network = case.network();
        assert_eq!(network.base.quantity("L1"), Some(80.0));
        assert_eq!(case.catalog().unwrap().len(), 2);
    }

    #[test]
    fn engines_answer_from_the_script_and_count_calls() {
        let engine = ScriptedEngine::new(ScriptedCase::from_yaml_str(CASE).unwrap());
        let catalog = engine.case().catalog().unwrap();
        let c2 = catalog.get(&ContingencyId::new("C2")).unwrap().clone();

        let mut s2 = NetworkVariant::new(VariantId::base(StateId::new(2)));
        let verdict = engine.evaluate(&c2, &s2).unwrap();
        assert_eq!(verdict.status, SecurityStatus::Unsafe);

        let mut s3 = NetworkVariant::new(VariantId::base(StateId::new(3)));
        assert!(!engine.solve(&mut s3).unwrap().converged);
        assert!(engine.solve(&mut s2).unwrap().converged);

        let input = PostContingencyState {
            state: StateId::new(2),
            contingency: &c2,
            variant: &s2,
        };
        let outcome = engine.optimize(&input).unwrap();
        assert!(outcome.actions_found);
        assert_eq!(outcome.action_ids(), vec!["relieve_G1".to_string()]);

        let calls = engine.calls();
        assert_eq!(calls.rules, 1);
        assert_eq!(calls.load_flow, 2);
        assert_eq!(calls.optimize, 1);
        assert_eq!(calls.stabilize, 0);
    }

    #[test]
    fn unknown_case_file_is_a_case_load_error() {
        let err = ScriptedCase::load(Path::new("/nonexistent/case.yaml")).unwrap_err();
        assert!(matches!(err, Error::CaseLoad { .. }));
    }
}
