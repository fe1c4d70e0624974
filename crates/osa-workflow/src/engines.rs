//! Boundaries to the external analysis engines.
//!
//! The workflow never computes electrical behavior itself. Load flow,
//! clustering, rule evaluation, corrective-control optimization and dynamic
//! simulation sit behind the traits in this module. Every call receives the
//! [`NetworkVariant`] it works on; there is no shared working-variant selector.
//!
//! All engines must be `Send + Sync`: one instance serves every state task of
//! a run concurrently. Errors are plain [`anyhow::Error`]s; the workflow
//! decides per stage whether an error becomes a recorded outcome or fails the
//! stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use osa_core::{
    ActionOutcome, ClusterAssignment, Contingency, ContingencyId, NetworkVariant, SecurityIndex,
    SecurityIndexKind, SecurityVerdict, StateId, TimeHorizon,
};

/// Free-form metrics reported by an engine (`name → value`).
pub type Metrics = BTreeMap<String, String>;

/// Render metrics as `{k=v, ...}` for status detail text.
pub fn format_metrics(metrics: &Metrics) -> String {
    let body: Vec<String> = metrics.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{{{}}}", body.join(", "))
}

/// Worst-case analysis: assigns every contingency a severity cluster.
pub trait ContingencyClassifier: Send + Sync {
    fn classify(
        &self,
        contingencies: &[Arc<Contingency>],
        base: &NetworkVariant,
    ) -> Result<Vec<ClusterAssignment>>;
}

/// Run-level information handed to the sampler before any state is drawn.
#[derive(Debug, Clone)]
pub struct SamplerContext {
    pub states: u32,
    pub time_horizon: TimeHorizon,
    pub case_date: DateTime<Utc>,
}

/// Draws plausible near-future operating points.
pub trait Sampler: Send + Sync {
    fn init(&self, _context: &SamplerContext) -> Result<()> {
        Ok(())
    }

    /// Mutate `variant` in place into the operating point of `state`.
    fn sample(&self, state: StateId, variant: &mut NetworkVariant) -> Result<()>;
}

/// Outcome of one load-flow computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadFlowReport {
    pub converged: bool,
    #[serde(default)]
    pub metrics: Metrics,
}

impl LoadFlowReport {
    pub fn converged() -> Self {
        Self {
            converged: true,
            metrics: Metrics::new(),
        }
    }

    pub fn diverged() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.metrics.insert(name.into(), value.to_string());
        self
    }
}

/// Steady-state solver. Updates the quantities of the variant it solves.
pub trait LoadFlowEngine: Send + Sync {
    fn solve(&self, variant: &mut NetworkVariant) -> Result<LoadFlowReport>;
}

/// Run-level information handed to the rule evaluator.
#[derive(Debug, Clone)]
pub struct RulesContext {
    /// Contingencies that will be evaluated in this run.
    pub contingencies: Vec<ContingencyId>,
    pub purity_threshold: f64,
    pub index_kinds: Option<Vec<SecurityIndexKind>>,
    pub validation: bool,
    pub handle_violations_in_base_state: bool,
    pub time_horizon: TimeHorizon,
}

/// Offline-trained security rules applied to one state.
pub trait RuleEvaluator: Send + Sync {
    fn init(&self, _context: &RulesContext) -> Result<()> {
        Ok(())
    }

    fn evaluate(&self, contingency: &Contingency, variant: &NetworkVariant)
        -> Result<SecurityVerdict>;

    /// Rules scoped to the worst-case analysis. Only used in validation runs.
    fn evaluate_wca(
        &self,
        contingency: &Contingency,
        variant: &NetworkVariant,
    ) -> Result<SecurityVerdict> {
        self.evaluate(contingency, variant)
    }
}

/// Input of the optimizer: a solved post-contingency variant of one state.
#[derive(Debug, Clone, Copy)]
pub struct PostContingencyState<'a> {
    pub state: StateId,
    pub contingency: &'a Contingency,
    pub variant: &'a NetworkVariant,
}

/// Searches corrective actions for one post-contingency state.
pub trait CorrectiveOptimizer: Send + Sync {
    fn optimize(&self, input: &PostContingencyState<'_>) -> Result<ActionOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationStatus {
    #[default]
    Completed,
    CompletedButNotToSteadyState,
    Failed,
}

/// Opaque steady state reached by the simulator, reused by impact analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub variant: NetworkVariant,
}

#[derive(Debug, Clone)]
pub struct StabilizationReport {
    pub status: StabilizationStatus,
    pub metrics: Metrics,
    pub state: SimulationState,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactReport {
    pub indices: Vec<SecurityIndex>,
    pub metrics: Metrics,
}

/// Time-domain simulator: stabilization, then batched impact analysis.
pub trait DynamicSimulator: Send + Sync {
    fn stabilize(&self, variant: &NetworkVariant) -> Result<StabilizationReport>;

    fn analyze_impact(
        &self,
        state: &SimulationState,
        contingencies: &[ContingencyId],
    ) -> Result<ImpactReport>;
}

/// One instance of every engine a run needs.
#[derive(Clone)]
pub struct Engines {
    pub classifier: Arc<dyn ContingencyClassifier>,
    pub sampler: Arc<dyn Sampler>,
    pub load_flow: Arc<dyn LoadFlowEngine>,
    pub rules: Arc<dyn RuleEvaluator>,
    pub optimizer: Arc<dyn CorrectiveOptimizer>,
    pub simulator: Arc<dyn DynamicSimulator>,
}

impl Engines {
    /// Use one object for every engine role.
    pub fn from_shared<E>(engine: Arc<E>) -> Self
    where
        E: ContingencyClassifier
            + Sampler
            + LoadFlowEngine
            + RuleEvaluator
            + CorrectiveOptimizer
            + DynamicSimulator
            + 'static,
    {
        Self {
            classifier: engine.clone(),
            sampler: engine.clone(),
            load_flow: engine.clone(),
            rules: engine.clone(),
            optimizer: engine.clone(),
            simulator: engine,
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_in_key_order() {
        let report = LoadFlowReport::diverged()
            .with_metric("iterations", 50)
            .with_metric("status", "diverged");
        assert!(!report.converged);
        assert_eq!(
            format_metrics(&report.metrics),
            "{iterations=50, status=diverged}"
        );
        assert_eq!(format_metrics(&Metrics::new()), "{}");
    }
}
