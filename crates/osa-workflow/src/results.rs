//! Run-level result aggregates.
//!
//! Aggregates are written concurrently by state tasks and read by observers
//! and the coordinator. Each map sits behind its own `RwLock`; readers take a
//! snapshot, which only ever grows while the run is in progress. Maps are
//! ordered so a snapshot does not depend on the order states finished in.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use osa_core::{
    ActionOutcome, ClusterAssignment, ClusterNum, ContingencyId, SecurityIndex, SecurityVerdict,
    StateId,
};

/// `contingency → state → verdict`.
pub type RulesTable = BTreeMap<ContingencyId, BTreeMap<StateId, SecurityVerdict>>;

/// `contingency → cluster assignment`.
pub type WcaTable = BTreeMap<ContingencyId, ClusterAssignment>;

/// Optimizer outcomes and simulation indices of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastAnalysis {
    /// `contingency → state → optimizer outcome`.
    #[serde(default)]
    pub actions: BTreeMap<ContingencyId, BTreeMap<StateId, ActionOutcome>>,
    /// `contingency → state → security indices` of simulated pairs.
    #[serde(default)]
    pub indexes: BTreeMap<ContingencyId, BTreeMap<StateId, Vec<SecurityIndex>>>,
}

impl ForecastAnalysis {
    /// Contingencies with at least one state where actions were found.
    pub fn contingencies_with_actions(&self) -> Vec<ContingencyId> {
        self.actions
            .iter()
            .filter(|(_, states)| states.values().any(|outcome| outcome.actions_found))
            .map(|(contingency, _)| contingency.clone())
            .collect()
    }

    /// States of `contingency` made safe by corrective actions.
    pub fn unsafe_states_with_actions(&self, contingency: &ContingencyId) -> Vec<StateId> {
        self.actions
            .get(contingency)
            .map(|states| {
                states
                    .iter()
                    .filter(|(_, outcome)| outcome.actions_found)
                    .map(|(state, _)| *state)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn action_outcome(
        &self,
        contingency: &ContingencyId,
        state: StateId,
    ) -> Option<&ActionOutcome> {
        self.actions.get(contingency)?.get(&state)
    }

    pub fn action_ids(&self, contingency: &ContingencyId, state: StateId) -> Vec<String> {
        self.action_outcome(contingency, state)
            .map(ActionOutcome::action_ids)
            .unwrap_or_default()
    }

    /// Contingencies with at least one unstable state.
    pub fn unsafe_contingencies(&self) -> Vec<ContingencyId> {
        self.indexes
            .keys()
            .filter(|contingency| !self.unstable_states(contingency).is_empty())
            .cloned()
            .collect()
    }

    /// States where some security index of `contingency` is not ok.
    pub fn unstable_states(&self, contingency: &ContingencyId) -> Vec<StateId> {
        self.indexes
            .get(contingency)
            .map(|states| {
                states
                    .iter()
                    .filter(|(_, indices)| indices.iter().any(|index| !index.ok))
                    .map(|(state, _)| *state)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn indexes(&self, contingency: &ContingencyId, state: StateId) -> Vec<SecurityIndex> {
        self.indexes
            .get(contingency)
            .and_then(|states| states.get(&state))
            .cloned()
            .unwrap_or_default()
    }
}

/// Concurrent writer side of [`ForecastAnalysis`].
#[derive(Debug, Default)]
pub struct ForecastAnalysisResults {
    actions: RwLock<BTreeMap<ContingencyId, BTreeMap<StateId, ActionOutcome>>>,
    indexes: RwLock<BTreeMap<ContingencyId, BTreeMap<StateId, Vec<SecurityIndex>>>>,
}

impl ForecastAnalysisResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&self, contingency: ContingencyId, state: StateId, outcome: ActionOutcome) {
        self.actions
            .write()
            .entry(contingency)
            .or_default()
            .insert(state, outcome);
    }

    pub fn add_indexes(
        &self,
        contingency: ContingencyId,
        state: StateId,
        indices: Vec<SecurityIndex>,
    ) {
        self.indexes
            .write()
            .entry(contingency)
            .or_default()
            .insert(state, indices);
    }

    pub fn snapshot(&self) -> ForecastAnalysis {
        ForecastAnalysis {
            actions: self.actions.read().clone(),
            indexes: self.indexes.read().clone(),
        }
    }
}

/// Security-rule verdicts of a run.
#[derive(Debug, Default)]
pub struct SecurityRulesResults {
    verdicts: RwLock<RulesTable>,
}

impl SecurityRulesResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, contingency: ContingencyId, state: StateId, verdict: SecurityVerdict) {
        self.verdicts
            .write()
            .entry(contingency)
            .or_default()
            .insert(state, verdict);
    }

    pub fn verdict(&self, contingency: &ContingencyId, state: StateId) -> Option<SecurityVerdict> {
        self.verdicts.read().get(contingency)?.get(&state).cloned()
    }

    pub fn contingencies(&self) -> Vec<ContingencyId> {
        self.verdicts.read().keys().cloned().collect()
    }

    pub fn states(&self, contingency: &ContingencyId) -> Vec<StateId> {
        self.verdicts
            .read()
            .get(contingency)
            .map(|states| states.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of recorded `(contingency, state)` verdicts.
    pub fn len(&self) -> usize {
        self.verdicts.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> RulesTable {
        self.verdicts.read().clone()
    }
}

/// Worst-case clustering of a run.
#[derive(Debug, Default)]
pub struct WcaResults {
    clusters: RwLock<WcaTable>,
}

impl WcaResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, assignment: ClusterAssignment) {
        self.clusters
            .write()
            .insert(assignment.contingency.clone(), assignment);
    }

    pub fn cluster(&self, contingency: &ContingencyId) -> Option<ClusterNum> {
        self.clusters.read().get(contingency).map(|a| a.cluster)
    }

    pub fn contingencies_in(&self, cluster: ClusterNum) -> Vec<ContingencyId> {
        self.clusters
            .read()
            .values()
            .filter(|assignment| assignment.cluster == cluster)
            .map(|assignment| assignment.contingency.clone())
            .collect()
    }

    pub fn snapshot(&self) -> WcaTable {
        self.clusters.read().clone()
    }
}
