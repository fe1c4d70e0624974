//! Shared state of one run, handed to every state task.

use std::sync::Arc;

use osa_core::{
    Contingency, ContingencyId, LimitViolation, NetworkVariant, OnlineStep, RunId, StateId,
};
use tracing::warn;

use crate::config::WorkflowParameters;
use crate::engines::{Engines, Metrics};
use crate::events::EventBus;
use crate::results::{ForecastAnalysisResults, SecurityRulesResults, WcaResults};
use crate::status::StatusBoard;
use crate::store::ResultStore;

/// Aggregates written while a run progresses.
pub(crate) struct RunAggregates {
    pub board: StatusBoard,
    pub results: ForecastAnalysisResults,
    pub rules_results: SecurityRulesResults,
    pub wca_results: WcaResults,
    pub wca_rules_results: SecurityRulesResults,
}

impl RunAggregates {
    pub fn new(params: &WorkflowParameters, bus: Arc<EventBus>) -> Self {
        Self {
            board: StatusBoard::new(params.time_horizon, bus),
            results: ForecastAnalysisResults::new(),
            rules_results: SecurityRulesResults::new(),
            wca_results: WcaResults::new(),
            wca_rules_results: SecurityRulesResults::new(),
        }
    }
}

pub(crate) struct RunContext {
    pub run_id: RunId,
    pub params: WorkflowParameters,
    pub engines: Engines,
    pub store: Arc<dyn ResultStore>,
    pub bus: Arc<EventBus>,
    pub aggregates: Arc<RunAggregates>,
    /// Contingencies analyzed in every state, in catalog order.
    pub worklist: Vec<Arc<Contingency>>,
}

impl RunContext {
    pub fn board(&self) -> &StatusBoard {
        &self.aggregates.board
    }

    pub fn contingency(&self, id: &ContingencyId) -> Option<&Arc<Contingency>> {
        self.worklist.iter().find(|c| &c.id == id)
    }

    /// Run a store call, logging instead of propagating its failure.
    pub fn persist(
        &self,
        what: &str,
        call: impl FnOnce(&dyn ResultStore, &RunId) -> anyhow::Result<()>,
    ) {
        if let Err(err) = call(self.store.as_ref(), &self.run_id) {
            warn!("{}: failed to store {}: {:#}", self.run_id, what, err);
        }
    }

    pub fn store_metrics(&self, state: StateId, step: OnlineStep, metrics: &Metrics) {
        if !metrics.is_empty() {
            self.persist("metrics", |store, run| {
                store.store_metrics(run, state, step, metrics)
            });
        }
    }

    pub fn store_violations(&self, state: StateId, step: OnlineStep, violations: &[LimitViolation]) {
        if !violations.is_empty() {
            self.persist("violations", |store, run| {
                store.store_violations(run, state, step, violations)
            });
        }
    }

    pub fn store_state(&self, state: StateId, variant: &NetworkVariant) {
        self.persist("state", |store, run| store.store_state(run, state, variant));
    }
}
