//! Run coordinator: clustering, state fan-out and final persistence.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use osa_core::{
    Contingency, ContingencyCatalog, ContingencyId, Network, NetworkVariant, RunId, StageKind,
    StateId, VariantId, WorkStatus,
};

use crate::config::WorkflowParameters;
use crate::context::{RunAggregates, RunContext};
use crate::engines::{Engines, RulesContext, SamplerContext};
use crate::error::{Error, Result};
use crate::events::{EventBus, RunPhase, WorkflowEvent};
use crate::results::{ForecastAnalysis, RulesTable, WcaTable};
use crate::state_task::{panic_message, Routing, StateReport, StateTask};
use crate::store::{MemoryStore, ResultStore};

/// Short description of a finished run, published with [`WorkflowEvent::RunEnded`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub states: usize,
    pub failed_states: Vec<StateId>,
    pub contingencies_analyzed: usize,
    pub unsafe_contingencies: Vec<ContingencyId>,
    pub contingencies_with_actions: Vec<ContingencyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Why the run stopped before analyzing states, if it did.
    pub failure: Option<String>,
    pub worklist: Vec<ContingencyId>,
    pub status: BTreeMap<StateId, WorkStatus>,
    pub routing: BTreeMap<StateId, Routing>,
    pub results: ForecastAnalysis,
    pub rules_results: RulesTable,
    pub wca_results: WcaTable,
    pub wca_rules_results: RulesTable,
}

impl RunResult {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            states: self.status.len(),
            failed_states: self
                .status
                .iter()
                .filter(|(_, status)| status.failed_stage().is_some())
                .map(|(state, _)| *state)
                .collect(),
            contingencies_analyzed: self.worklist.len(),
            unsafe_contingencies: self.results.unsafe_contingencies(),
            contingencies_with_actions: self.results.contingencies_with_actions(),
            failure: self.failure.clone(),
        }
    }

    pub fn state_status(&self, state: StateId) -> Option<&WorkStatus> {
        self.status.get(&state)
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Tracks how many workers are busy with a state and publishes every change.
struct BusyWorkers {
    busy: AtomicUsize,
    capacity: usize,
    bus: Arc<EventBus>,
}

impl BusyWorkers {
    fn new(capacity: usize, bus: Arc<EventBus>) -> Self {
        Self {
            busy: AtomicUsize::new(0),
            capacity,
            bus,
        }
    }

    fn acquire(&self) -> BusyGuard<'_> {
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(busy);
        BusyGuard { workers: self }
    }

    fn publish(&self, busy: usize) {
        self.bus.publish(WorkflowEvent::BusyWorkers {
            busy,
            capacity: self.capacity,
        });
    }
}

struct BusyGuard<'a> {
    workers: &'a BusyWorkers,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let busy = self.workers.busy.fetch_sub(1, Ordering::SeqCst) - 1;
        self.workers.publish(busy);
    }
}

/// The online security assessment workflow.
///
/// The event bus and the result store are injected per workflow; nothing
/// is shared between workflows.
pub struct Workflow {
    run_id: RunId,
    params: WorkflowParameters,
    engines: Engines,
    store: Arc<dyn ResultStore>,
    bus: Arc<EventBus>,
}

impl Workflow {
    pub fn new(run_id: RunId, params: WorkflowParameters, engines: Engines) -> Self {
        Self {
            run_id,
            params,
            engines,
            store: Arc::new(MemoryStore::new()),
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn params(&self) -> &WorkflowParameters {
        &self.params
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Analyze `network` against `catalog`.
    ///
    /// Never fails: per-state problems end up in the status board, and a
    /// run that cannot proceed reports why in [`RunResult::failure`].
    pub fn run(&self, network: &Network, catalog: &ContingencyCatalog) -> RunResult {
        let started_at = Utc::now();
        info!(
            "{}: starting online workflow on network {} ({} states, {} contingencies)",
            self.run_id,
            network.id,
            self.params.states,
            catalog.len()
        );
        self.bus
            .publish(WorkflowEvent::WorkflowStatus(RunPhase::Running));

        let aggregates = Arc::new(RunAggregates::new(&self.params, self.bus.clone()));
        let mut worklist = Vec::new();
        let mut reports = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(&aggregates, network, catalog, &mut worklist, &mut reports)
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                error!("{}: online workflow failed: {}", self.run_id, err);
                Some(err.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("{}: online workflow failed: {}", self.run_id, message);
                Some(message)
            }
        };

        let result = RunResult {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            failure,
            worklist,
            status: aggregates.board.snapshot(),
            routing: reports
                .into_iter()
                .map(|report| (report.state, report.routing))
                .collect(),
            results: aggregates.results.snapshot(),
            rules_results: aggregates.rules_results.snapshot(),
            wca_results: aggregates.wca_results.snapshot(),
            wca_rules_results: aggregates.wca_rules_results.snapshot(),
        };
        let summary = result.summary();
        info!(
            "{}: analyzed {} states, {} failed, {} unsafe contingencies, {} with corrective actions",
            self.run_id,
            summary.states,
            summary.failed_states.len(),
            summary.unsafe_contingencies.len(),
            summary.contingencies_with_actions.len()
        );

        self.bus
            .publish(WorkflowEvent::WorkflowStatus(RunPhase::Terminated));
        self.persist(&result);
        self.bus.publish(WorkflowEvent::RunEnded(summary));
        result
    }

    fn execute(
        &self,
        aggregates: &Arc<RunAggregates>,
        network: &Network,
        catalog: &ContingencyCatalog,
        worklist_ids: &mut Vec<ContingencyId>,
        reports: &mut Vec<StateReport>,
    ) -> Result<()> {
        self.params.validate()?;
        let base = network.base.derive(VariantId::base(StateId::new(0)));

        self.classify(aggregates, catalog, &base)?;
        let worklist = self.build_worklist(aggregates, catalog);
        worklist_ids.extend(worklist.iter().map(|c| c.id.clone()));
        info!(
            "{}: {} of {} contingencies need analysis",
            self.run_id,
            worklist.len(),
            catalog.len()
        );
        self.init_engines(network, worklist_ids)?;

        let ctx = RunContext {
            run_id: self.run_id.clone(),
            params: self.params.clone(),
            engines: self.engines.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            aggregates: aggregates.clone(),
            worklist,
        };

        let threads = self.params.worker_threads();
        let busy = BusyWorkers::new(threads, self.bus.clone());

        let mut base = base;
        let mut first_state = 0;
        if self.params.basecase_first() {
            let report = {
                let _busy = busy.acquire();
                StateTask::new(&ctx, StateId::new(0), &base, true).run()
            };
            if !report.base_violations.is_empty() {
                let changed = base
                    .loosen_constraints(&report.base_violations, self.params.constraint_margin);
                info!(
                    "{}: relaxed {} basecase limits before sampling",
                    self.run_id, changed
                );
            }
            reports.push(report);
            first_state = 1;
        }

        let states = self.params.states;
        let workers = threads.min((states - first_state) as usize).max(1);
        let next = AtomicU32::new(first_state);
        let sampled = Mutex::new(Vec::new());
        let analyse_basecase = self.params.analyse_basecase;
        let (base, ctx, busy) = (&base, &ctx, &busy);

        // Worker threads pull state indices one at a time, so at most
        // `threads` state tasks run at once. Inner rayon pools installed from
        // these threads block without stealing further states.
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(workers);
            for i in 0..workers {
                let (next, sampled) = (&next, &sampled);
                let handle = std::thread::Builder::new()
                    .name(format!("osa-worker-{}", i))
                    .spawn_scoped(scope, move || loop {
                        let s = next.fetch_add(1, Ordering::SeqCst);
                        if s >= states {
                            break;
                        }
                        let _busy = busy.acquire();
                        let basecase = s == 0 && analyse_basecase;
                        let report = StateTask::new(ctx, StateId::new(s), base, basecase).run();
                        sampled.lock().push(report);
                    })
                    .map_err(|err| Error::Pool(format!("spawning worker {}: {}", i, err)))?;
                handles.push(handle);
            }
            for handle in handles {
                if let Err(payload) = handle.join() {
                    return Err(Error::Pool(panic_message(payload.as_ref())));
                }
            }
            Ok(())
        })?;

        let mut sampled = sampled.into_inner();
        sampled.sort_by_key(|report| report.state);
        reports.extend(sampled);
        Ok(())
    }

    fn classify(
        &self,
        aggregates: &RunAggregates,
        catalog: &ContingencyCatalog,
        base: &NetworkVariant,
    ) -> Result<()> {
        self.bus.publish(WorkflowEvent::WcaRunning(true));
        let assignments = self.engines.classifier.classify(catalog.all(), base);
        self.bus.publish(WorkflowEvent::WcaRunning(false));
        let assignments = assignments.map_err(Error::Clustering)?;

        for assignment in &assignments {
            if catalog.get(&assignment.contingency).is_none() {
                warn!(
                    "{}: clustering returned unknown contingency {}",
                    self.run_id, assignment.contingency
                );
                continue;
            }
            aggregates.wca_results.add(assignment.clone());
        }
        self.bus
            .publish(WorkflowEvent::WcaContingencies(assignments));
        Ok(())
    }

    /// Contingencies to analyze, in catalog order. Outside validation mode
    /// cluster 1 contingencies need no further analysis.
    fn build_worklist(
        &self,
        aggregates: &RunAggregates,
        catalog: &ContingencyCatalog,
    ) -> Vec<Arc<Contingency>> {
        catalog
            .all()
            .iter()
            .filter(|contingency| {
                self.params.validation
                    || aggregates
                        .wca_results
                        .cluster(&contingency.id)
                        .map_or(true, |cluster| cluster.needs_analysis())
            })
            .cloned()
            .collect()
    }

    fn init_engines(&self, network: &Network, worklist: &[ContingencyId]) -> Result<()> {
        let sampler_context = SamplerContext {
            states: self.params.states,
            time_horizon: self.params.time_horizon,
            case_date: self.params.case_date.unwrap_or(network.case_date),
        };
        self.engines
            .sampler
            .init(&sampler_context)
            .map_err(|err| Error::engine(StageKind::Sampling, err))?;

        let rules_context = RulesContext {
            contingencies: worklist.to_vec(),
            purity_threshold: self.params.rules_purity_threshold,
            index_kinds: self.params.security_index_kinds.clone(),
            validation: self.params.validation,
            handle_violations_in_base_state: self.params.handle_violations_in_base_state,
            time_horizon: self.params.time_horizon,
        };
        self.engines
            .rules
            .init(&rules_context)
            .map_err(|err| Error::engine(StageKind::SecurityRules, err))
    }

    fn persist(&self, result: &RunResult) {
        let run = &self.run_id;
        let store = self.store.as_ref();
        let outcomes = [
            ("parameters", store.store_parameters(run, &self.params)),
            ("status", store.store_status(run, &result.status)),
            ("results", store.store_results(run, &result.results)),
            (
                "rules results",
                store.store_rules_results(run, &result.rules_results),
            ),
            (
                "WCA results",
                store.store_wca_results(run, &result.wca_results),
            ),
        ];
        for (what, outcome) in outcomes {
            if let Err(err) = outcome {
                warn!("{}: failed to store {}: {:#}", run, what, err);
            }
        }
        if self.params.validation {
            if let Err(err) = store.store_wca_rules_results(run, &result.wca_rules_results) {
                warn!("{}: failed to store WCA rules results: {:#}", run, err);
            }
        }
    }
}
