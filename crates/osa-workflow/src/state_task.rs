//! Analysis pipeline of one sampled state.
//!
//! ```text
//! SAMPLING → LOAD_FLOW ──(diverged)──▶ stop
//!                │
//!                ▼
//!         SECURITY_RULES ──(all safe)──▶ stop
//!                │
//!                ▼
//!           OPTIMIZER ──(no actions, errors, diverged)──┐
//!                │                                      ▼
//!                └──────────────────────────────▶ TIME_DOMAIN_SIM
//! ```
//!
//! Contingencies flow through two sets built by the rule stage:
//! `for_optimizer` and `for_simulator`. The optimizer may move more
//! contingencies into `for_simulator`; simulation is the conservative
//! fallback for anything the cheaper stages could not settle.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use osa_core::{
    Contingency, ContingencyId, LimitViolation, NetworkVariant, OnlineStep, SecurityIndex,
    SecurityStatus, StageKind, StageStatus, StateId, VariantId,
};

use crate::cache::DerivedStateCache;
use crate::context::RunContext;
use crate::engines::{format_metrics, StabilizationStatus};
use crate::error::{Error, Result};
use crate::events::WorkflowEvent;
use crate::executors::{StageExecutor, StageOutput};

/// Contingencies routed to the optimizer and to time-domain simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub for_optimizer: BTreeSet<ContingencyId>,
    pub for_simulator: BTreeSet<ContingencyId>,
}

/// What a finished state task hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct StateReport {
    pub state: StateId,
    pub routing: Routing,
    /// Basecase violations to relax before the sampled states run.
    pub base_violations: Vec<LimitViolation>,
}

impl StateReport {
    fn new(state: StateId) -> Self {
        Self {
            state,
            routing: Routing::default(),
            base_violations: Vec::new(),
        }
    }
}

pub(crate) struct StateTask<'a> {
    ctx: &'a RunContext,
    state: StateId,
    base: &'a NetworkVariant,
    basecase: bool,
    cache: DerivedStateCache,
}

impl<'a> StateTask<'a> {
    pub fn new(ctx: &'a RunContext, state: StateId, base: &'a NetworkVariant, basecase: bool) -> Self {
        Self {
            ctx,
            state,
            base,
            basecase,
            cache: DerivedStateCache::new(ctx.engines.load_flow.clone()),
        }
    }

    /// Run the pipeline. Errors and panics fail the active stage and end
    /// the task; they never propagate.
    pub fn run(self) -> StateReport {
        let mut report = StateReport::new(self.state);
        self.ctx.board().register(self.state);
        info!(
            "{}: starting analysis{}",
            self.state,
            if self.basecase { " of the basecase" } else { "" }
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut report)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.fail_active_stage(&error_cause(&err)),
            Err(payload) => self.fail_active_stage(&panic_message(payload.as_ref())),
        }
        info!(
            "{}: analysis ended after {} derived states",
            self.state,
            self.cache.derivations()
        );
        report
    }

    fn execute(&self, report: &mut StateReport) -> Result<()> {
        let exec = StageExecutor::new(self.ctx, self.state);
        let params = &self.ctx.params;

        let Some(mut variant) = exec.run(StageKind::Sampling, || {
            let mut variant = self.base.derive(VariantId::base(self.state));
            if !self.basecase {
                exec.sample(&mut variant)?;
            }
            Ok(StageOutput::Success(variant))
        })?
        else {
            return Ok(());
        };

        let Some(violations) = exec.run(StageKind::LoadFlow, || {
            let lf = exec.solve_load_flow(&mut variant)?;
            if params.store_states {
                self.ctx.store_state(self.state, &variant);
            }
            if !lf.converged {
                return Ok(StageOutput::Failed(format!(
                    "load flow does not converge: metrics = {}",
                    format_metrics(&lf.metrics)
                )));
            }
            let violations = variant.check_limits(params.limit_reduction);
            self.ctx
                .store_violations(self.state, OnlineStep::LoadFlow, &violations);
            Ok(StageOutput::Success(violations))
        })?
        else {
            return Ok(());
        };

        if self.basecase && params.handle_violations_in_base_state && !violations.is_empty() {
            let changed = variant.loosen_constraints(&violations, params.constraint_margin);
            info!(
                "{}: relaxed {} violated basecase limits",
                self.state, changed
            );
            report.base_violations = violations;
        }

        let Some(globally_safe) = exec.run(StageKind::SecurityRules, || {
            let safe = self.apply_security_rules(&exec, &variant, &mut report.routing)?;
            self.check_post_contingency_violations(&variant)?;
            Ok(StageOutput::Success(safe))
        })?
        else {
            return Ok(());
        };

        if globally_safe && !params.validation {
            info!("{}: state is safe for every contingency", self.state);
            return Ok(());
        }

        if !report.routing.for_optimizer.is_empty() {
            let rerouted = exec
                .run(StageKind::Optimizer, || {
                    let rerouted = self.run_optimizer(&exec, &variant, &report.routing)?;
                    Ok(StageOutput::Success(rerouted))
                })?
                .unwrap_or_default();
            if !rerouted.is_empty() {
                info!(
                    "{}: {} contingencies rerouted to time-domain simulation",
                    self.state,
                    rerouted.len()
                );
            }
            report.routing.for_simulator.extend(rerouted);
        }

        if !report.routing.for_simulator.is_empty() {
            exec.run(StageKind::TimeDomainSim, || {
                self.run_simulation(&exec, &variant, &report.routing.for_simulator)
            })?;
        }
        Ok(())
    }

    /// Evaluate every contingency of the worklist and route it.
    ///
    /// Returns whether the state is safe for every contingency.
    fn apply_security_rules(
        &self,
        exec: &StageExecutor<'_>,
        variant: &NetworkVariant,
        routing: &mut Routing,
    ) -> Result<bool> {
        let validation = self.ctx.params.validation;
        let aggregates = &self.ctx.aggregates;
        let mut safe = true;

        for contingency in &self.ctx.worklist {
            let verdict = exec.evaluate_rules(contingency, variant)?;
            let id = contingency.id.clone();

            if !verdict.rules_available || verdict.status == SecurityStatus::Unsafe {
                routing.for_simulator.insert(id.clone());
                safe = false;
            } else if verdict.status == SecurityStatus::SafeWithCorrectiveActions {
                routing.for_optimizer.insert(id.clone());
                if validation {
                    routing.for_simulator.insert(id.clone());
                }
                safe = false;
            } else if validation {
                routing.for_optimizer.insert(id.clone());
                routing.for_simulator.insert(id.clone());
            }

            aggregates
                .rules_results
                .add(id.clone(), self.state, verdict.clone());
            self.ctx.bus.publish(WorkflowEvent::SecurityRules {
                state: self.state,
                contingency: id.clone(),
                verdict,
            });

            if validation {
                let wca_verdict = exec.evaluate_wca_rules(contingency, variant)?;
                aggregates
                    .wca_rules_results
                    .add(id, self.state, wca_verdict);
            }
        }
        Ok(safe)
    }

    /// Store the limit violations of every post-contingency variant.
    fn check_post_contingency_violations(&self, variant: &NetworkVariant) -> Result<()> {
        let worklist = &self.ctx.worklist;
        if worklist.is_empty() {
            return Ok(());
        }
        let limit_reduction = self.ctx.params.limit_reduction;
        inner_pool(self.state, worklist.len())?.install(|| {
            worklist.par_iter().for_each(|contingency| {
                let derived = self.cache.get_or_compute(variant, contingency);
                let violations = if derived.converged {
                    derived.variant.check_limits(limit_reduction)
                } else {
                    Vec::new()
                };
                self.ctx.persist("post-contingency violations", |store, run| {
                    store.store_post_contingency_violations(
                        run,
                        self.state,
                        &contingency.id,
                        derived.converged,
                        &violations,
                    )
                });
            })
        });
        Ok(())
    }

    /// Optimize every contingency of `for_optimizer` concurrently.
    ///
    /// Returns the contingencies to hand over to time-domain simulation.
    fn run_optimizer(
        &self,
        exec: &StageExecutor<'_>,
        variant: &NetworkVariant,
        routing: &Routing,
    ) -> Result<BTreeSet<ContingencyId>> {
        let contingencies = routing
            .for_optimizer
            .iter()
            .map(|id| {
                self.ctx
                    .contingency(id)
                    .cloned()
                    .ok_or_else(|| osa_core::CoreError::UnknownContingency(id.to_string()))
            })
            .collect::<std::result::Result<Vec<Arc<Contingency>>, _>>()?;

        let rerouted = inner_pool(self.state, contingencies.len())?.install(|| {
            contingencies
                .par_iter()
                .filter_map(|contingency| self.optimize_one(exec, variant, contingency))
                .collect()
        });
        Ok(rerouted)
    }

    fn optimize_one(
        &self,
        exec: &StageExecutor<'_>,
        variant: &NetworkVariant,
        contingency: &Contingency,
    ) -> Option<ContingencyId> {
        let derived = self.cache.get_or_compute(variant, contingency);
        if !derived.converged {
            warn!(
                "{}: post-contingency load flow of {} does not converge, skipping optimizer",
                self.state, contingency.id
            );
            return Some(contingency.id.clone());
        }

        let outcome = exec.optimize(contingency, &derived.variant);
        let actions_found = outcome.actions_found;
        let action_ids = outcome.action_ids();
        self.ctx
            .aggregates
            .results
            .add_action(contingency.id.clone(), self.state, outcome);
        self.ctx.bus.publish(WorkflowEvent::Actions {
            state: self.state,
            contingency: contingency.id.clone(),
            actions_found,
            action_ids,
        });
        (!actions_found && !self.ctx.params.validation).then(|| contingency.id.clone())
    }

    fn run_simulation(
        &self,
        exec: &StageExecutor<'_>,
        variant: &NetworkVariant,
        for_simulator: &BTreeSet<ContingencyId>,
    ) -> Result<StageOutput<()>> {
        let stabilization = exec.stabilize(variant)?;
        if stabilization.status != StabilizationStatus::Completed {
            return Ok(StageOutput::Failed(format!(
                "time-domain simulation failed (stabilization): metrics = {}",
                format_metrics(&stabilization.metrics)
            )));
        }

        let contingencies: Vec<ContingencyId> = for_simulator.iter().cloned().collect();
        let impact = exec.analyze_impact(&stabilization, &contingencies)?;
        let indices = filter_indices(
            impact.indices,
            self.ctx.params.security_index_kinds.as_deref(),
        );

        let mut per_contingency: BTreeMap<ContingencyId, Vec<SecurityIndex>> = BTreeMap::new();
        for index in indices {
            per_contingency
                .entry(index.contingency.clone())
                .or_default()
                .push(index);
        }

        let validation = self.ctx.params.validation;
        for (contingency, indices) in per_contingency {
            let safe = indices.iter().all(|index| index.ok);
            if !safe {
                info!("{}: contingency {} is unstable", self.state, contingency);
            }
            if !safe || validation {
                self.ctx.aggregates.results.add_indexes(
                    contingency.clone(),
                    self.state,
                    indices.clone(),
                );
            }
            self.ctx.bus.publish(WorkflowEvent::SecurityIndexes {
                state: self.state,
                contingency,
                indices,
            });
        }
        Ok(StageOutput::Success(()))
    }

    /// Fail the running stage, or the first idle one when the error hit
    /// between stages.
    fn fail_active_stage(&self, cause: &str) {
        let board = self.ctx.board();
        let stage = board.running_stage(self.state).or_else(|| {
            StageKind::ALL
                .iter()
                .copied()
                .find(|stage| board.status(self.state, *stage) == StageStatus::Idle)
        });
        let Some(stage) = stage else {
            error!("{}: analysis failed: {}", self.state, cause);
            return;
        };
        error!("{}: {} failed: {}", self.state, stage, cause);
        let detail = format!("{} failed: {}", stage, cause);
        if let Err(err) = board.fail(self.state, stage, &detail) {
            error!("{}: could not record failure: {}", self.state, err);
        }
    }
}

/// Keep the indices of the configured kinds; keep all if none matches.
fn filter_indices(
    indices: Vec<SecurityIndex>,
    kinds: Option<&[osa_core::SecurityIndexKind]>,
) -> Vec<SecurityIndex> {
    let Some(kinds) = kinds else {
        return indices;
    };
    let filtered: Vec<SecurityIndex> = indices
        .iter()
        .filter(|index| kinds.contains(&index.kind))
        .cloned()
        .collect();
    if filtered.is_empty() {
        indices
    } else {
        filtered
    }
}

fn inner_pool(state: StateId, contingencies: usize) -> Result<ThreadPool> {
    let threads = contingencies.clamp(1, num_cpus::get().max(1));
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("osa-state-{}-{}", state, i))
        .build()
        .map_err(Error::from)
}

fn error_cause(err: &Error) -> String {
    match err {
        Error::Engine { source, .. } => format!("{:#}", source),
        other => other.to_string(),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with unknown payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_core::SecurityIndexKind;

    fn index(kind: SecurityIndexKind, ok: bool) -> SecurityIndex {
        SecurityIndex::new(ContingencyId::new("C1"), kind, ok)
    }

    #[test]
    fn index_filter_falls_back_to_all_kinds() {
        let indices = vec![
            index(SecurityIndexKind::Transient, false),
            index(SecurityIndexKind::Overload, true),
        ];

        let kept = filter_indices(indices.clone(), Some(&[SecurityIndexKind::Overload]));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind, SecurityIndexKind::Overload);

        let fallback = filter_indices(indices.clone(), Some(&[SecurityIndexKind::SmallSignal]));
        assert_eq!(fallback, indices);

        assert_eq!(filter_indices(indices.clone(), None).len(), 2);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(payload.as_ref()), "panic: index out of bounds");
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "panic: boom");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "panic with unknown payload");
    }

    #[test]
    fn engine_errors_report_their_root_cause() {
        let err = Error::engine(
            StageKind::SecurityRules,
            anyhow::anyhow!("rule file missing").context("evaluating security rules of C1"),
        );
        assert_eq!(
            error_cause(&err),
            "evaluating security rules of C1: rule file missing"
        );
    }
}
