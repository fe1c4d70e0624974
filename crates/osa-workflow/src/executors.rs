//! Stage executors: the uniform wrapper around engine calls.
//!
//! [`StageExecutor::run`] marks a stage `RUNNING`, calls the stage body and
//! marks it `SUCCESS` or `FAILED` depending on what the body reports. An
//! `Err` from the body leaves the stage `RUNNING`; the state task boundary
//! fails whichever stage is still running.

use std::time::Instant;

use anyhow::Context;
use tracing::{info, info_span, warn};

use osa_core::{
    ActionOutcome, Contingency, ContingencyId, NetworkVariant, OnlineStep, SecurityVerdict,
    StageKind, StageStatus, StateId,
};

use crate::context::RunContext;
use crate::engines::{ImpactReport, LoadFlowReport, PostContingencyState, StabilizationReport};
use crate::error::{Error, Result};

/// What a stage body reports when it returns normally.
#[derive(Debug)]
pub enum StageOutput<T> {
    Success(T),
    /// The stage ended unsuccessfully without an error (e.g. non-convergence).
    Failed(String),
}

pub struct StageExecutor<'a> {
    ctx: &'a RunContext,
    state: StateId,
}

impl<'a> StageExecutor<'a> {
    pub(crate) fn new(ctx: &'a RunContext, state: StateId) -> Self {
        Self { ctx, state }
    }

    /// Run `body` as `stage`. Returns `None` when the stage failed.
    pub fn run<T>(
        &self,
        stage: StageKind,
        body: impl FnOnce() -> Result<StageOutput<T>>,
    ) -> Result<Option<T>> {
        let span = info_span!("stage", state = %self.state, stage = %stage);
        let _enter = span.enter();

        let board = self.ctx.board();
        board.set(self.state, stage, StageStatus::Running)?;
        info!("{}: {} running", self.state, stage);
        let started = Instant::now();

        let output = body()?;
        let elapsed = started.elapsed();
        match output {
            StageOutput::Success(value) => {
                board.set(self.state, stage, StageStatus::Success)?;
                info!(
                    "{}: {} succeeded in {:.3}s",
                    self.state,
                    stage,
                    elapsed.as_secs_f64()
                );
                Ok(Some(value))
            }
            StageOutput::Failed(detail) => {
                board.fail(self.state, stage, &detail)?;
                warn!(
                    "{}: {} failed after {:.3}s: {}",
                    self.state,
                    stage,
                    elapsed.as_secs_f64(),
                    detail
                );
                Ok(None)
            }
        }
    }

    pub fn sample(&self, variant: &mut NetworkVariant) -> Result<()> {
        self.ctx
            .engines
            .sampler
            .sample(self.state, variant)
            .with_context(|| format!("sampling state {}", self.state))
            .map_err(|err| Error::engine(StageKind::Sampling, err))
    }

    /// Solve the load flow of the state variant and persist its metrics.
    pub fn solve_load_flow(&self, variant: &mut NetworkVariant) -> Result<LoadFlowReport> {
        let report = self
            .ctx
            .engines
            .load_flow
            .solve(variant)
            .with_context(|| format!("solving load flow of {}", variant.id))
            .map_err(|err| Error::engine(StageKind::LoadFlow, err))?;
        self.ctx
            .store_metrics(self.state, OnlineStep::LoadFlow, &report.metrics);
        Ok(report)
    }

    pub fn evaluate_rules(
        &self,
        contingency: &Contingency,
        variant: &NetworkVariant,
    ) -> Result<SecurityVerdict> {
        self.ctx
            .engines
            .rules
            .evaluate(contingency, variant)
            .with_context(|| format!("evaluating security rules of {}", contingency.id))
            .map_err(|err| Error::engine(StageKind::SecurityRules, err))
    }

    pub fn evaluate_wca_rules(
        &self,
        contingency: &Contingency,
        variant: &NetworkVariant,
    ) -> Result<SecurityVerdict> {
        self.ctx
            .engines
            .rules
            .evaluate_wca(contingency, variant)
            .with_context(|| format!("evaluating WCA security rules of {}", contingency.id))
            .map_err(|err| Error::engine(StageKind::SecurityRules, err))
    }

    /// Run the optimizer; an optimizer error becomes a failure outcome.
    pub fn optimize(&self, contingency: &Contingency, variant: &NetworkVariant) -> ActionOutcome {
        let input = PostContingencyState {
            state: self.state,
            contingency,
            variant,
        };
        match self.ctx.engines.optimizer.optimize(&input) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "{}: optimizer failed for contingency {}: {:#}",
                    self.state, contingency.id, err
                );
                ActionOutcome::execution_error(contingency.id.clone(), format!("{:#}", err))
            }
        }
    }

    pub fn stabilize(&self, variant: &NetworkVariant) -> Result<StabilizationReport> {
        let report = self
            .ctx
            .engines
            .simulator
            .stabilize(variant)
            .with_context(|| format!("stabilizing {}", variant.id))
            .map_err(|err| Error::engine(StageKind::TimeDomainSim, err))?;
        self.ctx
            .store_metrics(self.state, OnlineStep::Stabilization, &report.metrics);
        Ok(report)
    }

    pub fn analyze_impact(
        &self,
        report: &StabilizationReport,
        contingencies: &[ContingencyId],
    ) -> Result<ImpactReport> {
        let impact = self
            .ctx
            .engines
            .simulator
            .analyze_impact(&report.state, contingencies)
            .with_context(|| {
                format!(
                    "analyzing impact of {} contingencies on state {}",
                    contingencies.len(),
                    self.state
                )
            })
            .map_err(|err| Error::engine(StageKind::TimeDomainSim, err))?;
        self.ctx
            .store_metrics(self.state, OnlineStep::ImpactAnalysis, &impact.metrics);
        Ok(impact)
    }
}
