//! # osa-workflow: online security assessment orchestration
//!
//! Runs the per-state analysis pipeline over many sampled operating states
//! and aggregates the per-(state, contingency) verdicts of a run.
//!
//! ## Pipeline
//!
//! 1. Worst-case clustering sorts the contingency catalog; cluster 1
//!    contingencies need no further analysis outside validation runs.
//! 2. Every state runs `SAMPLING → LOAD_FLOW → SECURITY_RULES → OPTIMIZER →
//!    TIME_DOMAIN_SIM` on a worker pool, branching on what each stage finds.
//! 3. Results, verdicts and per-state status are persisted through a
//!    [`ResultStore`] and published on the run's [`EventBus`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use osa_core::RunId;
//! use osa_workflow::{Engines, ScriptedCase, ScriptedEngine, Workflow, WorkflowParameters};
//!
//! let case = ScriptedCase::from_yaml_str(r#"
//! network:
//!   id: demo
//!   case_date: 2024-01-15T10:00:00Z
//!   quantities: { L1: 80.0 }
//! contingencies:
//!   - id: N1_L1
//!     elements: [{ type: branch, id: L1 }]
//!     verdict: UNSAFE
//!     indices: [{ kind: TRANSIENT, ok: false }]
//! "#).unwrap();
//!
//! let network = case.network();
//! let catalog = case.catalog().unwrap();
//! let engine = ScriptedEngine::new(case);
//! let params = WorkflowParameters { threads: 1, ..Default::default() };
//!
//! let workflow = Workflow::new(RunId::new("doc"), params, Engines::from_shared(engine));
//! let result = workflow.run(&network, &catalog);
//! assert_eq!(result.results.unsafe_contingencies().len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`] - the run coordinator and its result
//! - [`engines`] - traits of the external analysis engines
//! - [`cache`] - per-state cache of post-contingency variants
//! - [`executors`] - uniform stage execution
//! - [`results`] / [`status`] - run aggregates and per-state status
//! - [`events`] - typed events, observers and the event bus
//! - [`store`] - result persistence
//! - [`config`] - workflow parameters
//! - [`scripted`] - deterministic engines driven by a case file

pub mod cache;
pub mod config;
pub(crate) mod context;
pub mod coordinator;
pub mod engines;
pub mod error;
pub mod events;
pub mod executors;
pub mod results;
pub mod scripted;
pub mod state_task;
pub mod status;
pub mod store;

pub use cache::{DerivedState, DerivedStateCache};
pub use config::WorkflowParameters;
pub use coordinator::{RunResult, RunSummary, Workflow};
pub use engines::{
    ContingencyClassifier, CorrectiveOptimizer, DynamicSimulator, Engines, ImpactReport,
    LoadFlowEngine, LoadFlowReport, Metrics, PostContingencyState, RuleEvaluator, RulesContext,
    Sampler, SamplerContext, SimulationState, StabilizationReport, StabilizationStatus,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventLog, RunPhase, TracingObserver, WorkflowEvent, WorkflowObserver};
pub use results::{
    ForecastAnalysis, ForecastAnalysisResults, RulesTable, SecurityRulesResults, WcaResults,
    WcaTable,
};
pub use scripted::{CallCounts, ScriptedCase, ScriptedEngine};
pub use state_task::{Routing, StateReport};
pub use status::StatusBoard;
pub use store::{JsonStore, MemoryStore, PostContingencyViolations, ResultStore, StoredRun};
