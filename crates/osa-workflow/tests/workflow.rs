use std::sync::Arc;

use osa_core::{
    ContingencyId, OptimizerStatus, RunId, SecurityStatus, StageKind, StageStatus, StateId,
};
use osa_workflow::{
    Engines, EventLog, RunResult, ScriptedCase, ScriptedEngine, Workflow, WorkflowEvent,
    WorkflowParameters,
};

const NETWORK: &str = r#"
network:
  id: test-grid
  name: Test grid
  case_date: 2024-03-01T12:00:00Z
  quantities: { L1: 80.0, L2: 40.0, G1: 200.0 }
  limits:
    L1: { kind: CURRENT, value: 100.0 }
    L2: { kind: CURRENT, value: 100.0 }
"#;

fn case(body: &str) -> ScriptedCase {
    ScriptedCase::from_yaml_str(&format!("{}{}", NETWORK, body)).unwrap()
}

fn run(case: ScriptedCase, params: WorkflowParameters) -> (RunResult, Arc<ScriptedEngine>) {
    let network = case.network();
    let catalog = case.catalog().unwrap();
    let engine = ScriptedEngine::new(case);
    let workflow = Workflow::new(
        RunId::new("test-run"),
        params,
        Engines::from_shared(engine.clone()),
    );
    (workflow.run(&network, &catalog), engine)
}

fn run_observed(case: ScriptedCase, params: WorkflowParameters) -> (RunResult, usize) {
    let network = case.network();
    let catalog = case.catalog().unwrap();
    let log = Arc::new(EventLog::new());
    let workflow = Workflow::new(
        RunId::new("observed-run"),
        params,
        Engines::from_shared(ScriptedEngine::new(case)),
    );
    workflow.bus().register(log.clone());
    let result = workflow.run(&network, &catalog);
    let max_busy = log
        .events()
        .iter()
        .filter_map(|event| match event {
            WorkflowEvent::BusyWorkers { busy, .. } => Some(*busy),
            _ => None,
        })
        .max()
        .unwrap_or_default();
    (result, max_busy)
}

fn params(states: u32, threads: usize) -> WorkflowParameters {
    WorkflowParameters {
        states,
        threads,
        ..Default::default()
    }
}

fn c(id: &str) -> ContingencyId {
    ContingencyId::new(id)
}

fn status(result: &RunResult, state: u32, stage: StageKind) -> StageStatus {
    result
        .state_status(StateId::new(state))
        .map(|status| status.status(stage))
        .unwrap_or_default()
}

#[test]
fn safe_state_stops_after_security_rules() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: SAFE
"#,
    );
    let (result, engine) = run(case, params(1, 1));

    assert!(result.failure.is_none());
    assert_eq!(status(&result, 0, StageKind::Sampling), StageStatus::Success);
    assert_eq!(status(&result, 0, StageKind::LoadFlow), StageStatus::Success);
    assert_eq!(status(&result, 0, StageKind::SecurityRules), StageStatus::Success);
    assert_eq!(status(&result, 0, StageKind::Optimizer), StageStatus::Idle);
    assert_eq!(status(&result, 0, StageKind::TimeDomainSim), StageStatus::Idle);
    assert!(result.results.indexes.is_empty());

    let calls = engine.calls();
    assert_eq!(calls.sample, 0, "the basecase is not sampled");
    assert_eq!(calls.optimize, 0);
    assert_eq!(calls.stabilize, 0);
    assert_eq!(calls.analyze_impact, 0);
}

#[test]
fn unsafe_verdict_with_failing_index_marks_contingency_unsafe() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: UNSAFE
    indices: [{ kind: TRANSIENT, ok: false }, { kind: OVERLOAD, ok: true }]
"#,
    );
    let (result, engine) = run(case, params(1, 1));

    assert_eq!(result.results.unsafe_contingencies(), vec![c("C1")]);
    assert_eq!(result.results.unstable_states(&c("C1")), vec![StateId::new(0)]);
    assert_eq!(status(&result, 0, StageKind::Optimizer), StageStatus::Idle);
    assert_eq!(status(&result, 0, StageKind::TimeDomainSim), StageStatus::Success);
    assert_eq!(engine.calls().optimize, 0);
    assert_eq!(engine.calls().analyze_impact, 1);
}

#[test]
fn diverged_post_contingency_load_flow_reroutes_to_simulation() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    converges: false
    optimizer: actions
"#,
    );
    let (result, engine) = run(case, params(1, 1));
    let s0 = StateId::new(0);

    assert!(result.results.action_outcome(&c("C1"), s0).is_none());
    assert!(result.routing[&s0].for_simulator.contains(&c("C1")));
    assert_eq!(status(&result, 0, StageKind::Optimizer), StageStatus::Success);
    assert_eq!(status(&result, 0, StageKind::TimeDomainSim), StageStatus::Success);

    let calls = engine.calls();
    assert_eq!(calls.optimize, 0);
    assert_eq!(calls.analyze_impact, 1);
    // The violation check and the optimizer share one derivation.
    assert_eq!(calls.post_contingency_load_flow, 1);
}

#[test]
fn results_do_not_depend_on_pool_size() {
    let body = r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: SAFE
    state_verdicts: { 2: UNSAFE, 5: SAFE_WITH_CORRECTIVE_ACTIONS }
    optimizer: actions
    indices: [{ kind: TRANSIENT, ok: false }]
  - id: C2
    elements: [{ type: branch, id: L2 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    optimizer: no_actions
  - id: C3
    elements: [{ type: generator, id: G1 }]
    verdict: UNSAFE
    cluster: 4
    indices: [{ kind: SMALL_SIGNAL, ok: true }]
  - id: C4
    elements: [{ type: branch, id: L2 }]
    cluster: 1
load_flow:
  non_converging_states: [4]
"#;
    let (serial, serial_busy) = run_observed(case(body), params(8, 1));
    let (parallel, parallel_busy) = run_observed(case(body), params(8, 8));

    assert_eq!(serial_busy, 1, "a pool of one runs one state at a time");
    assert!(parallel_busy <= 8);

    assert_eq!(serial.status, parallel.status);
    assert_eq!(serial.routing, parallel.routing);
    assert_eq!(serial.results, parallel.results);
    assert_eq!(serial.rules_results, parallel.rules_results);
    assert_eq!(serial.wca_results, parallel.wca_results);
    assert_eq!(serial.worklist, vec![c("C1"), c("C2"), c("C3")]);
    assert_eq!(serial.status.len(), 8);
}

#[test]
fn non_converged_state_never_reaches_later_stages() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: UNSAFE
load_flow:
  non_converging_states: [1]
"#,
    );
    let network = case.network();
    let catalog = case.catalog().unwrap();
    let engine = ScriptedEngine::new(case);
    let log = Arc::new(EventLog::new());
    let workflow = Workflow::new(
        RunId::new("lf"),
        params(3, 2),
        Engines::from_shared(engine.clone()),
    );
    workflow.bus().register(log.clone());
    let result = workflow.run(&network, &catalog);

    assert_eq!(status(&result, 1, StageKind::LoadFlow), StageStatus::Failed);
    for stage in [
        StageKind::SecurityRules,
        StageKind::Optimizer,
        StageKind::TimeDomainSim,
    ] {
        assert_eq!(status(&result, 1, stage), StageStatus::Idle);
    }
    let detail = result
        .state_status(StateId::new(1))
        .and_then(|status| status.detail.clone())
        .unwrap();
    assert!(detail.starts_with("load flow does not converge: metrics = {"));

    let later_stage_progress = log.count(|event| match event {
        WorkflowEvent::StateProgress(status) if status.state_id == StateId::new(1) => [
            StageKind::SecurityRules,
            StageKind::Optimizer,
            StageKind::TimeDomainSim,
        ]
        .iter()
        .any(|stage| status.status(*stage) != StageStatus::Idle),
        _ => false,
    });
    assert_eq!(later_stage_progress, 0);

    assert_eq!(status(&result, 2, StageKind::TimeDomainSim), StageStatus::Success);
    assert_eq!(result.summary().failed_states, vec![StateId::new(1)]);
}

#[test]
fn globally_safe_states_skip_optimizer_and_simulator() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
  - id: C2
    elements: [{ type: branch, id: L2 }]
"#,
    );
    let (result, engine) = run(case, params(2, 2));

    let calls = engine.calls();
    assert_eq!(calls.optimize, 0);
    assert_eq!(calls.stabilize, 0);
    assert_eq!(calls.analyze_impact, 0);
    assert_eq!(calls.rules, 4);
    assert_eq!(calls.post_contingency_load_flow, 4);
    assert_eq!(calls.sample, 1);
    for state in 0..2 {
        assert_eq!(status(&result, state, StageKind::Optimizer), StageStatus::Idle);
        assert_eq!(
            status(&result, state, StageKind::TimeDomainSim),
            StageStatus::Idle
        );
    }
}

#[test]
fn optimizer_error_becomes_failure_outcome_and_reroutes() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    optimizer: error
  - id: C2
    elements: [{ type: branch, id: L2 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    optimizer: actions
"#,
    );
    let (result, engine) = run(case, params(1, 1));
    let s0 = StateId::new(0);

    let outcome = result.results.action_outcome(&c("C1"), s0).unwrap();
    assert!(!outcome.actions_found);
    assert_eq!(outcome.status, OptimizerStatus::OptimizerExecutionError);
    assert!(outcome
        .cause
        .as_deref()
        .is_some_and(|cause| cause.contains("optimizer crashed")));

    let routing = &result.routing[&s0];
    assert!(routing.for_simulator.contains(&c("C1")));
    assert!(!routing.for_simulator.contains(&c("C2")));
    assert_eq!(result.results.contingencies_with_actions(), vec![c("C2")]);
    assert_eq!(result.results.action_ids(&c("C2"), s0), vec!["relieve_L2"]);
    assert_eq!(status(&result, 0, StageKind::Optimizer), StageStatus::Success);
    assert_eq!(engine.calls().analyze_impact, 1);
}

#[test]
fn missing_corrective_actions_reroute_to_simulation() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    verdict: SAFE_WITH_CORRECTIVE_ACTIONS
    optimizer: no_actions
"#,
    );
    let (result, _) = run(case, params(1, 1));
    let routing = &result.routing[&StateId::new(0)];
    assert_eq!(routing.for_optimizer.len(), 1);
    assert_eq!(routing.for_simulator.len(), 1);
    assert_eq!(status(&result, 0, StageKind::TimeDomainSim), StageStatus::Success);
}

#[test]
fn validation_mode_evaluates_every_pair() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    cluster: 1
  - id: C2
    elements: [{ type: branch, id: L2 }]
    optimizer: actions
"#,
    );
    let params = WorkflowParameters {
        validation: true,
        ..params(3, 2)
    };
    let (result, engine) = run(case, params);

    assert_eq!(result.worklist, vec![c("C1"), c("C2")]);
    for state in 0..3 {
        let s = StateId::new(state);
        for id in ["C1", "C2"] {
            assert!(result.rules_results[&c(id)].contains_key(&s));
            assert!(result.wca_rules_results[&c(id)].contains_key(&s));
            assert!(result.routing[&s].for_optimizer.contains(&c(id)));
            assert!(result.routing[&s].for_simulator.contains(&c(id)));
            assert!(!result.results.indexes(&c(id), s).is_empty());
        }
    }
    let calls = engine.calls();
    assert_eq!(calls.optimize, 6);
    assert_eq!(calls.stabilize, 3);
    assert!(result.results.unsafe_contingencies().is_empty());
}

#[test]
fn cluster_one_contingencies_are_skipped_outside_validation() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    cluster: 1
  - id: C2
    elements: [{ type: branch, id: L2 }]
    verdict: UNSAFE
"#,
    );
    let (result, engine) = run(case, params(1, 1));
    assert_eq!(result.worklist, vec![c("C2")]);
    assert_eq!(engine.calls().rules, 1);
    assert!(!result.rules_results.contains_key(&c("C1")));
    assert_eq!(result.wca_results.len(), 2);
}

#[test]
fn unavailable_rules_send_contingency_to_simulation() {
    let case = case(
        r#"
contingencies:
  - id: C1
    elements: [{ type: branch, id: L1 }]
    rules_available: false
"#,
    );
    let (result, _) = run(case, params(1, 1));
    let verdict = &result.rules_results[&c("C1")][&StateId::new(0)];
    assert!(!verdict.rules_available);
    assert_eq!(verdict.status, SecurityStatus::Unsafe);
    assert!(result.routing[&StateId::new(0)]
        .for_simulator
        .contains(&c("C1")));
    assert_eq!(status(&result, 0, StageKind::TimeDomainSim), StageStatus::Success);
}
