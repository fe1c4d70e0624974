use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use osa_cli::manifest::{record_manifest, Param};
use osa_core::RunId;
use osa_workflow::{
    Engines, JsonStore, RunSummary, ScriptedCase, ScriptedEngine, TracingObserver, Workflow,
    WorkflowParameters,
};

/// Options of `osa run`.
pub struct RunArgs<'a> {
    pub case: &'a Path,
    pub config: Option<&'a Path>,
    pub out: &'a Path,
    pub run_id: Option<&'a str>,
    pub states: Option<u32>,
    pub threads: Option<usize>,
    pub validation: bool,
    pub store_states: bool,
}

fn load_parameters(args: &RunArgs<'_>) -> Result<WorkflowParameters> {
    let mut params = match args.config {
        Some(path) => WorkflowParameters::load_from(path)
            .with_context(|| format!("loading workflow parameters from {}", path.display()))?,
        None => WorkflowParameters::default(),
    };
    if let Some(states) = args.states {
        params.states = states;
    }
    if let Some(threads) = args.threads {
        params.threads = threads;
    }
    params.validation |= args.validation;
    params.store_states |= args.store_states;
    Ok(params)
}

pub fn handle(args: RunArgs<'_>) -> Result<RunSummary> {
    let start = Instant::now();
    let case = ScriptedCase::load(args.case)?;
    let network = case.network();
    let catalog = case.catalog()?;

    let mut params = load_parameters(&args)?;
    params.case_date.get_or_insert(network.case_date);

    let run_id = RunId::new(
        args.run_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    );
    info!(
        "Running {} on case {} ({} contingencies)",
        run_id,
        args.case.display(),
        catalog.len()
    );

    let store = Arc::new(JsonStore::new(args.out));
    let workflow = Workflow::new(
        run_id.clone(),
        params.clone(),
        Engines::from_shared(ScriptedEngine::new(case)),
    )
    .with_store(store.clone());
    workflow.bus().register(Arc::new(TracingObserver));

    let result = workflow.run(&network, &catalog);
    let summary = result.summary();
    println!(
        "Run {}: {} states ({} failed), {} contingencies analyzed, {} unsafe, {} with corrective actions",
        summary.run_id,
        summary.states,
        summary.failed_states.len(),
        summary.contingencies_analyzed,
        summary.unsafe_contingencies.len(),
        summary.contingencies_with_actions.len()
    );
    if let Some(failure) = &summary.failure {
        println!("Run {} failed: {}", summary.run_id, failure);
    }

    let outputs: Vec<PathBuf> = vec![store.run_dir(&run_id)];
    let manifest_params = vec![
        Param::new("case", args.case.display()),
        Param::new("states", params.states),
        Param::new("threads", params.threads),
        Param::new("validation", params.validation),
        Param::new("store_states", params.store_states),
        Param::new("time_horizon", params.time_horizon),
    ];
    let manifest = record_manifest(
        args.out,
        "run",
        &summary,
        &outputs,
        manifest_params,
        start.elapsed().as_millis(),
    )?;
    println!("Recorded run manifest {}", manifest.display());
    Ok(summary)
}
