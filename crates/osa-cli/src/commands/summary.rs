use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;
use tracing::info;

use osa_core::{ContingencyId, LimitViolation, RunId, StateId};
use osa_workflow::{JsonStore, RulesTable, StoredRun};

const EMPTY_CONTINGENCY: &str = "Empty-Contingency";

const HEADERS: [&str; 12] = [
    "WorkflowId",
    "Basecase",
    "Contingency",
    "State",
    "FailureStep",
    "FailureDescription",
    "ViolationType",
    "Violation",
    "ViolationStep",
    "Equipment",
    "Value",
    "Limit",
];

/// One line of the summary table.
#[derive(Debug)]
struct Row<'a> {
    contingency: &'a str,
    state: StateId,
    failure_step: String,
    failure_description: String,
    violation_type: &'a str,
    violation: String,
    violation_step: String,
    equipment: String,
    value: String,
    limit: String,
}

impl<'a> Row<'a> {
    fn new(contingency: &'a str, state: StateId) -> Self {
        Self {
            contingency,
            state,
            failure_step: String::new(),
            failure_description: String::new(),
            violation_type: "",
            violation: String::new(),
            violation_step: String::new(),
            equipment: String::new(),
            value: String::new(),
            limit: String::new(),
        }
    }
}

struct SummaryWriter<'a, W: Write> {
    csv: Writer<W>,
    run: &'a str,
    basecase: String,
    rows: usize,
}

impl<'a, W: Write> SummaryWriter<'a, W> {
    fn write(&mut self, row: Row<'_>) -> Result<()> {
        let state = row.state.to_string();
        self.csv.write_record([
            self.run,
            self.basecase.as_str(),
            row.contingency,
            state.as_str(),
            row.failure_step.as_str(),
            row.failure_description.as_str(),
            row.violation_type,
            row.violation.as_str(),
            row.violation_step.as_str(),
            row.equipment.as_str(),
            row.value.as_str(),
            row.limit.as_str(),
        ])?;
        self.rows += 1;
        Ok(())
    }

    fn write_violations(
        &mut self,
        contingency: &str,
        state: StateId,
        step: &str,
        violations: &[LimitViolation],
    ) -> Result<()> {
        let mut sorted: Vec<&LimitViolation> = violations.iter().collect();
        sorted.sort_by_key(|v| v.kind);
        for violation in sorted {
            self.write(Row {
                violation_type: "STEADY_STATE",
                violation: violation.kind.as_str().to_string(),
                violation_step: step.to_string(),
                equipment: violation.subject.clone(),
                value: violation.value.to_string(),
                limit: violation.limit.to_string(),
                ..Row::new(contingency, state)
            })?;
        }
        Ok(())
    }

    fn write_rules(
        &mut self,
        table: &RulesTable,
        contingency: &ContingencyId,
        state: StateId,
        violation_type: &str,
    ) -> Result<()> {
        let Some(verdict) = table.get(contingency).and_then(|states| states.get(&state)) else {
            return Ok(());
        };
        for (index, _) in verdict.index_results.iter().filter(|(_, ok)| !**ok) {
            self.write(Row {
                violation_type,
                violation: index.clone(),
                violation_step: "SECURITY_RULES".to_string(),
                ..Row::new(contingency.as_str(), state)
            })?;
        }
        Ok(())
    }

    fn write_precontingency(&mut self, stored: &StoredRun) -> Result<()> {
        let states: BTreeSet<StateId> = stored
            .status
            .keys()
            .chain(stored.violations.keys())
            .copied()
            .collect();
        for state in states {
            if let Some(status) = stored.status.get(&state) {
                if let Some(stage) = status.failed_stage() {
                    self.write(Row {
                        failure_step: stage.to_string(),
                        failure_description: status.detail.clone().unwrap_or_default(),
                        ..Row::new(EMPTY_CONTINGENCY, state)
                    })?;
                }
            }
            if let Some(steps) = stored.violations.get(&state) {
                for (step, violations) in steps {
                    self.write_violations(EMPTY_CONTINGENCY, state, step.as_str(), violations)?;
                }
            }
        }
        Ok(())
    }

    fn write_contingencies(&mut self, stored: &StoredRun) -> Result<()> {
        let states: BTreeSet<StateId> = stored.status.keys().copied().collect();
        let unsafe_contingencies: BTreeSet<ContingencyId> = stored
            .results
            .as_ref()
            .map(|results| results.unsafe_contingencies().into_iter().collect())
            .unwrap_or_default();

        for contingency in stored.wca_results.keys() {
            for &state in &states {
                let post = stored
                    .post_contingency_violations
                    .get(&state)
                    .and_then(|by_contingency| by_contingency.get(contingency));
                if post.is_some_and(|post| !post.converged) {
                    self.write(Row {
                        failure_step: "POSTCONTINGENCY_LOAD_FLOW".to_string(),
                        failure_description: "Post contingency load flow does not converge"
                            .to_string(),
                        ..Row::new(contingency.as_str(), state)
                    })?;
                }
                self.write_rules(&stored.wca_rules_results, contingency, state, "WCA_RULE")?;
                self.write_rules(&stored.rules_results, contingency, state, "MCLA_RULE")?;

                if unsafe_contingencies.contains(contingency) {
                    let indices = stored
                        .results
                        .as_ref()
                        .and_then(|results| results.indexes.get(contingency))
                        .and_then(|states| states.get(&state));
                    for index in indices.into_iter().flatten().filter(|index| !index.ok) {
                        self.write(Row {
                            violation_type: "SECURITY_INDEX",
                            violation: index.kind.as_str().to_string(),
                            violation_step: "TIME_DOMAIN_SIM".to_string(),
                            ..Row::new(contingency.as_str(), state)
                        })?;
                    }
                }

                if let Some(post) = post {
                    self.write_violations(
                        contingency.as_str(),
                        state,
                        "POSTCONTINGENCY_LOAD_FLOW",
                        &post.violations,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Write the failures and violations of `stored` as CSV into `out`.
///
/// Returns the number of data rows written.
pub fn write_summary<W: Write>(run: &RunId, stored: &StoredRun, out: W) -> Result<usize> {
    let basecase = stored
        .parameters
        .as_ref()
        .and_then(|params| params.case_date)
        .map(|date| date.to_rfc3339())
        .unwrap_or_default();
    let mut writer = SummaryWriter {
        csv: Writer::from_writer(out),
        run: run.as_str(),
        basecase,
        rows: 0,
    };
    writer.csv.write_record(HEADERS)?;
    writer.write_precontingency(stored)?;
    writer.write_contingencies(stored)?;
    writer.csv.flush()?;
    Ok(writer.rows)
}

pub fn handle(store: &Path, run: &str, out: &Path) -> Result<()> {
    let run = RunId::new(run);
    let stored = JsonStore::new(store).load(&run)?;
    info!("Printing violations and failures of run {}", run);
    let file = std::fs::File::create(out)
        .with_context(|| format!("creating summary file {}", out.display()))?;
    let rows = write_summary(&run, &stored, file)?;
    println!("Wrote {} summary rows to {}", rows, out.display());
    Ok(())
}
