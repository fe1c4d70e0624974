//! Workflow parameters.
//!
//! [`WorkflowParameters`] is stored as TOML and supports partial files where
//! unspecified values use the defaults below. Command-line flags are applied
//! on top of a loaded file by the CLI.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use osa_core::{SecurityIndexKind, TimeHorizon};

use crate::error::{Error, Result};

/// Parameters of one online workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowParameters {
    /// Number of states to analyze, the basecase included.
    pub states: u32,

    /// Forecast horizon of the sampled states.
    pub time_horizon: TimeHorizon,

    /// Evaluate every contingency through every stage, for comparison runs.
    pub validation: bool,

    /// Treat state 0 as the unsampled basecase.
    pub analyse_basecase: bool,

    /// Persist every solved state variant.
    pub store_states: bool,

    /// Relax basecase limit violations before sampling the other states.
    pub handle_violations_in_base_state: bool,

    /// Minimum purity of the security rules that may be applied.
    pub rules_purity_threshold: f64,

    /// Factor applied to current limits when checking violations.
    pub limit_reduction: f64,

    /// Extra headroom, in percent, added when relaxing basecase limits.
    pub constraint_margin: f64,

    /// Security index kinds kept from impact analysis (all when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_index_kinds: Option<Vec<SecurityIndexKind>>,

    /// Number of worker threads (0 = auto-detect).
    pub threads: usize,

    /// Date of the analyzed case; defaults to the network's own date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_date: Option<DateTime<Utc>>,
}

impl Default for WorkflowParameters {
    fn default() -> Self {
        Self {
            states: 1,
            time_horizon: TimeHorizon::DayAhead,
            validation: false,
            analyse_basecase: true,
            store_states: false,
            handle_violations_in_base_state: false,
            rules_purity_threshold: 0.95,
            limit_reduction: 1.0,
            constraint_margin: 0.0,
            security_index_kinds: None,
            threads: 0,
            case_date: None,
        }
    }
}

impl WorkflowParameters {
    /// Load parameters from a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let params: Self = toml::from_str(&contents)?;
        params.validate()?;
        Ok(params)
    }

    /// Save parameters to a TOML file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.states == 0 {
            return Err(Error::Config("states must be at least 1".to_string()));
        }
        if !(self.limit_reduction > 0.0) {
            return Err(Error::Config(format!(
                "limit_reduction must be positive, got {}",
                self.limit_reduction
            )));
        }
        if !(0.0..=1.0).contains(&self.rules_purity_threshold) {
            return Err(Error::Config(format!(
                "rules_purity_threshold must be within [0, 1], got {}",
                self.rules_purity_threshold
            )));
        }
        if self.constraint_margin < 0.0 {
            return Err(Error::Config(format!(
                "constraint_margin must not be negative, got {}",
                self.constraint_margin
            )));
        }
        Ok(())
    }

    /// Worker thread count with `0` resolved to the number of CPUs.
    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Whether state 0 is analyzed on its own before the sampled states.
    pub fn basecase_first(&self) -> bool {
        self.analyse_basecase && self.handle_violations_in_base_state
    }
}
