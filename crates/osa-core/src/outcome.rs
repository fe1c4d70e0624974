//! Outcomes of the corrective-control optimizer and of time-domain simulation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ContingencyId;

/// Terminal status reported by the corrective-control optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizerStatus {
    ManualCorrectiveActionFound,
    AutomaticCorrectiveActionFound,
    NoConstraintViolated,
    NoSupportedConstraintsInContingency,
    NoCorrectiveActionFound,
    OptimizerInternalError,
    /// The optimizer itself raised an error.
    OptimizerExecutionError,
}

impl OptimizerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerStatus::ManualCorrectiveActionFound => "MANUAL_CORRECTIVE_ACTION_FOUND",
            OptimizerStatus::AutomaticCorrectiveActionFound => {
                "AUTOMATIC_CORRECTIVE_ACTION_FOUND"
            }
            OptimizerStatus::NoConstraintViolated => "NO_CONSTRAINT_VIOLATED",
            OptimizerStatus::NoSupportedConstraintsInContingency => {
                "NO_SUPPORTED_CONSTRAINTS_IN_CONTINGENCY"
            }
            OptimizerStatus::NoCorrectiveActionFound => "NO_CORRECTIVE_ACTION_FOUND",
            OptimizerStatus::OptimizerInternalError => "OPTIMIZER_INTERNAL_ERROR",
            OptimizerStatus::OptimizerExecutionError => "OPTIMIZER_EXECUTION_ERROR",
        }
    }
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one equipment parameter set by a corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

/// Parameters applied to one piece of equipment by an action.
pub type ActionParameters = BTreeMap<String, ParameterValue>;

/// Result of the optimizer for one `(contingency, state)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub contingency: ContingencyId,
    pub actions_found: bool,
    pub status: OptimizerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan: Option<String>,
    /// `action id → equipment id → parameters`.
    #[serde(default)]
    pub actions: BTreeMap<String, BTreeMap<String, ActionParameters>>,
}

impl ActionOutcome {
    pub fn found(
        contingency: ContingencyId,
        status: OptimizerStatus,
        action_plan: Option<String>,
        actions: BTreeMap<String, BTreeMap<String, ActionParameters>>,
    ) -> Self {
        Self {
            contingency,
            actions_found: true,
            status,
            cause: None,
            action_plan,
            actions,
        }
    }

    pub fn not_found(contingency: ContingencyId, status: OptimizerStatus) -> Self {
        Self {
            contingency,
            actions_found: false,
            status,
            cause: None,
            action_plan: None,
            actions: BTreeMap::new(),
        }
    }

    /// Outcome recorded when the optimizer raised an error.
    pub fn execution_error(contingency: ContingencyId, cause: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            ..Self::not_found(contingency, OptimizerStatus::OptimizerExecutionError)
        }
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }
}

/// Aspect of dynamic security checked by a security index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityIndexKind {
    TsoOverload,
    TsoOvervoltage,
    TsoUndervoltage,
    TsoFrequency,
    TsoGeneratorVoltageAutomaton,
    TsoGeneratorSpeedAutomaton,
    TsoDisconnectedGenerator,
    SmallSignal,
    Transient,
    Overload,
    UnderOverVoltage,
}

impl SecurityIndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityIndexKind::TsoOverload => "TSO_OVERLOAD",
            SecurityIndexKind::TsoOvervoltage => "TSO_OVERVOLTAGE",
            SecurityIndexKind::TsoUndervoltage => "TSO_UNDERVOLTAGE",
            SecurityIndexKind::TsoFrequency => "TSO_FREQUENCY",
            SecurityIndexKind::TsoGeneratorVoltageAutomaton => "TSO_GENERATOR_VOLTAGE_AUTOMATON",
            SecurityIndexKind::TsoGeneratorSpeedAutomaton => "TSO_GENERATOR_SPEED_AUTOMATON",
            SecurityIndexKind::TsoDisconnectedGenerator => "TSO_DISCONNECTED_GENERATOR",
            SecurityIndexKind::SmallSignal => "SMALLSIGNAL",
            SecurityIndexKind::Transient => "TRANSIENT",
            SecurityIndexKind::Overload => "OVERLOAD",
            SecurityIndexKind::UnderOverVoltage => "UNDEROVERVOLTAGE",
        }
    }
}

impl fmt::Display for SecurityIndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One security verdict from time-domain simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIndex {
    pub contingency: ContingencyId,
    pub kind: SecurityIndexKind,
    pub ok: bool,
    #[serde(default)]
    pub description: String,
}

impl SecurityIndex {
    pub fn new(contingency: ContingencyId, kind: SecurityIndexKind, ok: bool) -> Self {
        Self {
            contingency,
            kind,
            ok,
            description: String::new(),
        }
    }
}

/// Security indices of one `(contingency, state)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub contingency: ContingencyId,
    pub indices: Vec<SecurityIndex>,
}

impl SimulationOutcome {
    /// Safe iff every index is ok.
    pub fn is_safe(&self) -> bool {
        self.indices.iter().all(|index| index.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_outcome_carries_cause() {
        let outcome = ActionOutcome::execution_error(ContingencyId::new("C1"), "solver crashed");
        assert!(!outcome.actions_found);
        assert_eq!(outcome.status, OptimizerStatus::OptimizerExecutionError);
        assert_eq!(outcome.cause.as_deref(), Some("solver crashed"));
        assert!(outcome.action_ids().is_empty());
    }

    #[test]
    fn simulation_outcome_is_safe_only_if_all_indices_ok() {
        let c = ContingencyId::new("C1");
        let mut outcome = SimulationOutcome {
            contingency: c.clone(),
            indices: vec![
                SecurityIndex::new(c.clone(), SecurityIndexKind::Transient, true),
                SecurityIndex::new(c.clone(), SecurityIndexKind::Overload, true),
            ],
        };
        assert!(outcome.is_safe());
        outcome.indices[1].ok = false;
        assert!(!outcome.is_safe());
    }

    #[test]
    fn parameter_values_deserialize_untagged() {
        let params: ActionParameters =
            serde_json::from_str(r#"{"open":true,"setpoint":12.5,"mode":"auto"}"#).unwrap();
        assert_eq!(params["open"], ParameterValue::Flag(true));
        assert_eq!(params["setpoint"], ParameterValue::Number(12.5));
        assert_eq!(params["mode"], ParameterValue::Text("auto".into()));
    }
}
