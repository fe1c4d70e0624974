//! Stage status tracking for the per-state pipeline.
//!
//! Each sampled state walks through five stages. A stage moves
//! `IDLE → RUNNING → {SUCCESS | FAILED}` and never re-enters `RUNNING`;
//! [`StageStatus::transition`] enforces this. [`WorkStatus`] bundles the five
//! statuses of one state together with a free-text detail that only grows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::StateId;

/// Stages of the per-state pipeline, in causal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Sampling,
    LoadFlow,
    SecurityRules,
    Optimizer,
    TimeDomainSim,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Sampling,
        StageKind::LoadFlow,
        StageKind::SecurityRules,
        StageKind::Optimizer,
        StageKind::TimeDomainSim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Sampling => "SAMPLING",
            StageKind::LoadFlow => "LOAD_FLOW",
            StageKind::SecurityRules => "SECURITY_RULES",
            StageKind::Optimizer => "OPTIMIZER",
            StageKind::TimeDomainSim => "TIME_DOMAIN_SIM",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage for one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Idle => "IDLE",
            StageStatus::Running => "RUNNING",
            StageStatus::Success => "SUCCESS",
            StageStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::Failed)
    }

    /// Check a status change and return the new status.
    ///
    /// Setting the current status again is accepted as a no-op. `IDLE → FAILED`
    /// is accepted for a stage that fails before it could start.
    pub fn transition(self, stage: StageKind, to: StageStatus) -> CoreResult<StageStatus> {
        use StageStatus::*;
        let legal = self == to
            || matches!(
                (self, to),
                (Idle, Running) | (Idle, Failed) | (Running, Success) | (Running, Failed)
            );
        if legal {
            Ok(to)
        } else {
            Err(CoreError::InvalidTransition {
                stage,
                from: self,
                to,
            })
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps under which metrics and violations are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlineStep {
    LoadFlow,
    Stabilization,
    ImpactAnalysis,
}

impl OnlineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineStep::LoadFlow => "LOAD_FLOW",
            OnlineStep::Stabilization => "STABILIZATION",
            OnlineStep::ImpactAnalysis => "IMPACT_ANALYSIS",
        }
    }
}

impl fmt::Display for OnlineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast horizon of the analyzed states.
///
/// Serialized as its label: `DACF` for day-ahead, `<n>H` for intraday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum TimeHorizon {
    #[default]
    DayAhead,
    Hours(u32),
}

impl TimeHorizon {
    /// Forecast distance in minutes.
    pub fn forecast_distance(&self) -> u32 {
        match self {
            TimeHorizon::DayAhead => 24 * 60,
            TimeHorizon::Hours(hours) => hours * 60,
        }
    }
}

impl fmt::Display for TimeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeHorizon::DayAhead => f.write_str("DACF"),
            TimeHorizon::Hours(hours) => write!(f, "{}H", hours),
        }
    }
}

impl FromStr for TimeHorizon {
    type Err = CoreError;

    fn from_str(input: &str) -> CoreResult<Self> {
        let upper = input.trim().to_ascii_uppercase();
        if upper == "DACF" || upper == "DA" {
            return Ok(TimeHorizon::DayAhead);
        }
        upper
            .strip_suffix('H')
            .and_then(|hours| hours.parse::<u32>().ok())
            .filter(|hours| *hours > 0)
            .map(TimeHorizon::Hours)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown time horizon '{}'; use DACF or <hours>H",
                    input
                ))
            })
    }
}

impl TryFrom<String> for TimeHorizon {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        value.parse()
    }
}

impl From<TimeHorizon> for String {
    fn from(value: TimeHorizon) -> Self {
        value.to_string()
    }
}

/// Processing status of one state: the five stage statuses plus detail text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStatus {
    pub state_id: StateId,
    pub statuses: BTreeMap<StageKind, StageStatus>,
    pub time_horizon: TimeHorizon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WorkStatus {
    pub fn new(state_id: StateId, time_horizon: TimeHorizon) -> Self {
        Self {
            state_id,
            statuses: StageKind::ALL
                .iter()
                .map(|stage| (*stage, StageStatus::Idle))
                .collect(),
            time_horizon,
            detail: None,
        }
    }

    pub fn status(&self, stage: StageKind) -> StageStatus {
        self.statuses.get(&stage).copied().unwrap_or_default()
    }

    /// Move `stage` to `to`, rejecting non-monotonic changes.
    pub fn set(&mut self, stage: StageKind, to: StageStatus) -> CoreResult<()> {
        let next = self.status(stage).transition(stage, to)?;
        self.statuses.insert(stage, next);
        Ok(())
    }

    /// Append to the detail text; earlier detail is kept.
    pub fn append_detail(&mut self, detail: &str) {
        self.detail = Some(match self.detail.take() {
            Some(existing) if !existing.is_empty() => format!("{}<br>{}", existing, detail),
            _ => detail.to_string(),
        });
    }

    /// First stage (in pipeline order) that failed.
    pub fn failed_stage(&self) -> Option<StageKind> {
        StageKind::ALL
            .iter()
            .copied()
            .find(|stage| self.status(*stage) == StageStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        let stage = StageKind::LoadFlow;
        assert_eq!(
            StageStatus::Idle.transition(stage, StageStatus::Running).unwrap(),
            StageStatus::Running
        );
        assert!(StageStatus::Running
            .transition(stage, StageStatus::Success)
            .is_ok());
        assert!(StageStatus::Success
            .transition(stage, StageStatus::Running)
            .is_err());
        assert!(StageStatus::Failed
            .transition(stage, StageStatus::Success)
            .is_err());
        assert!(StageStatus::Success
            .transition(stage, StageStatus::Success)
            .is_ok());
    }

    #[test]
    fn work_status_starts_idle_and_appends_detail() {
        let mut status = WorkStatus::new(StateId::new(1), TimeHorizon::DayAhead);
        assert!(StageKind::ALL
            .iter()
            .all(|stage| status.status(*stage) == StageStatus::Idle));

        status.set(StageKind::Sampling, StageStatus::Running).unwrap();
        status.set(StageKind::Sampling, StageStatus::Failed).unwrap();
        status.append_detail("first");
        status.append_detail("second");

        assert_eq!(status.detail.as_deref(), Some("first<br>second"));
        assert_eq!(status.failed_stage(), Some(StageKind::Sampling));
    }

    #[test]
    fn time_horizon_round_trips_through_labels() {
        assert_eq!("DACF".parse::<TimeHorizon>().unwrap(), TimeHorizon::DayAhead);
        assert_eq!("3h".parse::<TimeHorizon>().unwrap(), TimeHorizon::Hours(3));
        assert!("tomorrow".parse::<TimeHorizon>().is_err());
        let json = serde_json::to_string(&TimeHorizon::Hours(6)).unwrap();
        assert_eq!(json, "\"6H\"");
    }
}
