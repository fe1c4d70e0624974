//! # osa-core: data model for online security assessment
//!
//! Shared types for the online workflow: identifiers, network variants,
//! contingencies, stage status and the per-(contingency, state) verdicts and
//! outcomes produced by the analysis engines.
//!
//! ## Variants instead of a working-state selector
//!
//! A [`NetworkVariant`] is an owned snapshot of one operating point. Sampled
//! states and post-contingency states are separate values, and every engine
//! receives the variant it works on explicitly:
//!
//! ```rust
//! use osa_core::*;
//!
//! let mut base = NetworkVariant::new(VariantId::base(StateId::new(0)));
//! base.set_quantity("LINE_A", 80.0);
//! base.set_limit("LINE_A", Limit::current(100.0));
//!
//! let outage = Contingency::new("N1_LINE_A", vec![ContingencyElement::branch("LINE_A")]);
//! let mut post = base.derive(VariantId::post_contingency(StateId::new(0), outage.id.clone()));
//! post.apply_contingency(&outage);
//!
//! assert!(post.is_out_of_service("LINE_A"));
//! assert!(!base.is_out_of_service("LINE_A"));
//! assert_eq!(post.id.to_string(), "0-post-N1_LINE_A");
//! ```
//!
//! ## Modules
//!
//! - [`network`] - variants, limits and limit violations
//! - [`contingency`] - contingencies and the catalog that owns them
//! - [`status`] - stage kinds, stage status transitions, per-state work status
//! - [`verdict`] - security-rule verdicts and WCA cluster assignments
//! - [`outcome`] - optimizer and time-domain simulation outcomes
//! - [`error`] - unified error type

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod contingency;
pub mod error;
pub mod network;
pub mod outcome;
pub mod status;
pub mod verdict;

pub use contingency::{Contingency, ContingencyCatalog, ContingencyElement};
pub use error::{CoreError, CoreResult};
pub use network::{Limit, LimitKind, LimitViolation, Network, NetworkVariant};
pub use outcome::{
    ActionOutcome, ActionParameters, OptimizerStatus, ParameterValue, SecurityIndex,
    SecurityIndexKind, SimulationOutcome,
};
pub use status::{OnlineStep, StageKind, StageStatus, TimeHorizon, WorkStatus};
pub use verdict::{ClusterAssignment, ClusterNum, SecurityStatus, SecurityVerdict};

/// Index of a sampled state within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(u32);

impl StateId {
    #[inline]
    pub fn new(value: u32) -> Self {
        StateId(value)
    }
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a contingency in the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContingencyId(String);

impl ContingencyId {
    pub fn new(value: impl Into<String>) -> Self {
        ContingencyId(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContingencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContingencyId {
    fn from(value: &str) -> Self {
        ContingencyId(value.to_string())
    }
}

/// Identifier of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        RunId(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a network variant.
///
/// The id of a post-contingency variant is derived from `(state, contingency)`
/// so the same pair always names the same variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantId {
    pub state: StateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contingency: Option<ContingencyId>,
}

impl VariantId {
    pub fn base(state: StateId) -> Self {
        Self {
            state,
            contingency: None,
        }
    }

    pub fn post_contingency(state: StateId, contingency: ContingencyId) -> Self {
        Self {
            state,
            contingency: Some(contingency),
        }
    }

    pub fn is_post_contingency(&self) -> bool {
        self.contingency.is_some()
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contingency {
            Some(contingency) => write!(f, "{}-post-{}", self.state, contingency),
            None => write!(f, "{}", self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_ids_are_derived_from_state_and_contingency() {
        let a = VariantId::post_contingency(StateId::new(3), ContingencyId::new("C1"));
        let b = VariantId::post_contingency(StateId::new(3), ContingencyId::new("C1"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "3-post-C1");
        assert_eq!(VariantId::base(StateId::new(3)).to_string(), "3");
        assert!(a.is_post_contingency());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&StateId::new(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&ContingencyId::new("C2")).unwrap();
        assert_eq!(json, "\"C2\"");
    }
}
