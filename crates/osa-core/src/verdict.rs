//! Security-rule verdicts and worst-case clustering assignments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::ContingencyId;

/// Predicted security of a state for one contingency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityStatus {
    Safe,
    SafeWithCorrectiveActions,
    Unsafe,
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SecurityStatus::Safe => "SAFE",
            SecurityStatus::SafeWithCorrectiveActions => "SAFE_WITH_CORRECTIVE_ACTIONS",
            SecurityStatus::Unsafe => "UNSAFE",
        };
        f.write_str(label)
    }
}

/// Result of evaluating the security rules of one contingency on one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub status: SecurityStatus,
    /// False when no valid rule exists for this contingency.
    #[serde(default = "default_true")]
    pub rules_available: bool,
    #[serde(default)]
    pub invalid_rules: Vec<String>,
    /// Per security-index rule outcome (`true` = predicted ok).
    #[serde(default)]
    pub index_results: BTreeMap<String, bool>,
}

fn default_true() -> bool {
    true
}

impl SecurityVerdict {
    pub fn new(status: SecurityStatus) -> Self {
        Self {
            status,
            rules_available: true,
            invalid_rules: Vec::new(),
            index_results: BTreeMap::new(),
        }
    }

    pub fn safe() -> Self {
        Self::new(SecurityStatus::Safe)
    }

    /// Verdict used when no rule could be applied: treated as unsafe.
    pub fn rules_unavailable(invalid_rules: Vec<String>) -> Self {
        Self {
            status: SecurityStatus::Unsafe,
            rules_available: false,
            invalid_rules,
            index_results: BTreeMap::new(),
        }
    }

    pub fn with_index_result(mut self, index: impl Into<String>, ok: bool) -> Self {
        self.index_results.insert(index.into(), ok);
        self
    }
}

/// Severity cluster assigned by worst-case analysis.
///
/// Cluster 1 means the contingency is stable in every plausible state and
/// needs no further analysis; clusters 2 to 4 are increasingly severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ClusterNum(u8);

impl ClusterNum {
    pub const ONE: ClusterNum = ClusterNum(1);
    pub const TWO: ClusterNum = ClusterNum(2);
    pub const THREE: ClusterNum = ClusterNum(3);
    pub const FOUR: ClusterNum = ClusterNum(4);

    pub fn new(value: u8) -> CoreResult<Self> {
        if (1..=4).contains(&value) {
            Ok(ClusterNum(value))
        } else {
            Err(CoreError::Validation(format!(
                "cluster number must be between 1 and 4, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn needs_analysis(&self) -> bool {
        *self != ClusterNum::ONE
    }
}

impl TryFrom<u8> for ClusterNum {
    type Error = CoreError;

    fn try_from(value: u8) -> CoreResult<Self> {
        ClusterNum::new(value)
    }
}

impl From<ClusterNum> for u8 {
    fn from(value: ClusterNum) -> Self {
        value.0
    }
}

impl fmt::Display for ClusterNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster assigned to one contingency, with the reasons behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub contingency: ContingencyId,
    pub cluster: ClusterNum,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl ClusterAssignment {
    pub fn new(contingency: ContingencyId, cluster: ClusterNum) -> Self {
        Self {
            contingency,
            cluster,
            causes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_numbers_are_bounded() {
        assert!(ClusterNum::new(0).is_err());
        assert!(ClusterNum::new(5).is_err());
        assert!(!ClusterNum::ONE.needs_analysis());
        assert!(ClusterNum::new(3).unwrap().needs_analysis());
        assert!(serde_json::from_str::<ClusterNum>("7").is_err());
    }

    #[test]
    fn unavailable_rules_are_unsafe() {
        let verdict = SecurityVerdict::rules_unavailable(vec!["R12".into()]);
        assert_eq!(verdict.status, SecurityStatus::Unsafe);
        assert!(!verdict.rules_available);
        let parsed: SecurityVerdict = serde_json::from_str(r#"{"status":"SAFE"}"#).unwrap();
        assert!(parsed.rules_available);
    }
}
