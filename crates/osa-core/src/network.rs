//! Network variants: isolated snapshots of one operating point.
//!
//! The electrical model lives in the external engines. The workflow only needs
//! what it inspects itself: monitored quantities, their limits and which
//! equipment is out of service. A variant is cloned with [`NetworkVariant::derive`]
//! and mutated independently of its parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::contingency::Contingency;
use crate::VariantId;

/// Kind of operational limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitKind {
    /// Permanent current limit of a branch (upper bound, subject to reduction).
    Current,
    HighVoltage,
    LowVoltage,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Current => "CURRENT",
            LimitKind::HighVoltage => "HIGH_VOLTAGE",
            LimitKind::LowVoltage => "LOW_VOLTAGE",
        }
    }

    pub fn is_upper(&self) -> bool {
        !matches!(self, LimitKind::LowVoltage)
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit on one monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub kind: LimitKind,
    pub value: f64,
}

impl Limit {
    pub fn current(value: f64) -> Self {
        Self {
            kind: LimitKind::Current,
            value,
        }
    }

    pub fn high_voltage(value: f64) -> Self {
        Self {
            kind: LimitKind::HighVoltage,
            value,
        }
    }

    pub fn low_voltage(value: f64) -> Self {
        Self {
            kind: LimitKind::LowVoltage,
            value,
        }
    }
}

/// A monitored quantity outside its limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub subject: String,
    pub kind: LimitKind,
    pub value: f64,
    pub limit: f64,
    pub reduction: f64,
}

/// Isolated snapshot of the network operating point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkVariant {
    pub id: VariantId,
    #[serde(default)]
    pub quantities: BTreeMap<String, f64>,
    #[serde(default)]
    pub limits: BTreeMap<String, Limit>,
    #[serde(default)]
    pub out_of_service: BTreeSet<String>,
}

impl NetworkVariant {
    pub fn new(id: VariantId) -> Self {
        Self {
            id,
            quantities: BTreeMap::new(),
            limits: BTreeMap::new(),
            out_of_service: BTreeSet::new(),
        }
    }

    /// Clone this variant under a new id.
    pub fn derive(&self, id: VariantId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn set_quantity(&mut self, equipment: impl Into<String>, value: f64) {
        self.quantities.insert(equipment.into(), value);
    }

    pub fn quantity(&self, equipment: &str) -> Option<f64> {
        self.quantities.get(equipment).copied()
    }

    pub fn set_limit(&mut self, equipment: impl Into<String>, limit: Limit) {
        self.limits.insert(equipment.into(), limit);
    }

    pub fn is_out_of_service(&self, equipment: &str) -> bool {
        self.out_of_service.contains(equipment)
    }

    /// Take the contingency's elements out of service.
    ///
    /// Outaged equipment carries no flow, so its monitored quantity drops to zero.
    pub fn apply_contingency(&mut self, contingency: &Contingency) {
        for element in &contingency.elements {
            let equipment = element.equipment_id();
            self.out_of_service.insert(equipment.to_string());
            if let Some(value) = self.quantities.get_mut(equipment) {
                *value = 0.0;
            }
        }
    }

    /// Scale every monitored quantity by `factor`.
    pub fn scale_quantities(&mut self, factor: f64) {
        for value in self.quantities.values_mut() {
            *value *= factor;
        }
    }

    /// Check in-service equipment against its limits.
    ///
    /// Current limits are multiplied by `limit_reduction` before comparison;
    /// voltage limits are used as given.
    pub fn check_limits(&self, limit_reduction: f64) -> Vec<LimitViolation> {
        self.limits
            .iter()
            .filter(|(equipment, _)| !self.is_out_of_service(equipment))
            .filter_map(|(equipment, limit)| {
                let value = self.quantity(equipment)?;
                let (violated, reduction) = match limit.kind {
                    LimitKind::Current => (value > limit.value * limit_reduction, limit_reduction),
                    LimitKind::HighVoltage => (value > limit.value, 1.0),
                    LimitKind::LowVoltage => (value < limit.value, 1.0),
                };
                violated.then(|| LimitViolation {
                    subject: equipment.clone(),
                    kind: limit.kind,
                    value,
                    limit: limit.value,
                    reduction,
                })
            })
            .collect()
    }

    /// Relax the limits behind `violations` so the current operating point
    /// satisfies them, plus `margin_pct` percent of headroom.
    ///
    /// Returns the number of limits changed.
    pub fn loosen_constraints(&mut self, violations: &[LimitViolation], margin_pct: f64) -> usize {
        let mut changed = 0;
        for violation in violations {
            let Some(limit) = self.limits.get_mut(&violation.subject) else {
                continue;
            };
            if limit.kind != violation.kind {
                continue;
            }
            limit.value = if violation.kind.is_upper() {
                loosened_upper(violation.value, violation.limit, margin_pct)
            } else {
                loosened_lower(violation.value, violation.limit, margin_pct)
            };
            changed += 1;
        }
        changed
    }
}

fn loosened_upper(value: f64, limit: f64, margin_pct: f64) -> f64 {
    if limit == 0.0 {
        ((value * 100.0).ceil() + margin_pct) / 100.0
    } else {
        let increment = ((value - limit) * 100.0 / limit).ceil() + margin_pct;
        limit + limit * increment / 100.0
    }
}

fn loosened_lower(value: f64, limit: f64, margin_pct: f64) -> f64 {
    if limit == 0.0 {
        ((-value * 100.0).ceil() + margin_pct) / 100.0
    } else {
        let increment = ((limit - value) * 100.0 / limit).ceil() + margin_pct;
        limit - limit * increment / 100.0
    }
}

/// The base network of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub case_date: DateTime<Utc>,
    /// Initial (unsampled) operating point.
    pub base: NetworkVariant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contingency::ContingencyElement;
    use crate::{ContingencyId, StateId};

    fn variant() -> NetworkVariant {
        let mut v = NetworkVariant::new(VariantId::base(StateId::new(0)));
        v.set_quantity("L1", 120.0);
        v.set_limit("L1", Limit::current(100.0));
        v.set_quantity("L2", 50.0);
        v.set_limit("L2", Limit::current(100.0));
        v.set_quantity("VL1", 0.92);
        v.set_limit("VL1", Limit::low_voltage(0.95));
        v
    }

    #[test]
    fn check_limits_reports_upper_and_lower_violations() {
        let violations = variant().check_limits(1.0);
        let subjects: Vec<_> = violations.iter().map(|v| v.subject.as_str()).collect();
        assert_eq!(subjects, vec!["L1", "VL1"]);

        let reduced = variant().check_limits(0.4);
        assert!(reduced.iter().any(|v| v.subject == "L2" && v.reduction == 0.4));
    }

    #[test]
    fn outaged_equipment_is_not_checked() {
        let mut v = variant();
        let outage = Contingency::new("C1", vec![ContingencyElement::branch("L1")]);
        let mut post = v.derive(VariantId::post_contingency(
            StateId::new(0),
            ContingencyId::new("C1"),
        ));
        post.apply_contingency(&outage);
        assert_eq!(post.quantity("L1"), Some(0.0));
        assert!(post.check_limits(1.0).iter().all(|v| v.subject != "L1"));

        v.scale_quantities(0.5);
        assert_eq!(v.quantity("L1"), Some(60.0));
    }

    #[test]
    fn loosening_removes_base_case_violations() {
        let mut v = variant();
        let violations = v.check_limits(1.0);
        assert_eq!(v.loosen_constraints(&violations, 0.0), 2);
        assert!(v.check_limits(1.0).is_empty());
        assert_eq!(v.limits["L1"].value, 120.0);
    }
}
