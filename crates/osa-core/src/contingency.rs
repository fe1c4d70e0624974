//! Contingencies: named equipment outages applied to a network variant.
//!
//! Contingencies are owned by a [`ContingencyCatalog`] and shared as
//! `Arc<Contingency>`; the workflow refers to them by [`ContingencyId`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::ContingencyId;

/// One element taken out of service by a contingency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContingencyElement {
    Branch { id: String },
    Generator { id: String },
}

impl ContingencyElement {
    pub fn branch(id: impl Into<String>) -> Self {
        ContingencyElement::Branch { id: id.into() }
    }

    pub fn generator(id: impl Into<String>) -> Self {
        ContingencyElement::Generator { id: id.into() }
    }

    pub fn equipment_id(&self) -> &str {
        match self {
            ContingencyElement::Branch { id } | ContingencyElement::Generator { id } => id,
        }
    }
}

/// A postulated outage of one or more elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub id: ContingencyId,
    #[serde(default)]
    pub elements: Vec<ContingencyElement>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, elements: Vec<ContingencyElement>) -> Self {
        Self {
            id: ContingencyId::new(id),
            elements,
        }
    }

    /// Order of this contingency (k in N-k).
    pub fn order(&self) -> usize {
        self.elements.len()
    }
}

/// Ordered, id-indexed collection of contingencies.
#[derive(Debug, Clone, Default)]
pub struct ContingencyCatalog {
    contingencies: Vec<Arc<Contingency>>,
    index: HashMap<ContingencyId, usize>,
}

impl ContingencyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, rejecting duplicate ids.
    pub fn from_contingencies(
        contingencies: impl IntoIterator<Item = Contingency>,
    ) -> CoreResult<Self> {
        let mut catalog = Self::new();
        for contingency in contingencies {
            catalog.insert(contingency)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, contingency: Contingency) -> CoreResult<()> {
        if self.index.contains_key(&contingency.id) {
            return Err(CoreError::Validation(format!(
                "duplicate contingency id '{}'",
                contingency.id
            )));
        }
        self.index
            .insert(contingency.id.clone(), self.contingencies.len());
        self.contingencies.push(Arc::new(contingency));
        Ok(())
    }

    pub fn get(&self, id: &ContingencyId) -> Option<&Arc<Contingency>> {
        self.index.get(id).map(|&idx| &self.contingencies[idx])
    }

    pub fn require(&self, id: &ContingencyId) -> CoreResult<&Arc<Contingency>> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownContingency(id.to_string()))
    }

    /// Contingencies in insertion order.
    pub fn all(&self) -> &[Arc<Contingency>] {
        &self.contingencies
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContingencyId> {
        self.contingencies.iter().map(|c| &c.id)
    }

    pub fn len(&self) -> usize {
        self.contingencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contingencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_keeps_order_and_rejects_duplicates() {
        let mut catalog = ContingencyCatalog::from_contingencies(vec![
            Contingency::new("B", vec![ContingencyElement::branch("L2")]),
            Contingency::new("A", vec![ContingencyElement::generator("G1")]),
        ])
        .unwrap();

        let ids: Vec<_> = catalog.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert!(catalog.insert(Contingency::new("A", vec![])).is_err());
        assert!(catalog.require(&ContingencyId::new("Z")).is_err());
        assert_eq!(catalog.get(&ContingencyId::new("A")).unwrap().order(), 1);
    }

    #[test]
    fn elements_deserialize_from_tagged_yaml_like_json() {
        let json = r#"{"id":"N2","elements":[{"type":"branch","id":"L1"},{"type":"generator","id":"G4"}]}"#;
        let contingency: Contingency = serde_json::from_str(json).unwrap();
        assert_eq!(contingency.order(), 2);
        assert_eq!(contingency.elements[1].equipment_id(), "G4");
    }
}
