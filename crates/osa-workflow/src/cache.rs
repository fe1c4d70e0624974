//! Per-state cache of post-contingency variants.
//!
//! Applying a contingency and solving the resulting load flow is the most
//! expensive derivation a state task repeats. The violation check and the
//! optimizer both need it for the same `(state, contingency)` pairs, often
//! from different workers at the same time. Each key owns a once-slot:
//! the first requester computes, concurrent requesters block on the slot and
//! reuse the result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use osa_core::{Contingency, ContingencyId, NetworkVariant, StateId, VariantId};

use crate::engines::LoadFlowEngine;

/// A solved post-contingency variant.
#[derive(Debug, Clone)]
pub struct DerivedState {
    pub variant: Arc<NetworkVariant>,
    pub converged: bool,
}

type Slot = Arc<OnceLock<DerivedState>>;

pub struct DerivedStateCache {
    load_flow: Arc<dyn LoadFlowEngine>,
    slots: Mutex<HashMap<(StateId, ContingencyId), Slot>>,
    derivations: AtomicUsize,
}

impl DerivedStateCache {
    pub fn new(load_flow: Arc<dyn LoadFlowEngine>) -> Self {
        Self {
            load_flow,
            slots: Mutex::new(HashMap::new()),
            derivations: AtomicUsize::new(0),
        }
    }

    /// Post-contingency variant of `state_variant` under `contingency`.
    ///
    /// A load-flow error during derivation is cached as non-converged.
    pub fn get_or_compute(
        &self,
        state_variant: &NetworkVariant,
        contingency: &Contingency,
    ) -> DerivedState {
        let key = (state_variant.id.state, contingency.id.clone());
        let slot = self.slots.lock().entry(key).or_default().clone();

        let mut computed = false;
        let derived = slot.get_or_init(|| {
            computed = true;
            self.derive(state_variant, contingency)
        });
        if !computed {
            debug!(
                "{}: cache hit for contingency {}",
                state_variant.id.state, contingency.id
            );
        }
        derived.clone()
    }

    /// Number of derivations actually computed.
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn derive(&self, state_variant: &NetworkVariant, contingency: &Contingency) -> DerivedState {
        self.derivations.fetch_add(1, Ordering::SeqCst);
        let state = state_variant.id.state;
        let mut variant =
            state_variant.derive(VariantId::post_contingency(state, contingency.id.clone()));
        variant.apply_contingency(contingency);

        let converged = match self.load_flow.solve(&mut variant) {
            Ok(report) => report.converged,
            Err(err) => {
                warn!(
                    "{}: post-contingency load flow for {} failed: {:#}",
                    state, contingency.id, err
                );
                false
            }
        };
        debug!(
            "{}: derived post-contingency state {} (converged: {})",
            state, variant.id, converged
        );
        DerivedState {
            variant: Arc::new(variant),
            converged,
        }
    }
}
