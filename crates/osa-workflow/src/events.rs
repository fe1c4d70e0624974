//! Run progress events and their fan-out.
//!
//! Every run owns one [`EventBus`]. Observers registered on the bus are
//! called synchronously from whichever worker publishes; async consumers can
//! [`EventBus::subscribe`] to a broadcast channel instead. Publishing with no
//! observer and no subscriber is fine.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use osa_core::{
    ClusterAssignment, ContingencyId, SecurityIndex, SecurityVerdict, StateId, WorkStatus,
};

use crate::coordinator::RunSummary;

/// Lifecycle of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    Terminated,
}

/// Events published while a run progresses.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// The run started or terminated.
    WorkflowStatus(RunPhase),

    /// Worst-case clustering started (`true`) or finished (`false`).
    WcaRunning(bool),

    /// Clusters assigned by worst-case analysis.
    WcaContingencies(Vec<ClusterAssignment>),

    /// Number of workers currently processing a state.
    BusyWorkers { busy: usize, capacity: usize },

    /// A stage status or the detail text of a state changed.
    StateProgress(WorkStatus),

    /// A security-rule verdict was recorded.
    SecurityRules {
        state: StateId,
        contingency: ContingencyId,
        verdict: SecurityVerdict,
    },

    /// The optimizer finished one contingency.
    Actions {
        state: StateId,
        contingency: ContingencyId,
        actions_found: bool,
        action_ids: Vec<String>,
    },

    /// Impact analysis produced indices for one contingency.
    SecurityIndexes {
        state: StateId,
        contingency: ContingencyId,
        indices: Vec<SecurityIndex>,
    },

    /// The run ended and its results were persisted.
    RunEnded(RunSummary),
}

/// Receives every event published on a bus.
///
/// Called on worker threads: implementations must not block.
pub trait WorkflowObserver: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// Per-run fan-out of [`WorkflowEvent`]s.
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn WorkflowObserver>>>,
    events_tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a bus whose broadcast channel buffers `capacity` events per
    /// lagging subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            events_tx,
        }
    }

    pub fn register(&self, observer: Arc<dyn WorkflowObserver>) {
        self.observers.write().push(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events_tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        for observer in self.observers.read().iter() {
            observer.on_event(&event);
        }
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that keeps every event it receives.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Count events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&WorkflowEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl WorkflowObserver for EventLog {
    fn on_event(&self, event: &WorkflowEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Observer that traces events at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WorkflowObserver for TracingObserver {
    fn on_event(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::WorkflowStatus(phase) => tracing::info!(?phase, "workflow status"),
            WorkflowEvent::BusyWorkers { busy, capacity } => {
                tracing::debug!(busy, capacity, "busy workers")
            }
            WorkflowEvent::StateProgress(status) => tracing::debug!(
                state = %status.state_id,
                detail = status.detail.as_deref().unwrap_or(""),
                "state progress"
            ),
            other => tracing::trace!(event = ?other, "workflow event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_observers_and_subscribers() {
        let bus = EventBus::new();
        let log = Arc::new(EventLog::new());
        bus.register(log.clone());
        let mut rx = bus.subscribe();

        bus.publish(WorkflowEvent::WcaRunning(true));
        bus.publish(WorkflowEvent::BusyWorkers {
            busy: 1,
            capacity: 4,
        });

        assert_eq!(log.len(), 2);
        assert!(matches!(rx.try_recv(), Ok(WorkflowEvent::WcaRunning(true))));
        assert!(matches!(
            rx.try_recv(),
            Ok(WorkflowEvent::BusyWorkers { busy: 1, .. })
        ));
    }

    #[test]
    fn publishing_without_receivers_is_fine() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::WorkflowStatus(RunPhase::Running));
        assert_eq!(bus.observer_count(), 0);
    }
}
