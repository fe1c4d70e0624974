//! Per-state status board.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use osa_core::{CoreResult, StageKind, StageStatus, StateId, TimeHorizon, WorkStatus};

use crate::events::{EventBus, WorkflowEvent};

/// Work status of every state in a run.
///
/// Every change publishes a [`WorkflowEvent::StateProgress`] carrying the
/// updated status before the call returns.
pub struct StatusBoard {
    time_horizon: TimeHorizon,
    statuses: RwLock<BTreeMap<StateId, WorkStatus>>,
    bus: Arc<EventBus>,
}

impl StatusBoard {
    pub fn new(time_horizon: TimeHorizon, bus: Arc<EventBus>) -> Self {
        Self {
            time_horizon,
            statuses: RwLock::new(BTreeMap::new()),
            bus,
        }
    }

    /// Add `state` with every stage idle.
    pub fn register(&self, state: StateId) {
        let status = WorkStatus::new(state, self.time_horizon);
        self.statuses.write().insert(state, status.clone());
        self.bus.publish(WorkflowEvent::StateProgress(status));
    }

    pub fn set(&self, state: StateId, stage: StageKind, to: StageStatus) -> CoreResult<()> {
        self.update(state, |status| status.set(stage, to))
    }

    /// Mark `stage` failed and append `detail`.
    pub fn fail(&self, state: StateId, stage: StageKind, detail: &str) -> CoreResult<()> {
        self.update(state, |status| {
            status.set(stage, StageStatus::Failed)?;
            status.append_detail(detail);
            Ok(())
        })
    }

    pub fn get(&self, state: StateId) -> Option<WorkStatus> {
        self.statuses.read().get(&state).cloned()
    }

    pub fn status(&self, state: StateId, stage: StageKind) -> StageStatus {
        self.statuses
            .read()
            .get(&state)
            .map(|status| status.status(stage))
            .unwrap_or_default()
    }

    /// Stage of `state` currently running, if any.
    pub fn running_stage(&self, state: StateId) -> Option<StageKind> {
        let statuses = self.statuses.read();
        let status = statuses.get(&state)?;
        StageKind::ALL
            .iter()
            .copied()
            .find(|stage| status.status(*stage) == StageStatus::Running)
    }

    pub fn snapshot(&self) -> BTreeMap<StateId, WorkStatus> {
        self.statuses.read().clone()
    }

    fn update(
        &self,
        state: StateId,
        apply: impl FnOnce(&mut WorkStatus) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let updated = {
            let mut statuses = self.statuses.write();
            let status = statuses
                .entry(state)
                .or_insert_with(|| WorkStatus::new(state, self.time_horizon));
            apply(status)?;
            status.clone()
        };
        self.bus.publish(WorkflowEvent::StateProgress(updated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;

    #[test]
    fn every_update_publishes_progress() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(EventLog::new());
        bus.register(log.clone());
        let board = StatusBoard::new(TimeHorizon::DayAhead, bus);
        let s = StateId::new(4);

        board.register(s);
        board.set(s, StageKind::Sampling, StageStatus::Running).unwrap();
        assert_eq!(board.running_stage(s), Some(StageKind::Sampling));
        board.set(s, StageKind::Sampling, StageStatus::Success).unwrap();
        board
            .fail(s, StageKind::LoadFlow, "load flow does not converge")
            .unwrap();

        assert_eq!(log.count(|e| matches!(e, WorkflowEvent::StateProgress(_))), 4);
        assert_eq!(board.status(s, StageKind::LoadFlow), StageStatus::Failed);
        assert_eq!(board.running_stage(s), None);
        assert_eq!(
            board.get(s).and_then(|status| status.detail),
            Some("load flow does not converge".to_string())
        );
    }

    #[test]
    fn illegal_transitions_are_rejected_without_publishing() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(EventLog::new());
        bus.register(log.clone());
        let board = StatusBoard::new(TimeHorizon::Hours(1), bus);
        let s = StateId::new(0);

        board.set(s, StageKind::Optimizer, StageStatus::Running).unwrap();
        board.set(s, StageKind::Optimizer, StageStatus::Success).unwrap();
        assert!(board
            .set(s, StageKind::Optimizer, StageStatus::Running)
            .is_err());
        assert_eq!(log.len(), 2);
    }
}
