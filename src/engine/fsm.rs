//! Hierarchical workflow FSM
//!
//! States, events, and the transition table. The FSM itself is pure: it
//! looks up `(state, event)`, records history, and advances. Entry effects
//! live in [`crate::engine::effects`] and are invoked by the engine loop
//! after each successful transition. An event with no defined transition is
//! ignored with a warning.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::template::{WorkflowStep, WorkflowTemplate};

/// Bounded transition history.
const HISTORY_LIMIT: usize = 64;

/// Engine states. `PAUSED` is not a state of this machine: pausing parks
/// the loop on the current state without transitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Idle,
    StageRunning,
    StageCompleted,
    StepRunning,
    StepCompleted,
    BehaviorRunning,
    BehaviorCompleted,
    ActionRunning,
    ActionCompleted,
    WorkflowCompleted,
    WorkflowUpdatePending,
    StepUpdatePending,
    Error,
    Cancelled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::StageRunning => "STAGE_RUNNING",
            Self::StageCompleted => "STAGE_COMPLETED",
            Self::StepRunning => "STEP_RUNNING",
            Self::StepCompleted => "STEP_COMPLETED",
            Self::BehaviorRunning => "BEHAVIOR_RUNNING",
            Self::BehaviorCompleted => "BEHAVIOR_COMPLETED",
            Self::ActionRunning => "ACTION_RUNNING",
            Self::ActionCompleted => "ACTION_COMPLETED",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
            Self::WorkflowUpdatePending => "WORKFLOW_UPDATE_PENDING",
            Self::StepUpdatePending => "STEP_UPDATE_PENDING",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states emit only control-surface events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowCompleted | Self::Error | Self::Cancelled)
    }

    /// States that park the loop waiting for an external confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::WorkflowUpdatePending | Self::StepUpdatePending)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition triggers. Payload-carrying variants hold the data the target
/// state's effect needs.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StartWorkflow,
    StartStage,
    StartStep,
    StartBehavior,
    StartAction,
    CompleteAction,
    NextAction,
    CompleteBehavior,
    NextBehavior,
    CompleteStep,
    NextStep,
    CompleteStage,
    NextStage,
    CompleteWorkflow,
    UpdateWorkflow(WorkflowTemplate),
    UpdateWorkflowConfirmed,
    UpdateWorkflowRejected,
    UpdateStep(Vec<WorkflowStep>),
    UpdateStepConfirmed,
    UpdateStepRejected,
    Fail(String),
    Cancel,
    Reset,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartWorkflow => "START_WORKFLOW",
            Self::StartStage => "START_STAGE",
            Self::StartStep => "START_STEP",
            Self::StartBehavior => "START_BEHAVIOR",
            Self::StartAction => "START_ACTION",
            Self::CompleteAction => "COMPLETE_ACTION",
            Self::NextAction => "NEXT_ACTION",
            Self::CompleteBehavior => "COMPLETE_BEHAVIOR",
            Self::NextBehavior => "NEXT_BEHAVIOR",
            Self::CompleteStep => "COMPLETE_STEP",
            Self::NextStep => "NEXT_STEP",
            Self::CompleteStage => "COMPLETE_STAGE",
            Self::NextStage => "NEXT_STAGE",
            Self::CompleteWorkflow => "COMPLETE_WORKFLOW",
            Self::UpdateWorkflow(_) => "UPDATE_WORKFLOW",
            Self::UpdateWorkflowConfirmed => "UPDATE_WORKFLOW_CONFIRMED",
            Self::UpdateWorkflowRejected => "UPDATE_WORKFLOW_REJECTED",
            Self::UpdateStep(_) => "UPDATE_STEP",
            Self::UpdateStepConfirmed => "UPDATE_STEP_CONFIRMED",
            Self::UpdateStepRejected => "UPDATE_STEP_REJECTED",
            Self::Fail(_) => "FAIL",
            Self::Cancel => "CANCEL",
            Self::Reset => "RESET",
        }
    }
}

impl std::fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The transition table. Absent entries mean the event is invalid in that
/// state.
pub fn next_state(state: WorkflowState, event: &WorkflowEvent) -> Option<WorkflowState> {
    use WorkflowEvent as E;
    use WorkflowState as S;

    // Control events apply from any state; RESET only from terminals.
    match event {
        E::Fail(_) => return Some(S::Error),
        E::Cancel => return Some(S::Cancelled),
        E::Reset => return state.is_terminal().then_some(S::Idle),
        _ => {}
    }

    match (state, event) {
        (S::Idle, E::StartWorkflow) => Some(S::StageRunning),
        (S::StageRunning, E::StartStep) => Some(S::StepRunning),
        (S::StageRunning, E::CompleteStage) => Some(S::StageCompleted),
        (S::StepRunning, E::StartBehavior) => Some(S::BehaviorRunning),
        (S::StepRunning, E::CompleteStep) => Some(S::StepCompleted),
        (S::BehaviorRunning, E::StartAction) => Some(S::ActionRunning),
        (S::BehaviorRunning, E::CompleteBehavior) => Some(S::BehaviorCompleted),
        (S::ActionRunning, E::CompleteAction) => Some(S::ActionCompleted),
        (S::ActionRunning, E::UpdateWorkflow(_)) => Some(S::WorkflowUpdatePending),
        (S::ActionRunning, E::UpdateStep(_)) => Some(S::StepUpdatePending),
        (S::ActionCompleted, E::NextAction) => Some(S::ActionRunning),
        (S::ActionCompleted, E::CompleteBehavior) => Some(S::BehaviorCompleted),
        (S::BehaviorCompleted, E::NextBehavior) => Some(S::BehaviorRunning),
        (S::BehaviorCompleted, E::CompleteStep) => Some(S::StepCompleted),
        (S::StepCompleted, E::NextStep) => Some(S::StepRunning),
        (S::StepCompleted, E::CompleteStage) => Some(S::StageCompleted),
        (S::StageCompleted, E::NextStage) => Some(S::StageRunning),
        (S::StageCompleted, E::CompleteWorkflow) => Some(S::WorkflowCompleted),
        (S::WorkflowUpdatePending, E::UpdateWorkflowConfirmed | E::UpdateWorkflowRejected) => {
            Some(S::ActionCompleted)
        }
        (S::StepUpdatePending, E::UpdateStepConfirmed | E::UpdateStepRejected) => {
            Some(S::ActionCompleted)
        }
        _ => None,
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub event: String,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Compact description used in observation payloads.
    pub fn describe(&self) -> String {
        format!("{} --{}--> {}", self.from, self.event, self.to)
    }
}

/// The state machine: current state plus a bounded transition history.
#[derive(Debug)]
pub struct Fsm {
    state: WorkflowState,
    history: VecDeque<TransitionRecord>,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Apply an event. Returns the new state, or `None` (with a warning)
    /// when the event is invalid here; the state is then unchanged.
    pub fn apply(&mut self, event: &WorkflowEvent) -> Option<WorkflowState> {
        match next_state(self.state, event) {
            Some(next) => {
                if self.history.len() == HISTORY_LIMIT {
                    self.history.pop_front();
                }
                self.history.push_back(TransitionRecord {
                    from: self.state,
                    event: event.name().to_string(),
                    to: next,
                    at: Utc::now(),
                });
                tracing::debug!(from = %self.state, event = %event, to = %next, "transition");
                self.state = next;
                Some(next)
            }
            None => {
                tracing::warn!(state = %self.state, event = %event, "invalid transition, ignoring");
                None
            }
        }
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    /// Restore a state directly (snapshot rehydration only).
    pub(crate) fn force_state(&mut self, state: WorkflowState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabulated_transitions_hold() {
        use WorkflowEvent as E;
        use WorkflowState as S;
        let cases = [
            (S::Idle, E::StartWorkflow, S::StageRunning),
            (S::StageRunning, E::StartStep, S::StepRunning),
            (S::StageRunning, E::CompleteStage, S::StageCompleted),
            (S::StepRunning, E::StartBehavior, S::BehaviorRunning),
            (S::StepRunning, E::CompleteStep, S::StepCompleted),
            (S::BehaviorRunning, E::StartAction, S::ActionRunning),
            (S::BehaviorRunning, E::CompleteBehavior, S::BehaviorCompleted),
            (S::ActionRunning, E::CompleteAction, S::ActionCompleted),
            (
                S::ActionRunning,
                E::UpdateWorkflow(WorkflowTemplate::empty()),
                S::WorkflowUpdatePending,
            ),
            (S::ActionCompleted, E::NextAction, S::ActionRunning),
            (S::ActionCompleted, E::CompleteBehavior, S::BehaviorCompleted),
            (S::BehaviorCompleted, E::NextBehavior, S::BehaviorRunning),
            (S::BehaviorCompleted, E::CompleteStep, S::StepCompleted),
            (S::StepCompleted, E::NextStep, S::StepRunning),
            (S::StepCompleted, E::CompleteStage, S::StageCompleted),
            (S::StageCompleted, E::NextStage, S::StageRunning),
            (S::StageCompleted, E::CompleteWorkflow, S::WorkflowCompleted),
            (
                S::WorkflowUpdatePending,
                E::UpdateWorkflowConfirmed,
                S::ActionCompleted,
            ),
            (
                S::WorkflowUpdatePending,
                E::UpdateWorkflowRejected,
                S::ActionCompleted,
            ),
            (S::StepUpdatePending, E::UpdateStepConfirmed, S::ActionCompleted),
        ];
        for (from, event, to) in cases {
            assert_eq!(next_state(from, &event), Some(to), "{from} + {}", event.name());
        }
    }

    #[test]
    fn fail_and_cancel_apply_anywhere() {
        for state in [
            WorkflowState::Idle,
            WorkflowState::StepRunning,
            WorkflowState::ActionRunning,
            WorkflowState::WorkflowUpdatePending,
        ] {
            assert_eq!(
                next_state(state, &WorkflowEvent::Fail("boom".into())),
                Some(WorkflowState::Error)
            );
            assert_eq!(
                next_state(state, &WorkflowEvent::Cancel),
                Some(WorkflowState::Cancelled)
            );
        }
    }

    #[test]
    fn reset_only_from_terminals() {
        assert_eq!(
            next_state(WorkflowState::Error, &WorkflowEvent::Reset),
            Some(WorkflowState::Idle)
        );
        assert_eq!(
            next_state(WorkflowState::Cancelled, &WorkflowEvent::Reset),
            Some(WorkflowState::Idle)
        );
        assert_eq!(
            next_state(WorkflowState::WorkflowCompleted, &WorkflowEvent::Reset),
            Some(WorkflowState::Idle)
        );
        assert_eq!(next_state(WorkflowState::StepRunning, &WorkflowEvent::Reset), None);
    }

    #[test]
    fn invalid_event_leaves_state_unchanged() {
        let mut fsm = Fsm::new();
        assert!(fsm.apply(&WorkflowEvent::CompleteStep).is_none());
        assert_eq!(fsm.state(), WorkflowState::Idle);
        assert!(fsm.last_transition().is_none());
    }

    #[test]
    fn history_records_and_is_bounded() {
        let mut fsm = Fsm::new();
        fsm.apply(&WorkflowEvent::StartWorkflow).unwrap();
        let last = fsm.last_transition().unwrap();
        assert_eq!(last.describe(), "IDLE --START_WORKFLOW--> STAGE_RUNNING");

        // Bounce between two states well past the ring limit.
        fsm.apply(&WorkflowEvent::StartStep).unwrap();
        for _ in 0..100 {
            fsm.apply(&WorkflowEvent::Fail("x".into())).unwrap();
            fsm.apply(&WorkflowEvent::Reset).unwrap();
        }
        assert!(fsm.history().count() <= HISTORY_LIMIT);
        assert_eq!(fsm.state(), WorkflowState::Idle);
    }

    #[test]
    fn state_names_match_wire_format() {
        assert_eq!(WorkflowState::StageRunning.to_string(), "STAGE_RUNNING");
        assert_eq!(
            serde_json::to_value(WorkflowState::WorkflowUpdatePending).unwrap(),
            serde_json::json!("WORKFLOW_UPDATE_PENDING")
        );
    }
}
