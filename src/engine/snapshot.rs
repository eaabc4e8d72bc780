//! Engine-level persistence
//!
//! A single JSON blob round-trips the engine at any transition boundary:
//! location/progress/goals plus variables, effects, the notebook and the
//! FSM. Buffered actions are deliberately not persisted; a snapshot taken
//! mid-behavior rehydrates at the behavior boundary and replays the
//! Generator call on resume.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::fsm::WorkflowState;
use crate::engine::{ExecutionContext, WorkflowEngine};
use crate::error::EngineError;
use crate::store::context::{ProgressFocus, ProgressOutputs};
use crate::types::cell::Cell;
use crate::types::protocol::{CurrentLocation, EffectsPayload, GoalSection};
use crate::types::template::WorkflowTemplate;

/// Progress bookkeeping that cannot be derived from the template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotProgress {
    pub completed_behaviors: Vec<String>,
    pub focus: ProgressFocus,
    pub outputs: ProgressOutputs,
}

/// `observation` section of the blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotObservation {
    pub location: CurrentLocation,
    pub progress: SnapshotProgress,
    pub goals: GoalSection,
}

/// Notebook content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotNotebook {
    pub title: String,
    pub cells: Vec<Cell>,
    pub execution_count: u64,
}

/// FSM position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFsm {
    pub state: WorkflowState,
    pub last_transition: Option<String>,
}

/// `state` section of the blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotState {
    pub variables: Map<String, Value>,
    pub effects: EffectsPayload,
    pub notebook: SnapshotNotebook,
    #[serde(rename = "FSM")]
    pub fsm: SnapshotFsm,
    /// Template travels with the blob so a rehydrated engine can navigate.
    pub template: WorkflowTemplate,
}

/// The persisted engine blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub observation: SnapshotObservation,
    pub state: SnapshotState,
}

impl WorkflowEngine {
    /// Serialize the engine at the current transition boundary.
    pub fn snapshot(&self) -> EngineSnapshot {
        let exec = self.execution();
        EngineSnapshot {
            observation: SnapshotObservation {
                location: CurrentLocation {
                    stage_id: exec.current_stage_id.clone(),
                    step_id: exec.current_step_id.clone(),
                    behavior_id: exec.current_behavior_id.clone(),
                    behavior_iteration: exec.behavior_iteration,
                },
                progress: SnapshotProgress {
                    completed_behaviors: exec.completed_behaviors.clone(),
                    focus: self.context().progress_focus().clone(),
                    outputs: ProgressOutputs {
                        stages: self
                            .context()
                            .outputs(crate::types::protocol::ProgressLevel::Stages)
                            .clone(),
                        steps: self
                            .context()
                            .outputs(crate::types::protocol::ProgressLevel::Steps)
                            .clone(),
                        behaviors: self
                            .context()
                            .outputs(crate::types::protocol::ProgressLevel::Behaviors)
                            .clone(),
                    },
                },
                goals: GoalSection {
                    stage: exec
                        .current_stage_id
                        .as_deref()
                        .and_then(|id| self.pipeline().stage(id))
                        .map(|s| s.goal.clone()),
                    step: match (exec.current_stage_id.as_deref(), exec.current_step_id.as_deref())
                    {
                        (Some(sid), Some(tid)) => {
                            self.pipeline().step(sid, tid).map(|t| t.goal.clone())
                        }
                        _ => None,
                    },
                    behavior: None,
                },
            },
            state: SnapshotState {
                variables: self.context().variables().clone(),
                effects: self.context().effects().clone(),
                notebook: SnapshotNotebook {
                    title: self.cells().title().to_string(),
                    cells: self.cells().cells().cloned().collect(),
                    execution_count: self.cells().execution_count(),
                },
                fsm: SnapshotFsm {
                    state: self.state(),
                    last_transition: self.fsm().last_transition().map(|t| t.describe()),
                },
                template: self.pipeline().template().clone(),
            },
        }
    }

    /// Rehydrate from a snapshot. Action-level states resume at the
    /// behavior boundary since buffered actions are not persisted; call
    /// [`WorkflowEngine::resume`] afterwards to continue the run.
    pub fn restore(&mut self, snapshot: EngineSnapshot) -> Result<(), EngineError> {
        let EngineSnapshot { observation, state } = snapshot;

        self.pipeline.set_template(state.template);
        self.cells.load(
            state.notebook.cells,
            state.notebook.title,
            state.notebook.execution_count,
        );
        self.context.load(
            state.variables,
            state.effects,
            observation.progress.focus,
            observation.progress.outputs,
        );

        let mut exec = ExecutionContext {
            current_stage_id: observation.location.stage_id,
            current_step_id: observation.location.step_id,
            current_behavior_id: observation.location.behavior_id,
            behavior_iteration: observation.location.behavior_iteration,
            completed_behaviors: observation.progress.completed_behaviors,
            ..Default::default()
        };

        let mut resume_state = state.fsm.state;
        if matches!(
            resume_state,
            WorkflowState::ActionRunning
                | WorkflowState::ActionCompleted
                | WorkflowState::BehaviorRunning
        ) {
            // Replay the interrupted behavior from its start.
            resume_state = WorkflowState::BehaviorRunning;
            if exec.current_behavior_id.take().is_some() {
                exec.behavior_iteration = exec.behavior_iteration.saturating_sub(1);
            }
        }

        self.exec = exec;
        self.queue.clear();
        self.fsm.force_state(resume_state);
        self.paused = false;
        self.last_error = None;
        // Non-terminal, non-pending states need their entry effect re-run.
        self.effect_pending =
            !resume_state.is_terminal() && !resume_state.is_pending() && resume_state != WorkflowState::Idle;
        Ok(())
    }
}
