//! Observation builder
//!
//! Assembles the payload both remote calls consume from the stores and the
//! FSM. Building an observation is the turn boundary for dirty tracking:
//! after the payload is assembled the cell store is re-snapshotted exactly
//! once, so `isUpdate` flags mean "changed since the previous outbound
//! observation".

use crate::engine::fsm::Fsm;
use crate::engine::ExecutionContext;
use crate::error::EngineError;
use crate::store::cells::CellStore;
use crate::store::context::ContextStore;
use crate::store::pipeline::PipelineStore;
use crate::types::protocol::{
    ApiRequest, BehaviorFeedback, BehaviorProgress, CurrentLocation, FsmSummary, GoalSection,
    LevelProgress, LocationSection, Observation, ObservationContext, ProgressLevel,
    ProgressSection, RequestOptions,
};

/// Options for one build.
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// `options.stream` in the request; true only for Generator calls.
    pub stream: bool,
    /// Fail with a contract error unless the stage/step location is fully
    /// resolved. Behavior identity is allowed to be absent: the
    /// Planning-First call happens before any behavior exists.
    pub require_progress: bool,
    /// Feedback block for post-behavior Planner calls.
    pub feedback: Option<BehaviorFeedback>,
}

/// Borrow-scoped builder over the engine's stores.
pub struct ObservationBuilder<'a> {
    pub fsm: &'a Fsm,
    pub cells: &'a mut CellStore,
    pub context: &'a ContextStore,
    pub pipeline: &'a PipelineStore,
    pub exec: &'a ExecutionContext,
}

impl ObservationBuilder<'_> {
    pub fn build(self, opts: BuildOptions) -> Result<ApiRequest, EngineError> {
        let stage_id = self.exec.current_stage_id.as_deref();
        let step_id = self.exec.current_step_id.as_deref();

        if opts.require_progress && (stage_id.is_none() || step_id.is_none()) {
            return Err(EngineError::ProtocolError(format!(
                "progress info required but location is unresolved (stage: {stage_id:?}, step: {step_id:?})"
            )));
        }

        let (stages_done, stages_left) = self.pipeline.stage_neighbors(stage_id);
        let (steps_done, steps_left) = self.pipeline.step_neighbors(stage_id, step_id);

        let progress = ProgressSection {
            stages: LevelProgress {
                completed: stages_done,
                current: stage_id.map(str::to_string),
                remaining: stages_left,
                focus: self.context.focus(ProgressLevel::Stages).to_string(),
                current_outputs: self.context.outputs(ProgressLevel::Stages).clone(),
            },
            steps: LevelProgress {
                completed: steps_done,
                current: step_id.map(str::to_string),
                remaining: steps_left,
                focus: self.context.focus(ProgressLevel::Steps).to_string(),
                current_outputs: self.context.outputs(ProgressLevel::Steps).clone(),
            },
            behaviors: BehaviorProgress {
                completed: self.exec.completed_behaviors.clone(),
                current: self.exec.current_behavior_id.clone(),
                iteration: self.exec.behavior_iteration,
                focus: self.context.focus(ProgressLevel::Behaviors).to_string(),
                current_outputs: self.context.outputs(ProgressLevel::Behaviors).clone(),
            },
        };

        let goals = GoalSection {
            stage: stage_id
                .and_then(|id| self.pipeline.stage(id))
                .map(|s| s.goal.clone()),
            step: match (stage_id, step_id) {
                (Some(sid), Some(tid)) => self.pipeline.step(sid, tid).map(|t| t.goal.clone()),
                _ => None,
            },
            behavior: None,
        };

        let location = LocationSection {
            current: CurrentLocation {
                stage_id: stage_id.map(str::to_string),
                step_id: step_id.map(str::to_string),
                behavior_id: self.exec.current_behavior_id.clone(),
                behavior_iteration: self.exec.behavior_iteration,
            },
            progress,
            goals,
        };

        let context = ObservationContext {
            variables: self.context.variables().clone(),
            effects: self.context.effects().clone(),
            notebook: self.cells.summary(true),
            fsm: FsmSummary {
                state: self.fsm.state().to_string(),
                last_transition: self.fsm.last_transition().map(|t| t.describe()),
            },
        };

        let request = ApiRequest {
            observation: Observation { location, context },
            behavior_feedback: opts.feedback,
            options: RequestOptions {
                stream: opts.stream,
            },
        };

        // Turn boundary: everything serialized above is now "seen".
        self.cells.clear_dirty();

        Ok(request)
    }
}
