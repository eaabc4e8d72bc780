//! State entry effects
//!
//! One effect per non-terminal state, run by the engine loop right after
//! the transition into that state. Effects consult the stores, call the
//! Planner/Generator/executor where the state allows it, and raise the
//! next event. Terminal and pending states have no effect; the loop parks
//! there.

use futures_util::StreamExt;

use crate::engine::observation::BuildOptions;
use crate::engine::{WorkflowEngine, WorkflowEvent, WorkflowState};
use crate::error::EngineError;
use crate::store::script::ActionOutcome;
use crate::types::cell::{CellKind, CellOutput};
use crate::types::protocol::LastActionResult;

impl WorkflowEngine {
    pub(crate) async fn run_effect(&mut self, state: WorkflowState) -> Result<(), EngineError> {
        match state {
            WorkflowState::StageRunning => self.on_stage_running().await,
            WorkflowState::StepRunning => self.on_step_running().await,
            WorkflowState::BehaviorRunning => self.on_behavior_running().await,
            WorkflowState::ActionRunning => self.on_action_running().await,
            WorkflowState::ActionCompleted => self.on_action_completed(),
            WorkflowState::BehaviorCompleted => self.on_behavior_completed().await,
            WorkflowState::StepCompleted => self.on_step_completed(),
            WorkflowState::StageCompleted => self.on_stage_completed(),
            WorkflowState::Idle
            | WorkflowState::WorkflowCompleted
            | WorkflowState::WorkflowUpdatePending
            | WorkflowState::StepUpdatePending
            | WorkflowState::Error
            | WorkflowState::Cancelled => Ok(()),
        }
    }

    /// Resolve the stage's first step and enter it; an empty stage
    /// completes immediately.
    async fn on_stage_running(&mut self) -> Result<(), EngineError> {
        // Descriptor came without a template: give the Planner one chance
        // to seed it through a `workflow_update` delta.
        if self.pipeline.template().is_empty() {
            let request = self.build_observation(BuildOptions::default())?;
            let api = self.api.clone();
            let response = api.planning(&request).await?;
            if let Some(update) = response.context_update {
                self.apply_context_update(update)?;
            }
        }

        if self.exec.current_stage_id.is_none() {
            self.exec.current_stage_id = self.pipeline.first_stage().map(|s| s.id.clone());
        }
        let Some(stage_id) = self.exec.current_stage_id.clone() else {
            self.raise(WorkflowEvent::CompleteStage);
            return Ok(());
        };

        let step_resolves = self
            .exec
            .current_step_id
            .as_deref()
            .is_some_and(|id| self.pipeline.step(&stage_id, id).is_some());
        if !step_resolves {
            self.exec.current_step_id =
                self.pipeline.first_step(&stage_id).map(|t| t.id.clone());
        }

        match self.exec.current_step_id {
            Some(_) => self.raise(WorkflowEvent::StartStep),
            None => self.raise(WorkflowEvent::CompleteStage),
        }
        Ok(())
    }

    /// Planning-First: the Planner speaks before any action is generated.
    async fn on_step_running(&mut self) -> Result<(), EngineError> {
        let request = self.build_observation(BuildOptions {
            stream: false,
            require_progress: true,
            feedback: None,
        })?;
        let api = self.api.clone();
        let response = api.planning(&request).await?;
        let achieved = response.effective_target_achieved();
        if let Some(update) = response.context_update {
            self.apply_context_update(update)?;
        }

        if achieved {
            self.raise(WorkflowEvent::CompleteStep);
        } else {
            self.raise(WorkflowEvent::StartBehavior);
        }
        Ok(())
    }

    /// Stream this behavior's actions and buffer them before executing
    /// anything, so indices stay stable and stats stay unambiguous.
    async fn on_behavior_running(&mut self) -> Result<(), EngineError> {
        self.exec.behavior_iteration += 1;
        self.exec.current_behavior_id =
            Some(format!("behavior_{:03}", self.exec.behavior_iteration));

        let request = self.build_observation(BuildOptions {
            stream: true,
            require_progress: true,
            feedback: None,
        })?;
        let api = self.api.clone();
        let mut stream = api.generating(&request).await?;

        let mut actions = Vec::new();
        while let Some(item) = stream.next().await {
            actions.push(item?);
        }
        tracing::debug!(
            behavior = self.exec.current_behavior_id.as_deref().unwrap_or(""),
            count = actions.len(),
            "behavior actions ingested"
        );

        self.exec.actions = actions;
        self.exec.action_index = 0;
        self.exec.stats = Default::default();

        if self.exec.actions.is_empty() {
            self.raise(WorkflowEvent::CompleteBehavior);
        } else {
            self.raise(WorkflowEvent::StartAction);
        }
        Ok(())
    }

    /// Dispatch the action at the current index through the script store.
    async fn on_action_running(&mut self) -> Result<(), EngineError> {
        let Some(action) = self.exec.actions.get(self.exec.action_index).cloned() else {
            return Err(EngineError::InternalError(format!(
                "action index {} out of range ({} buffered)",
                self.exec.action_index,
                self.exec.actions.len()
            )));
        };

        self.exec.stats.actions_executed += 1;
        let executor = self.executor.clone();
        let result = self
            .script
            .dispatch(
                &mut self.cells,
                &mut self.context,
                &mut self.pipeline,
                executor.as_ref(),
                &action,
            )
            .await;

        match result {
            Ok(ActionOutcome::Completed { section_added }) => {
                self.exec.stats.actions_succeeded += 1;
                if section_added {
                    self.exec.stats.sections_added += 1;
                }
                self.exec.stats.last_action_result = LastActionResult::Success;
                self.raise(WorkflowEvent::CompleteAction);
            }
            Ok(ActionOutcome::Skipped) => {
                self.raise(WorkflowEvent::CompleteAction);
            }
            Ok(ActionOutcome::WorkflowUpdatePending(template)) => {
                self.exec.stats.actions_succeeded += 1;
                self.exec.stats.last_action_result = LastActionResult::Success;
                self.raise(WorkflowEvent::UpdateWorkflow(template));
            }
            Err(e) if e.is_contract_violation() => return Err(e),
            Err(e) => {
                // Captured failure: reflect it on the notebook and in the
                // effect log, then let the behavior finish so the Planner
                // can decide what happens next.
                let message = e.to_string();
                tracing::warn!(kind = %action.kind, error = %message, "action failed, continuing");
                self.exec.stats.last_action_result = LastActionResult::Error;
                if let Some(cell_id) = self.active_code_cell_id() {
                    let _ = self
                        .cells
                        .append_outputs(&cell_id, vec![CellOutput::error(message.clone())]);
                }
                self.context
                    .push_effect(format!("action {} failed: {message}", action.kind));
                self.raise(WorkflowEvent::CompleteAction);
            }
        }
        Ok(())
    }

    /// Advance to the next buffered action or finish the behavior.
    fn on_action_completed(&mut self) -> Result<(), EngineError> {
        if self.exec.action_index + 1 < self.exec.actions.len() {
            self.exec.action_index += 1;
            self.raise(WorkflowEvent::NextAction);
        } else {
            self.raise(WorkflowEvent::CompleteBehavior);
        }
        Ok(())
    }

    /// Report the behavior to the Planner; the server decides whether to
    /// iterate.
    async fn on_behavior_completed(&mut self) -> Result<(), EngineError> {
        let feedback = self
            .exec
            .stats
            .to_feedback(self.exec.current_behavior_id.clone());
        let request = self.build_observation(BuildOptions {
            stream: false,
            require_progress: true,
            feedback: Some(feedback),
        })?;
        let api = self.api.clone();
        let response = api.planning(&request).await?;
        let should_continue_behaviors = response.continue_behaviors();
        let achieved = response.effective_target_achieved();
        if let Some(update) = response.context_update {
            self.apply_context_update(update)?;
        }

        if let Some(behavior_id) = self.exec.current_behavior_id.take() {
            self.exec.completed_behaviors.push(behavior_id);
        }

        if should_continue_behaviors {
            self.exec.reset_behavior_local();
            self.raise(WorkflowEvent::NextBehavior);
        } else if achieved {
            self.raise(WorkflowEvent::CompleteStep);
        } else {
            // No directive either way: keep moving rather than stall.
            tracing::debug!("planner returned no behavior directive, iterating");
            self.exec.reset_behavior_local();
            self.raise(WorkflowEvent::NextBehavior);
        }
        Ok(())
    }

    /// Template navigation to the next step, or close the stage.
    fn on_step_completed(&mut self) -> Result<(), EngineError> {
        let (Some(stage_id), Some(step_id)) = (
            self.exec.current_stage_id.clone(),
            self.exec.current_step_id.clone(),
        ) else {
            self.raise(WorkflowEvent::CompleteStage);
            return Ok(());
        };

        match self.pipeline.next_step(&stage_id, &step_id) {
            Some(next) => {
                self.exec.current_step_id = Some(next.id.clone());
                self.exec.reset_step_local();
                self.raise(WorkflowEvent::NextStep);
            }
            None => self.raise(WorkflowEvent::CompleteStage),
        }
        Ok(())
    }

    /// Template navigation to the next stage, or close the workflow.
    fn on_stage_completed(&mut self) -> Result<(), EngineError> {
        let Some(stage_id) = self.exec.current_stage_id.clone() else {
            self.raise(WorkflowEvent::CompleteWorkflow);
            return Ok(());
        };

        match self.pipeline.next_stage(&stage_id) {
            Some(next) => {
                let next_id = next.id.clone();
                self.exec.current_step_id =
                    self.pipeline.first_step(&next_id).map(|t| t.id.clone());
                self.exec.current_stage_id = Some(next_id);
                self.exec.reset_step_local();
                self.raise(WorkflowEvent::NextStage);
            }
            None => self.raise(WorkflowEvent::CompleteWorkflow),
        }
        Ok(())
    }

    /// The cell an execution failure should be reported on: the most
    /// recently added cell, when it is a code cell.
    fn active_code_cell_id(&self) -> Option<String> {
        let id = self.context.last_added_cell_id()?;
        let cell = self.cells.cell(id)?;
        (cell.kind == CellKind::Code).then(|| id.to_string())
    }
}
