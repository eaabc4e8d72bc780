//! Pipeline store
//!
//! Owns the workflow template and the user problem descriptor. Navigation
//! methods are pure lookups; replacement (`set_template`) is atomic and it
//! is the caller's job to re-resolve current ids afterwards.

use crate::types::template::{
    WorkflowDescriptor, WorkflowStage, WorkflowStep, WorkflowTemplate,
};

/// Template owner plus navigation helpers.
#[derive(Debug, Default)]
pub struct PipelineStore {
    descriptor: WorkflowDescriptor,
    template: WorkflowTemplate,
}

impl PipelineStore {
    /// Initialize from a descriptor. A missing template seeds an empty one;
    /// the Planner is expected to populate it via `workflow_update`.
    pub fn new(mut descriptor: WorkflowDescriptor) -> Self {
        let template = descriptor.template.take().unwrap_or_default();
        Self {
            descriptor,
            template,
        }
    }

    pub fn descriptor(&self) -> &WorkflowDescriptor {
        &self.descriptor
    }

    pub fn template(&self) -> &WorkflowTemplate {
        &self.template
    }

    /// Atomically replace the template.
    pub fn set_template(&mut self, template: WorkflowTemplate) {
        self.template = template;
    }

    /// Replace the step sequence of one stage. Errors if the stage is
    /// unknown so a multi-key context update can fail before applying.
    pub fn set_stage_steps(
        &mut self,
        stage_id: &str,
        steps: Vec<WorkflowStep>,
    ) -> Result<(), crate::error::EngineError> {
        match self.template.stage_mut(stage_id) {
            Some(stage) => {
                stage.steps = steps;
                Ok(())
            }
            None => Err(crate::error::EngineError::ProtocolError(format!(
                "stage_steps_update names unknown stage `{stage_id}`"
            ))),
        }
    }

    // --- navigation (delegates to the template) ---

    pub fn first_stage(&self) -> Option<&WorkflowStage> {
        self.template.first_stage()
    }

    pub fn stage(&self, stage_id: &str) -> Option<&WorkflowStage> {
        self.template.stage(stage_id)
    }

    pub fn step(&self, stage_id: &str, step_id: &str) -> Option<&WorkflowStep> {
        self.template.step(stage_id, step_id)
    }

    pub fn first_step(&self, stage_id: &str) -> Option<&WorkflowStep> {
        self.template.first_step(stage_id)
    }

    pub fn next_stage(&self, stage_id: &str) -> Option<&WorkflowStage> {
        self.template.next_stage(stage_id)
    }

    pub fn next_step(&self, stage_id: &str, step_id: &str) -> Option<&WorkflowStep> {
        self.template.next_step(stage_id, step_id)
    }

    pub fn is_last_stage(&self, stage_id: &str) -> bool {
        self.template.is_last_stage(stage_id)
    }

    pub fn is_last_step_in_stage(&self, stage_id: &str, step_id: &str) -> bool {
        self.template.is_last_step_in_stage(stage_id, step_id)
    }

    /// Stage ids before / after the given one, for progress payloads.
    pub fn stage_neighbors(&self, stage_id: Option<&str>) -> (Vec<String>, Vec<String>) {
        let Some(stage_id) = stage_id else {
            let all = self.template.stages.iter().map(|s| s.id.clone()).collect();
            return (Vec::new(), all);
        };
        match self.template.stages.iter().position(|s| s.id == stage_id) {
            Some(idx) => (
                self.template.stages[..idx]
                    .iter()
                    .map(|s| s.id.clone())
                    .collect(),
                self.template.stages[idx + 1..]
                    .iter()
                    .map(|s| s.id.clone())
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Step ids before / after the given one within a stage.
    pub fn step_neighbors(
        &self,
        stage_id: Option<&str>,
        step_id: Option<&str>,
    ) -> (Vec<String>, Vec<String>) {
        let Some(stage) = stage_id.and_then(|id| self.template.stage(id)) else {
            return (Vec::new(), Vec::new());
        };
        let Some(step_id) = step_id else {
            let all = stage.steps.iter().map(|t| t.id.clone()).collect();
            return (Vec::new(), all);
        };
        match stage.steps.iter().position(|t| t.id == step_id) {
            Some(idx) => (
                stage.steps[..idx].iter().map(|t| t.id.clone()).collect(),
                stage.steps[idx + 1..].iter().map(|t| t.id.clone()).collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }
}
