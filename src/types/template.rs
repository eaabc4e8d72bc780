//! Workflow template tree
//!
//! A workflow is an ordered list of stages; a stage an ordered list of
//! steps. The tree is owned by [`crate::store::PipelineStore`], which layers
//! navigation queries on top. Templates arrive either with the initial
//! descriptor or later from the Planner as a `workflow_update` delta.

use serde::{Deserialize, Serialize};

/// A step inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            goal: String::new(),
            focus: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }
}

/// A stage inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowStage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            goal: String::new(),
            focus: None,
            steps: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// The full workflow tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub stages: Vec<WorkflowStage>,
}

impl WorkflowTemplate {
    /// Empty template, to be populated by a Planner `workflow_update`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: WorkflowStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, stage_id: &str) -> Option<&WorkflowStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn stage_mut(&mut self, stage_id: &str) -> Option<&mut WorkflowStage> {
        self.stages.iter_mut().find(|s| s.id == stage_id)
    }

    pub fn step(&self, stage_id: &str, step_id: &str) -> Option<&WorkflowStep> {
        self.stage(stage_id)?.steps.iter().find(|t| t.id == step_id)
    }

    pub fn first_stage(&self) -> Option<&WorkflowStage> {
        self.stages.first()
    }

    pub fn first_step(&self, stage_id: &str) -> Option<&WorkflowStep> {
        self.stage(stage_id)?.steps.first()
    }

    pub fn next_stage(&self, stage_id: &str) -> Option<&WorkflowStage> {
        let idx = self.stages.iter().position(|s| s.id == stage_id)?;
        self.stages.get(idx + 1)
    }

    pub fn next_step(&self, stage_id: &str, step_id: &str) -> Option<&WorkflowStep> {
        let stage = self.stage(stage_id)?;
        let idx = stage.steps.iter().position(|t| t.id == step_id)?;
        stage.steps.get(idx + 1)
    }

    pub fn is_last_stage(&self, stage_id: &str) -> bool {
        match self.stages.last() {
            Some(last) => last.id == stage_id,
            None => true,
        }
    }

    pub fn is_last_step_in_stage(&self, stage_id: &str, step_id: &str) -> bool {
        match self.stage(stage_id).and_then(|s| s.steps.last()) {
            Some(last) => last.id == step_id,
            None => true,
        }
    }
}

/// User problem descriptor handed to the engine at initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub problem_name: String,
    pub user_goal: String,
    #[serde(default)]
    pub problem_description: String,
    #[serde(default)]
    pub context_description: String,
    /// Omitted template means the Planner seeds one via `workflow_update`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<WorkflowTemplate>,
}

impl WorkflowDescriptor {
    pub fn new(problem_name: impl Into<String>, user_goal: impl Into<String>) -> Self {
        Self {
            problem_name: problem_name.into(),
            user_goal: user_goal.into(),
            ..Default::default()
        }
    }

    pub fn with_problem_description(mut self, text: impl Into<String>) -> Self {
        self.problem_description = text.into();
        self
    }

    pub fn with_context_description(mut self, text: impl Into<String>) -> Self {
        self.context_description = text.into();
        self
    }

    pub fn with_template(mut self, template: WorkflowTemplate) -> Self {
        self.template = Some(template);
        self
    }
}
