//! Wire protocol types
//!
//! Request/response shapes shared by the Planner and Generator endpoints,
//! plus the `context_update` delta vocabulary. Field names follow the wire
//! exactly; the handful of camelCase exceptions (`targetAchieved`,
//! `nextStageId`, `isUpdate`, `FSM`) carry explicit renames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::cell::{CellKind, CellOutput};
use crate::types::template::{WorkflowStep, WorkflowTemplate};

/// Per-level outputs tracking triple over variable names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputsTriple {
    #[serde(default)]
    pub expected: Vec<String>,
    #[serde(default)]
    pub produced: Vec<String>,
    #[serde(default)]
    pub in_progress: Vec<String>,
}

/// `observation.location.current`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentLocation {
    pub stage_id: Option<String>,
    pub step_id: Option<String>,
    pub behavior_id: Option<String>,
    pub behavior_iteration: u32,
}

/// Progress summary for the stages or steps level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelProgress {
    pub completed: Vec<String>,
    pub current: Option<String>,
    pub remaining: Vec<String>,
    pub focus: String,
    pub current_outputs: OutputsTriple,
}

/// Progress summary for the behaviors level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorProgress {
    pub completed: Vec<String>,
    pub current: Option<String>,
    pub iteration: u32,
    pub focus: String,
    pub current_outputs: OutputsTriple,
}

/// `observation.location.progress`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSection {
    pub stages: LevelProgress,
    pub steps: LevelProgress,
    pub behaviors: BehaviorProgress,
}

/// `observation.location.goals`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalSection {
    pub stage: Option<String>,
    pub step: Option<String>,
    pub behavior: Option<String>,
}

/// `observation.location`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationSection {
    pub current: CurrentLocation,
    pub progress: ProgressSection,
    pub goals: GoalSection,
}

/// One serialized notebook cell inside the observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CellKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CellOutput>,
    #[serde(rename = "isUpdate", default, skip_serializing_if = "Option::is_none")]
    pub is_update: Option<bool>,
}

/// `observation.context.notebook`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookSummary {
    pub title: String,
    pub cells: Vec<CellPayload>,
    pub cell_count: usize,
    pub last_cell_type: Option<CellKind>,
    pub last_output: Option<String>,
}

/// `observation.context.effects`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectsPayload {
    #[serde(default)]
    pub current: Vec<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

/// `observation.context.FSM`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsmSummary {
    pub state: String,
    pub last_transition: Option<String>,
}

/// `observation.context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationContext {
    pub variables: Map<String, Value>,
    pub effects: EffectsPayload,
    pub notebook: NotebookSummary,
    #[serde(rename = "FSM")]
    pub fsm: FsmSummary,
}

/// The full observation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub location: LocationSection,
    pub context: ObservationContext,
}

/// Result of the last action within a behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastActionResult {
    Success,
    Error,
    #[default]
    None,
}

/// Feedback block appended to Planner calls after a behavior completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorFeedback {
    pub behavior_id: Option<String>,
    pub actions_executed: u32,
    pub actions_succeeded: u32,
    pub sections_added: u32,
    pub last_action_result: LastActionResult,
}

/// `options` block of a request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    pub stream: bool,
}

/// Request body sent to both `/planning` and `/generating`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub observation: Observation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior_feedback: Option<BehaviorFeedback>,
    pub options: RequestOptions,
}

/// Behavior-loop directive inside a Planner response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransitionDirective {
    #[serde(default)]
    pub continue_behaviors: Option<bool>,
    #[serde(default)]
    pub target_achieved: Option<bool>,
}

/// Hierarchy level addressed by a progress or outputs update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Stages,
    Steps,
    Behaviors,
}

/// `context_update.progress_update`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressUpdate {
    pub level: ProgressLevel,
    pub focus: String,
}

/// `context_update.outputs_update`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputsUpdate {
    pub level: ProgressLevel,
    pub outputs: OutputsTriple,
}

/// `context_update.effects_update`. Replacement is atomic per list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EffectsUpdate {
    #[serde(default)]
    pub current: Option<Vec<String>>,
    #[serde(default)]
    pub history: Option<Vec<String>>,
}

/// `context_update.workflow_update`: a replacement template, optionally
/// redirecting the engine to a named stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowUpdate {
    #[serde(flatten)]
    pub template: WorkflowTemplate,
    #[serde(rename = "nextStageId", default)]
    pub next_stage_id: Option<String>,
}

/// `context_update.stage_steps_update`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageStepsUpdate {
    pub stage_id: String,
    pub steps: Vec<WorkflowStep>,
}

/// Server → client context delta, applied atomically after every Planner
/// response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextUpdate {
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub progress_update: Option<ProgressUpdate>,
    #[serde(default)]
    pub outputs_update: Option<OutputsUpdate>,
    #[serde(default)]
    pub effects_update: Option<EffectsUpdate>,
    #[serde(default)]
    pub workflow_update: Option<WorkflowUpdate>,
    #[serde(default)]
    pub stage_steps_update: Option<StageStepsUpdate>,
    /// Keys this engine does not understand; logged and ignored.
    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl ContextUpdate {
    pub fn is_empty(&self) -> bool {
        self.variables.is_none()
            && self.progress_update.is_none()
            && self.outputs_update.is_none()
            && self.effects_update.is_none()
            && self.workflow_update.is_none()
            && self.stage_steps_update.is_none()
    }
}

/// Planner response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlanningResponse {
    #[serde(rename = "targetAchieved", default)]
    pub target_achieved: bool,
    #[serde(default)]
    pub transition: Option<TransitionDirective>,
    #[serde(default)]
    pub context_update: Option<ContextUpdate>,
    /// Advisory filter for the next Generator payload; accepted, not acted on.
    #[serde(default)]
    pub context_filter: Option<Value>,
}

impl PlanningResponse {
    /// Effective target verdict: the transition directive wins, falling
    /// back to the top-level flag.
    pub fn effective_target_achieved(&self) -> bool {
        self.transition
            .as_ref()
            .and_then(|t| t.target_achieved)
            .unwrap_or(self.target_achieved)
    }

    /// Whether the Planner asked for another behavior iteration.
    pub fn continue_behaviors(&self) -> bool {
        self.transition
            .as_ref()
            .and_then(|t| t.continue_behaviors)
            .unwrap_or(false)
    }
}

/// Non-streaming Generator fallback body.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionBatch {
    #[serde(default)]
    pub actions: Vec<Value>,
}
