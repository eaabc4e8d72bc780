//! Core data model: cells, workflow templates, actions, wire protocol.

pub mod action;
pub mod cell;
pub mod protocol;
pub mod template;

pub use action::{
    ActionDescriptor, AddAction, EndPhaseAction, ExecAction, IsThinkingAction, NextEventAction,
    SectionAction, UpdateStageStepsAction, UpdateTitleAction, UpdateWorkflowAction,
};
pub use cell::{Cell, CellKind, CellOutput, OutputKind};
pub use protocol::{
    ActionBatch, ApiRequest, BehaviorFeedback, CellPayload, ContextUpdate, CurrentLocation,
    EffectsPayload, EffectsUpdate, FsmSummary, GoalSection, LastActionResult, LevelProgress,
    LocationSection, NotebookSummary, Observation, ObservationContext, OutputsTriple,
    OutputsUpdate, PlanningResponse, ProgressLevel, ProgressSection, ProgressUpdate,
    RequestOptions, StageStepsUpdate, TransitionDirective, WorkflowUpdate,
};
pub use template::{WorkflowDescriptor, WorkflowStage, WorkflowStep, WorkflowTemplate};
