//! Workflow engine
//!
//! Single-threaded event loop around the FSM. Events are queued and drained
//! in order; each successful transition runs the new state's entry effect,
//! which consults the stores, may call a remote service, and raises the
//! next event. Network I/O is the only suspension point, so store
//! invariants hold without locking.

pub mod effects;
pub mod fsm;
pub mod observation;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::client::api::{WorkflowApi, WorkflowApiClient};
use crate::client::executor::{CodeExecutor, KernelClient};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::cells::CellStore;
use crate::store::context::ContextStore;
use crate::store::pipeline::PipelineStore;
use crate::store::script::{ActionRegistry, ScriptStore};
use crate::types::action::ActionDescriptor;
use crate::types::protocol::{BehaviorFeedback, ContextUpdate, LastActionResult};
use crate::types::template::{WorkflowDescriptor, WorkflowStep, WorkflowTemplate};

pub use fsm::{Fsm, TransitionRecord, WorkflowEvent, WorkflowState};
pub use observation::{BuildOptions, ObservationBuilder};
pub use snapshot::EngineSnapshot;

/// Counters produced by the most recent behavior.
#[derive(Debug, Clone, Default)]
pub struct BehaviorStats {
    pub actions_executed: u32,
    pub actions_succeeded: u32,
    pub sections_added: u32,
    pub last_action_result: LastActionResult,
}

impl BehaviorStats {
    pub fn to_feedback(&self, behavior_id: Option<String>) -> BehaviorFeedback {
        BehaviorFeedback {
            behavior_id,
            actions_executed: self.actions_executed,
            actions_succeeded: self.actions_succeeded,
            sections_added: self.sections_added,
            last_action_result: self.last_action_result,
        }
    }
}

/// FSM-local run state; not persisted beyond a run except through
/// [`EngineSnapshot`].
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub current_stage_id: Option<String>,
    pub current_step_id: Option<String>,
    pub current_behavior_id: Option<String>,
    pub behavior_iteration: u32,
    pub actions: Vec<ActionDescriptor>,
    pub action_index: usize,
    pub completed_behaviors: Vec<String>,
    pub stats: BehaviorStats,
    pub(crate) pending_template: Option<WorkflowTemplate>,
    pub(crate) pending_steps: Option<Vec<WorkflowStep>>,
}

impl ExecutionContext {
    fn reset_behavior_local(&mut self) {
        self.current_behavior_id = None;
        self.actions.clear();
        self.action_index = 0;
        self.stats = BehaviorStats::default();
    }

    fn reset_step_local(&mut self) {
        self.reset_behavior_local();
        self.behavior_iteration = 0;
        self.completed_behaviors.clear();
    }

    /// Navigation-only reset used when the template changes under a live
    /// behavior: buffered actions keep running, but behavior numbering
    /// restarts with the relocated step.
    fn reset_step_navigation(&mut self) {
        self.current_behavior_id = None;
        self.behavior_iteration = 0;
        self.completed_behaviors.clear();
    }
}

/// Where a drain ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Terminal: the workflow finished.
    Completed,
    /// Parked by `pause()` or the step gate; `resume()` continues.
    Paused,
    /// Parked on `WORKFLOW_UPDATE_PENDING`; confirm or reject to continue.
    AwaitingWorkflowUpdate,
    /// Parked on `STEP_UPDATE_PENDING`; confirm or reject to continue.
    AwaitingStepUpdate,
    /// Terminal: cancelled from the control surface.
    Cancelled,
    /// Terminal: the engine transitioned to `ERROR`.
    Failed,
    /// Nothing to do (engine is idle).
    Idle,
}

/// Builder for [`WorkflowEngine`].
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    descriptor: Option<WorkflowDescriptor>,
    api: Option<Arc<dyn WorkflowApi>>,
    executor: Option<Arc<dyn CodeExecutor>>,
}

impl WorkflowEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn descriptor(mut self, descriptor: WorkflowDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Inject a decision-service implementation (tests, adapters).
    pub fn api(mut self, api: Arc<dyn WorkflowApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Inject a code executor implementation.
    pub fn executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, EngineError> {
        let descriptor = self.descriptor.ok_or_else(|| {
            EngineError::ConfigurationError("a workflow descriptor is required".into())
        })?;
        let api = self
            .api
            .unwrap_or_else(|| Arc::new(WorkflowApiClient::new(&self.config)));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(KernelClient::new(&self.config)));
        let max_steps = self.config.max_steps;
        Ok(WorkflowEngine {
            config: self.config,
            fsm: Fsm::new(),
            cells: CellStore::new(),
            context: ContextStore::new(),
            pipeline: PipelineStore::new(descriptor),
            script: ScriptStore::new(),
            api,
            executor,
            exec: ExecutionContext::default(),
            queue: VecDeque::new(),
            paused: false,
            effect_pending: false,
            step_counter: 0,
            max_steps,
            last_error: None,
        })
    }
}

/// The workflow execution engine.
pub struct WorkflowEngine {
    config: EngineConfig,
    fsm: Fsm,
    cells: CellStore,
    context: ContextStore,
    pipeline: PipelineStore,
    script: ScriptStore,
    api: Arc<dyn WorkflowApi>,
    executor: Arc<dyn CodeExecutor>,
    exec: ExecutionContext,
    queue: VecDeque<WorkflowEvent>,
    paused: bool,
    /// Set when the step gate parked the engine before running the entry
    /// effect of the current state; `resume()` then re-enters that effect.
    effect_pending: bool,
    step_counter: u64,
    max_steps: u64,
    last_error: Option<String>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("state", &self.fsm.state())
            .field("stage", &self.exec.current_stage_id)
            .field("step", &self.exec.current_step_id)
            .field("behavior", &self.exec.current_behavior_id)
            .field("paused", &self.paused)
            .field("step_counter", &self.step_counter)
            .finish()
    }
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    // --- accessors ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> WorkflowState {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &Fsm {
        &self.fsm
    }

    pub fn cells(&self) -> &CellStore {
        &self.cells
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn pipeline(&self) -> &PipelineStore {
        &self.pipeline
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.exec
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Action registry, for registering custom handlers before `start`.
    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        self.script.registry_mut()
    }

    // --- control surface ---

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Park the engine at the next transition boundary.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn set_max_steps(&mut self, max_steps: u64) {
        self.max_steps = max_steps;
    }

    pub fn step_counter(&self) -> u64 {
        self.step_counter
    }

    pub fn reset_step_counter(&mut self) {
        self.step_counter = 0;
    }

    /// Cancel the run. Terminal; only `RESET` leaves `CANCELLED`.
    pub fn cancel(&mut self) {
        self.queue.clear();
        self.fsm.apply(&WorkflowEvent::Cancel);
        self.paused = false;
        self.effect_pending = false;
    }

    /// Return a terminal engine to `IDLE`, keeping the notebook transcript.
    pub fn reset(&mut self) {
        if self.fsm.apply(&WorkflowEvent::Reset).is_some() {
            self.queue.clear();
            self.exec = ExecutionContext::default();
            self.paused = false;
            self.effect_pending = false;
            self.last_error = None;
        }
    }

    /// Start the workflow. Allowed from `IDLE` and, as a retry, from any
    /// terminal state (which is reset first).
    pub async fn start(&mut self) -> Result<RunOutcome, EngineError> {
        if self.fsm.state().is_terminal() {
            self.reset();
        }
        if self.fsm.state() != WorkflowState::Idle {
            return Err(EngineError::InvalidState(format!(
                "cannot start from {}",
                self.fsm.state()
            )));
        }
        self.queue.clear();
        self.paused = false;
        self.raise(WorkflowEvent::StartWorkflow);
        self.drain().await
    }

    /// Clear the pause flag and continue. When the step gate parked the
    /// engine before an entry effect ran, that effect runs now (and counts
    /// against the step gate).
    pub async fn resume(&mut self) -> Result<RunOutcome, EngineError> {
        self.paused = false;
        if self.effect_pending {
            self.effect_pending = false;
            let state = self.fsm.state();
            if state == WorkflowState::ActionRunning {
                self.step_counter += 1;
            }
            if let Err(e) = self.run_effect(state).await {
                return self.fail_with(e);
            }
        }
        self.drain().await
    }

    /// Confirm a pending `update_workflow`: the replacement template is
    /// adopted and the behavior resumes.
    pub async fn confirm_workflow_update(&mut self) -> Result<RunOutcome, EngineError> {
        self.expect_state(WorkflowState::WorkflowUpdatePending)?;
        self.raise(WorkflowEvent::UpdateWorkflowConfirmed);
        self.drain().await
    }

    /// Reject a pending `update_workflow`: the template is kept as-is.
    pub async fn reject_workflow_update(&mut self) -> Result<RunOutcome, EngineError> {
        self.expect_state(WorkflowState::WorkflowUpdatePending)?;
        self.raise(WorkflowEvent::UpdateWorkflowRejected);
        self.drain().await
    }

    /// Confirm a pending step-sequence update for the current stage.
    pub async fn confirm_step_update(&mut self) -> Result<RunOutcome, EngineError> {
        self.expect_state(WorkflowState::StepUpdatePending)?;
        self.raise(WorkflowEvent::UpdateStepConfirmed);
        self.drain().await
    }

    /// Reject a pending step-sequence update.
    pub async fn reject_step_update(&mut self) -> Result<RunOutcome, EngineError> {
        self.expect_state(WorkflowState::StepUpdatePending)?;
        self.raise(WorkflowEvent::UpdateStepRejected);
        self.drain().await
    }

    /// Control-surface escape hatch: dispatch an arbitrary event and drain.
    /// Invalid events are ignored with a warning, like any other.
    pub async fn inject_event(&mut self, event: WorkflowEvent) -> Result<RunOutcome, EngineError> {
        self.raise(event);
        self.drain().await
    }

    // --- event loop ---

    pub(crate) fn raise(&mut self, event: WorkflowEvent) {
        self.queue.push_back(event);
    }

    async fn drain(&mut self) -> Result<RunOutcome, EngineError> {
        loop {
            if self.paused {
                return Ok(RunOutcome::Paused);
            }
            let Some(event) = self.queue.pop_front() else {
                break;
            };
            let Some(next) = self.fsm.apply(&event) else {
                continue;
            };
            self.after_transition(&event)?;

            if next == WorkflowState::ActionRunning {
                if self.max_steps > 0 && self.step_counter >= self.max_steps {
                    tracing::info!(
                        max_steps = self.max_steps,
                        "step limit reached, pausing before next action"
                    );
                    self.paused = true;
                    self.effect_pending = true;
                    return Ok(RunOutcome::Paused);
                }
                self.step_counter += 1;
            }

            if let Err(e) = self.run_effect(next).await {
                return self.fail_with(e);
            }
        }

        let state = self.fsm.state();
        match state {
            WorkflowState::WorkflowCompleted => Ok(RunOutcome::Completed),
            WorkflowState::Cancelled => Ok(RunOutcome::Cancelled),
            WorkflowState::Error => Ok(RunOutcome::Failed),
            WorkflowState::WorkflowUpdatePending => Ok(RunOutcome::AwaitingWorkflowUpdate),
            WorkflowState::StepUpdatePending => Ok(RunOutcome::AwaitingStepUpdate),
            WorkflowState::Idle => Ok(RunOutcome::Idle),
            other => Err(EngineError::InternalError(format!(
                "engine stalled in {other} with an empty event queue"
            ))),
        }
    }

    fn fail_with(&mut self, error: EngineError) -> Result<RunOutcome, EngineError> {
        tracing::error!(error = %error, "state effect failed");
        self.last_error = Some(error.to_string());
        self.queue.clear();
        self.fsm.apply(&WorkflowEvent::Fail(error.to_string()));
        Err(error)
    }

    fn expect_state(&self, expected: WorkflowState) -> Result<(), EngineError> {
        if self.fsm.state() == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState(format!(
                "expected {expected}, engine is in {}",
                self.fsm.state()
            )))
        }
    }

    /// Event-payload bookkeeping that must happen between the transition
    /// and the entry effect.
    fn after_transition(&mut self, event: &WorkflowEvent) -> Result<(), EngineError> {
        match event {
            WorkflowEvent::UpdateWorkflow(template) => {
                self.exec.pending_template = Some(template.clone());
            }
            WorkflowEvent::UpdateStep(steps) => {
                self.exec.pending_steps = Some(steps.clone());
            }
            WorkflowEvent::UpdateWorkflowConfirmed => {
                if let Some(template) = self.exec.pending_template.take() {
                    self.adopt_template(template, None);
                }
            }
            WorkflowEvent::UpdateWorkflowRejected => {
                self.exec.pending_template = None;
            }
            WorkflowEvent::UpdateStepConfirmed => {
                if let Some(steps) = self.exec.pending_steps.take() {
                    let stage_id = self.exec.current_stage_id.clone().ok_or_else(|| {
                        EngineError::InvalidState("step update with no current stage".into())
                    })?;
                    self.pipeline.set_stage_steps(&stage_id, steps)?;
                    self.refresh_step_in_stage(&stage_id);
                }
            }
            WorkflowEvent::UpdateStepRejected => {
                self.exec.pending_steps = None;
            }
            WorkflowEvent::Reset => {
                self.exec = ExecutionContext::default();
                self.paused = false;
                self.effect_pending = false;
                self.last_error = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Replace the template and re-resolve the current location, falling
    /// back to the first stage/step when the old ids no longer exist.
    fn adopt_template(&mut self, template: WorkflowTemplate, next_stage_id: Option<String>) {
        self.pipeline.set_template(template);

        if let Some(stage_id) = next_stage_id {
            if self.pipeline.stage(&stage_id).is_some() {
                let first = self.pipeline.first_step(&stage_id).map(|t| t.id.clone());
                self.exec.current_stage_id = Some(stage_id);
                self.exec.current_step_id = first;
                self.exec.reset_step_navigation();
                return;
            }
            tracing::warn!(stage_id = %stage_id, "nextStageId does not resolve in the new template");
        }

        let stage_resolves = self
            .exec
            .current_stage_id
            .as_deref()
            .is_some_and(|id| self.pipeline.stage(id).is_some());
        if !stage_resolves {
            let first_stage = self.pipeline.first_stage().map(|s| s.id.clone());
            let first_step = first_stage
                .as_deref()
                .and_then(|id| self.pipeline.first_step(id))
                .map(|t| t.id.clone());
            self.exec.current_stage_id = first_stage;
            self.exec.current_step_id = first_step;
            self.exec.reset_step_navigation();
            return;
        }

        let stage_id = self.exec.current_stage_id.clone().unwrap_or_default();
        self.refresh_step_in_stage(&stage_id);
    }

    /// Keep the current step if it still resolves in the stage, otherwise
    /// fall back to the stage's first step.
    fn refresh_step_in_stage(&mut self, stage_id: &str) {
        let step_resolves = self
            .exec
            .current_step_id
            .as_deref()
            .is_some_and(|id| self.pipeline.step(stage_id, id).is_some());
        if !step_resolves {
            self.exec.current_step_id =
                self.pipeline.first_step(stage_id).map(|t| t.id.clone());
            self.exec.reset_step_navigation();
        }
    }

    /// Apply a Planner `context_update` delta. Validation happens before
    /// any mutation so that a failing delta leaves the stores untouched.
    pub(crate) fn apply_context_update(
        &mut self,
        update: ContextUpdate,
    ) -> Result<(), EngineError> {
        for key in update.unknown.keys() {
            tracing::warn!(key = %key, "ignoring unknown context_update key");
        }

        // Validate first: the delta applies atomically or not at all.
        if let Some(wu) = &update.workflow_update {
            if let Some(next) = &wu.next_stage_id {
                if wu.template.stage(next).is_none() {
                    return Err(EngineError::ProtocolError(format!(
                        "workflow_update nextStageId `{next}` not present in template"
                    )));
                }
            }
        }
        if let Some(ssu) = &update.stage_steps_update {
            let target = match &update.workflow_update {
                Some(wu) => wu.template.stage(&ssu.stage_id).is_some(),
                None => self.pipeline.stage(&ssu.stage_id).is_some(),
            };
            if !target {
                return Err(EngineError::ProtocolError(format!(
                    "stage_steps_update names unknown stage `{}`",
                    ssu.stage_id
                )));
            }
        }

        if let Some(vars) = update.variables {
            self.context.set_variables(vars);
        }
        if let Some(progress) = update.progress_update {
            self.context.set_focus(progress.level, progress.focus);
        }
        if let Some(outputs) = update.outputs_update {
            self.context.set_outputs(outputs.level, outputs.outputs);
        }
        if let Some(effects) = update.effects_update {
            self.context.replace_effects(effects.current, effects.history);
        }
        if let Some(wu) = update.workflow_update {
            let next = wu.next_stage_id.clone();
            self.adopt_template(wu.template, next);
        }
        if let Some(ssu) = update.stage_steps_update {
            self.pipeline.set_stage_steps(&ssu.stage_id, ssu.steps)?;
            if self.exec.current_stage_id.as_deref() == Some(ssu.stage_id.as_str()) {
                let stage_id = ssu.stage_id.clone();
                self.refresh_step_in_stage(&stage_id);
            }
        }
        Ok(())
    }

    /// Build an observation request. The dirty set is cleared as part of
    /// the build; this is the only place that happens.
    pub(crate) fn build_observation(
        &mut self,
        opts: BuildOptions,
    ) -> Result<crate::types::protocol::ApiRequest, EngineError> {
        ObservationBuilder {
            fsm: &self.fsm,
            cells: &mut self.cells,
            context: &self.context,
            pipeline: &self.pipeline,
            exec: &self.exec,
        }
        .build(opts)
    }
}
