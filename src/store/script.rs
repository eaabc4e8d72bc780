//! Script store and action registry
//!
//! Dispatch of typed Generator actions to handlers. The registry is a plain
//! table of `(type, handler)` built at init; tests and embedders register
//! custom handlers before the engine starts. Ordered pre/post hooks observe
//! every dispatch without rewriting it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::client::executor::CodeExecutor;
use crate::error::{ActionFailureKind, EngineError};
use crate::store::cells::CellStore;
use crate::store::context::{ContextStore, LAST_ADDED_CELL_ID};
use crate::store::pipeline::PipelineStore;
use crate::types::action::{
    ActionDescriptor, AddAction, ExecAction, IsThinkingAction, SectionAction,
    UpdateStageStepsAction, UpdateTitleAction, UpdateWorkflowAction,
};
use crate::types::cell::{Cell, CellKind};
use crate::types::template::WorkflowTemplate;

/// Result of one action dispatch.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Handler ran to completion.
    Completed {
        /// Whether the action added a chapter/section heading.
        section_added: bool,
    },
    /// `update_workflow` escalation: the template must not be applied until
    /// the engine confirms it through the two-phase update boundary.
    WorkflowUpdatePending(WorkflowTemplate),
    /// Unknown action type; nothing was done.
    Skipped,
}

impl ActionOutcome {
    pub fn completed() -> Self {
        Self::Completed {
            section_added: false,
        }
    }

    pub fn section() -> Self {
        Self::Completed {
            section_added: true,
        }
    }
}

/// Narrow mutable view over the stores a handler may touch.
pub struct ScriptContext<'a> {
    pub cells: &'a mut CellStore,
    pub context: &'a mut ContextStore,
    pub pipeline: &'a mut PipelineStore,
    pub executor: &'a dyn CodeExecutor,
    pub counters: &'a mut SectionCounters,
}

/// Chapter/section numbering plus the active thinking cell.
#[derive(Debug, Clone, Default)]
pub struct SectionCounters {
    pub chapter: u32,
    pub section: u32,
    pub active_thinking_cell: Option<String>,
}

/// One registered action handler.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError>;
}

/// Observe-only hook invoked before each dispatch.
pub type PreDispatchHook = Arc<dyn Fn(&ActionDescriptor) + Send + Sync>;
/// Observe-only hook invoked after each dispatch with its result.
pub type PostDispatchHook =
    Arc<dyn Fn(&ActionDescriptor, &Result<ActionOutcome, EngineError>) + Send + Sync>;

/// Table of action handlers plus dispatch hooks.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    pre_hooks: Vec<PreDispatchHook>,
    post_hooks: Vec<PostDispatchHook>,
}

impl ActionRegistry {
    /// Empty registry; see [`ActionRegistry::with_builtin_handlers`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every builtin action type.
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::new();
        registry.register("add", Arc::new(AddHandler));
        registry.register("exec", Arc::new(ExecHandler));
        registry.register("new_chapter", Arc::new(NewChapterHandler));
        registry.register("new_section", Arc::new(NewSectionHandler));
        registry.register("is_thinking", Arc::new(IsThinkingHandler));
        registry.register("finish_thinking", Arc::new(FinishThinkingHandler));
        registry.register("update_title", Arc::new(UpdateTitleHandler));
        registry.register("update_workflow", Arc::new(UpdateWorkflowHandler));
        registry.register("update_stage_steps", Arc::new(UpdateStageStepsHandler));
        // Reserved types: registered so they do not trip the unknown-action
        // warning, but they do nothing.
        registry.register("end_phase", Arc::new(NoopHandler));
        registry.register("next_event", Arc::new(NoopHandler));
        registry
    }

    /// Register a handler. Re-registering a type replaces the prior entry.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn add_pre_hook(&mut self, hook: PreDispatchHook) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: PostDispatchHook) {
        self.post_hooks.push(hook);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Dispatch one action. Unknown types warn and skip.
    pub async fn dispatch(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        for hook in &self.pre_hooks {
            hook(action);
        }
        let result = match self.handlers.get(&action.kind) {
            Some(handler) => handler.handle(ctx, action).await,
            None => {
                tracing::warn!(kind = %action.kind, "unknown action type, skipping");
                Ok(ActionOutcome::Skipped)
            }
        };
        for hook in &self.post_hooks {
            hook(action, &result);
        }
        result
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("handlers", &kinds)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .finish()
    }
}

/// Registry plus the dispatch-scoped counters.
#[derive(Debug, Default)]
pub struct ScriptStore {
    registry: ActionRegistry,
    counters: SectionCounters,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self {
            registry: ActionRegistry::with_builtin_handlers(),
            counters: SectionCounters::default(),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn counters(&self) -> &SectionCounters {
        &self.counters
    }

    /// Dispatch one action against the given stores.
    pub async fn dispatch(
        &mut self,
        cells: &mut CellStore,
        context: &mut ContextStore,
        pipeline: &mut PipelineStore,
        executor: &dyn CodeExecutor,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let Self { registry, counters } = self;
        let mut ctx = ScriptContext {
            cells,
            context,
            pipeline,
            executor,
            counters,
        };
        registry.dispatch(&mut ctx, action).await
    }
}

// --- builtin handlers ---

struct AddHandler;

#[async_trait]
impl ActionHandler for AddHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let add: AddAction = action.decode()?;
        let kind = if add.is_markdown() {
            CellKind::Markdown
        } else {
            CellKind::Code
        };
        let id = ctx.cells.add(Cell::new(kind, add.content))?;
        ctx.context.set_variable(LAST_ADDED_CELL_ID, json!(id));
        Ok(ActionOutcome::completed())
    }
}

struct ExecHandler;

#[async_trait]
impl ActionHandler for ExecHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let exec: ExecAction = action.decode()?;
        let cell_id = if exec.codecell_id == LAST_ADDED_CELL_ID {
            ctx.context
                .last_added_cell_id()
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::action_failure(
                        ActionFailureKind::UnknownCell,
                        "exec targets lastAddedCellId but no cell was added",
                    )
                })?
        } else {
            exec.codecell_id.clone()
        };

        let target = ctx.cells.cell(&cell_id).ok_or_else(|| {
            EngineError::action_failure(
                ActionFailureKind::UnknownCell,
                format!("exec targets missing cell {cell_id}"),
            )
        })?;
        let code = target.content.clone();

        // Executing a non-code target materializes a code cell from its
        // content; outputs only ever attach to code cells.
        let cell_id = if target.kind == CellKind::Code {
            cell_id
        } else {
            let id = ctx.cells.add(Cell::new(CellKind::Code, code.clone()))?;
            ctx.context.set_variable(LAST_ADDED_CELL_ID, json!(id.clone()));
            id
        };

        ctx.cells.clear_outputs(&cell_id)?;
        let outputs = ctx
            .executor
            .execute(&code)
            .await
            .map_err(|e| {
                EngineError::action_failure(ActionFailureKind::ExecutionFailed, e.to_string())
            })?;

        for output in &outputs {
            ctx.context.push_effect(output.content.clone());
        }
        ctx.cells.append_outputs(&cell_id, outputs)?;
        ctx.cells.bump_execution_count();
        Ok(ActionOutcome::completed())
    }
}

struct NewChapterHandler;

#[async_trait]
impl ActionHandler for NewChapterHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let section: SectionAction = action.decode()?;
        ctx.counters.chapter += 1;
        ctx.counters.section = 0;
        let cell = Cell::new(CellKind::Markdown, format!("## {}", section.content))
            .with_metadata("chapter_id", json!(ctx.counters.chapter));
        ctx.cells.add(cell)?;
        Ok(ActionOutcome::section())
    }
}

struct NewSectionHandler;

#[async_trait]
impl ActionHandler for NewSectionHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let section: SectionAction = action.decode()?;
        ctx.counters.section += 1;
        let section_id = format!("{}.{}", ctx.counters.chapter.max(1), ctx.counters.section);
        let cell = Cell::new(CellKind::Markdown, format!("### {}", section.content))
            .with_metadata("section_id", json!(section_id));
        ctx.cells.add(cell)?;
        Ok(ActionOutcome::section())
    }
}

struct IsThinkingHandler;

#[async_trait]
impl ActionHandler for IsThinkingHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let thinking: IsThinkingAction = action.decode()?;
        let mut cell = Cell::new(
            CellKind::Thinking,
            thinking.thinking_text.unwrap_or_default(),
        );
        if let Some(agent) = thinking.agent_name {
            cell = cell.with_metadata("agent_name", json!(agent));
        }
        let id = ctx.cells.add(cell)?;
        ctx.counters.active_thinking_cell = Some(id);
        Ok(ActionOutcome::completed())
    }
}

struct FinishThinkingHandler;

#[async_trait]
impl ActionHandler for FinishThinkingHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        _action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let id = match ctx.counters.active_thinking_cell.take() {
            Some(id) => Some(id),
            None => ctx
                .cells
                .last_cell_of_kind(CellKind::Thinking)
                .map(|c| c.id.clone()),
        };
        if let Some(id) = id {
            let mut patch = serde_json::Map::new();
            patch.insert("finished".to_string(), json!(true));
            ctx.cells.update_metadata(&id, patch)?;
        } else {
            tracing::warn!("finish_thinking with no thinking cell to finish");
        }
        Ok(ActionOutcome::completed())
    }
}

struct UpdateTitleHandler;

#[async_trait]
impl ActionHandler for UpdateTitleHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let update: UpdateTitleAction = action.decode()?;
        ctx.cells.set_title(update.title);
        Ok(ActionOutcome::completed())
    }
}

struct UpdateWorkflowHandler;

#[async_trait]
impl ActionHandler for UpdateWorkflowHandler {
    async fn handle(
        &self,
        _ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let update: UpdateWorkflowAction = action.decode()?;
        // Never applied in place: the engine owns the confirmation boundary.
        Ok(ActionOutcome::WorkflowUpdatePending(update.updated_workflow))
    }
}

struct UpdateStageStepsHandler;

#[async_trait]
impl ActionHandler for UpdateStageStepsHandler {
    async fn handle(
        &self,
        ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        let update: UpdateStageStepsAction = action.decode()?;
        ctx.pipeline
            .set_stage_steps(&update.stage_id, update.updated_steps)?;
        Ok(ActionOutcome::completed())
    }
}

struct NoopHandler;

#[async_trait]
impl ActionHandler for NoopHandler {
    async fn handle(
        &self,
        _ctx: &mut ScriptContext<'_>,
        action: &ActionDescriptor,
    ) -> Result<ActionOutcome, EngineError> {
        tracing::debug!(kind = %action.kind, "reserved action type, nothing to do");
        Ok(ActionOutcome::completed())
    }
}
