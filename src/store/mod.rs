//! Stateful engine components: cells, context, pipeline template, and the
//! action dispatch table. All mutation goes through these stores' public
//! operations; the single-threaded engine serializes access implicitly.

pub mod cells;
pub mod context;
pub mod pipeline;
pub mod script;

pub use cells::CellStore;
pub use context::{ContextStore, ProgressFocus, ProgressOutputs, LAST_ADDED_CELL_ID};
pub use pipeline::PipelineStore;
pub use script::{
    ActionHandler, ActionOutcome, ActionRegistry, ScriptContext, ScriptStore, SectionCounters,
};
