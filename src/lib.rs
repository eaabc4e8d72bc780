//! # Nbflow - A Protocol-Driven Notebook Workflow Engine
//!
//! Nbflow is a client-side execution engine for AI-assisted,
//! notebook-producing pipelines. It mediates between two remote decision
//! services - a **Planner** (goal verdicts, context deltas) and a
//! **Generator** (streamed action production) - and a remote **code
//! executor** (Jupyter-kernel HTTP endpoint), progressively building a
//! notebook of markdown, code and thinking cells.
//!
#![deny(unsafe_code)]
//!
//! ## Architecture
//!
//! - **Hierarchical FSM**: workflow → stage → step → behavior → action,
//!   with per-state entry effects and a server-controlled behavior loop.
//! - **Planning-First**: the Planner is consulted on every step entry
//!   before any action is generated.
//! - **Atomic streaming ingestion**: Generator actions arrive as NDJSON and
//!   are buffered in full before execution, so ordering and stats stay
//!   unambiguous.
//! - **Dirty tracking**: each outbound observation marks exactly the cells
//!   that changed since the previous one.
//! - **Control surface**: pause/resume, a max-step gate, cancellation, and
//!   snapshot persistence at transition boundaries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nbflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::new()
//!         .with_api_base_url("http://localhost:8000/api")
//!         .with_kernel_base_url("http://localhost:8888")
//!         .with_notebook_id("demo-notebook");
//!
//!     let descriptor = WorkflowDescriptor::new("churn-analysis", "Predict customer churn")
//!         .with_problem_description("Monthly churn has doubled; find out why.");
//!
//!     let mut engine = WorkflowEngine::builder()
//!         .config(config)
//!         .descriptor(descriptor)
//!         .build()?;
//!
//!     match engine.start().await? {
//!         RunOutcome::Completed => println!("notebook finished"),
//!         outcome => println!("engine parked: {outcome:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The remote seams ([`client::WorkflowApi`], [`client::CodeExecutor`]) are
//! plain async traits; tests and embedders inject in-process
//! implementations through the engine builder.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod retry;
pub mod store;
pub mod types;

/// The types most consumers need.
pub mod prelude {
    pub use crate::client::{ActionStream, CodeExecutor, KernelClient, WorkflowApi, WorkflowApiClient};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        EngineSnapshot, RunOutcome, WorkflowEngine, WorkflowEvent, WorkflowState,
    };
    pub use crate::error::EngineError;
    pub use crate::store::{ActionHandler, ActionOutcome, ActionRegistry, ScriptContext};
    pub use crate::types::{
        ActionDescriptor, ApiRequest, Cell, CellKind, CellOutput, ContextUpdate, PlanningResponse,
        WorkflowDescriptor, WorkflowStage, WorkflowStep, WorkflowTemplate,
    };
}
