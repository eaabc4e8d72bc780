//! Engine Configuration
//!
//! Plain configuration struct consumed by the HTTP clients and the engine
//! builder. Loading (env files, CLI flags) is the caller's concern; this is
//! the narrow interface such a loader populates.

use std::time::Duration;

/// Default per-request timeout for Planner / Generator / kernel calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for a [`crate::engine::WorkflowEngine`] and its clients.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the workflow decision service (`/planning`, `/generating`).
    pub api_base_url: String,
    /// Base URL of the code-execution kernel endpoint (`/execute`).
    pub kernel_base_url: String,
    /// Kernel notebook / session identifier, when the kernel is stateful.
    pub notebook_id: Option<String>,
    /// Optional bearer token sent to the decision service.
    pub api_key: Option<String>,
    /// Per-request timeout applied to every outbound HTTP call.
    pub request_timeout: Duration,
    /// Action step gate: the engine pauses once this many actions have run.
    /// Zero disables the gate.
    pub max_steps: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            kernel_base_url: "http://localhost:8888".to_string(),
            notebook_id: None,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_steps: 0,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the decision-service base URL.
    pub fn with_api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the kernel base URL.
    pub fn with_kernel_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.kernel_base_url = url.into();
        self
    }

    /// Set the kernel notebook / session identifier.
    pub fn with_notebook_id<S: Into<String>>(mut self, id: S) -> Self {
        self.notebook_id = Some(id.into());
        self
    }

    /// Set the bearer token for the decision service.
    pub fn with_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the per-request timeout.
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the action step gate. Zero disables it.
    pub const fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }
}
