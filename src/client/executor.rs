//! Code executor client
//!
//! Thin HTTP client for the remote Jupyter-kernel endpoint. Execution
//! failures reported by the kernel are captured as error outputs rather
//! than raised, so the effect log reflects them and the workflow keeps
//! moving; only transport-level problems surface as errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::cell::CellOutput;

/// Delay before the single empty-output retry.
const EMPTY_OUTPUT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Remote code execution seam.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run a code body and return its captured outputs.
    async fn execute(&self, code: &str) -> Result<Vec<CellOutput>, EngineError>;
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notebook_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    status: String,
    #[serde(default)]
    outputs: Vec<CellOutput>,
}

/// HTTP client for the kernel `/execute` endpoint.
#[derive(Debug, Clone)]
pub struct KernelClient {
    http: reqwest::Client,
    base_url: String,
    notebook_id: Option<String>,
    timeout: Duration,
}

impl KernelClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.kernel_base_url.trim_end_matches('/').to_string(),
            notebook_id: config.notebook_id.clone(),
            timeout: config.request_timeout,
        }
    }

    /// Override the shared HTTP client (connection pooling across clients).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute_once(&self, code: &str) -> Result<ExecuteResponse, EngineError> {
        let body = ExecuteRequest {
            code,
            notebook_id: self.notebook_id.as_deref(),
        };
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::api_error(status.as_u16(), text));
        }
        let parsed = response.json::<ExecuteResponse>().await?;
        Ok(parsed)
    }
}

#[async_trait]
impl CodeExecutor for KernelClient {
    async fn execute(&self, code: &str) -> Result<Vec<CellOutput>, EngineError> {
        let mut resp = self.execute_once(code).await?;

        // Freshly started kernels occasionally report ok with no outputs on
        // the very first execute. One delayed retry papers over the race.
        if resp.status == "ok" && resp.outputs.is_empty() {
            tracing::debug!("kernel returned ok with no outputs, retrying once");
            tokio::time::sleep(EMPTY_OUTPUT_RETRY_DELAY).await;
            resp = self.execute_once(code).await?;
        }

        if resp.status != "ok" {
            tracing::warn!(status = %resp.status, "kernel reported execution failure");
            let mut outputs = vec![CellOutput::error(format!(
                "execution failed with status `{}`",
                resp.status
            ))];
            outputs.extend(resp.outputs);
            return Ok(outputs);
        }

        Ok(resp.outputs)
    }
}
