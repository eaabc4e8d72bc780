//! Workflow decision-service client
//!
//! Two calls against the same service: `/planning` (goal verdicts + context
//! deltas) and `/generating` (action production). Generating is streamed as
//! NDJSON with a single-object JSON fallback. Planning is idempotent and
//! retried once on transient failures; generating is never retried because
//! replaying it would duplicate actions.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;

use crate::client::ndjson::{decode_action_line, NdjsonDecoder};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::types::action::ActionDescriptor;
use crate::types::protocol::{ActionBatch, ApiRequest, PlanningResponse};

/// Lazy, finite sequence of Generator actions.
pub type ActionStream = BoxStream<'static, Result<ActionDescriptor, EngineError>>;

/// Remote decision-service seam. The engine only ever talks through this
/// trait, so tests drive it with in-process implementations.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Ask the Planner for a goal verdict and context delta.
    async fn planning(&self, request: &ApiRequest) -> Result<PlanningResponse, EngineError>;

    /// Ask the Generator for this behavior's actions.
    async fn generating(&self, request: &ApiRequest) -> Result<ActionStream, EngineError>;
}

/// HTTP implementation of [`WorkflowApi`].
#[derive(Debug, Clone)]
pub struct WorkflowApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: std::time::Duration,
    planning_retry: RetryPolicy,
}

impl WorkflowApiClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            planning_retry: RetryPolicy::default(),
        }
    }

    /// Override the shared HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Override the planning retry policy.
    pub fn with_planning_retry(mut self, policy: RetryPolicy) -> Self {
        self.planning_retry = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, path: &str, body: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, path: &str, body: &ApiRequest) -> Result<reqwest::Response, EngineError> {
        let response = self.request(path, body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::api_error(status.as_u16(), text));
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkflowApi for WorkflowApiClient {
    async fn planning(&self, request: &ApiRequest) -> Result<PlanningResponse, EngineError> {
        self.planning_retry
            .run(|attempt| async move {
                tracing::debug!(attempt, "calling planner");
                let response = self.send("/planning", request).await?;
                let parsed = response.json::<PlanningResponse>().await?;
                Ok(parsed)
            })
            .await
    }

    async fn generating(&self, request: &ApiRequest) -> Result<ActionStream, EngineError> {
        let response = self.send("/generating", request).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        // Single-object fallback for servers that do not stream.
        if content_type.contains("application/json") && !content_type.contains("ndjson") {
            let batch = response.json::<ActionBatch>().await?;
            let actions: Vec<Result<ActionDescriptor, EngineError>> = batch
                .actions
                .into_iter()
                .filter_map(|value| match ActionDescriptor::from_wire(value) {
                    Some(action) => Some(Ok(action)),
                    None => {
                        tracing::warn!("skipping untagged action in batch response");
                        None
                    }
                })
                .collect();
            return Ok(futures::stream::iter(actions).boxed());
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = NdjsonDecoder::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for line in decoder.push(&chunk) {
                            if let Some(action) = decode_action_line(&line) {
                                yield Ok(action);
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(EngineError::StreamError(e.to_string()));
                        return;
                    }
                }
            }
            if let Some(tail) = decoder.finish() {
                if let Some(action) = decode_action_line(&tail) {
                    yield Ok(action);
                }
            }
        };
        Ok(stream.boxed())
    }
}
