//! Error Handling
//!
//! A single crate-wide error type with semantic buckets for transport,
//! protocol-contract, action and configuration failures. Retryability is a
//! property of the error, consumed by [`crate::retry::RetryPolicy`].

use thiserror::Error;

/// Classification of an action failure raised by a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFailureKind {
    /// A required field was absent or had the wrong shape.
    MissingField,
    /// The action referenced a cell that does not exist.
    UnknownCell,
    /// The kernel reported a failure while running the cell.
    ExecutionFailed,
    /// The handler failed for a reason of its own.
    HandlerFailed,
}

impl std::fmt::Display for ActionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingField => "missing_field",
            Self::UnknownCell => "unknown_cell",
            Self::ExecutionFailed => "execution_failed",
            Self::HandlerFailed => "handler_failed",
        };
        f.write_str(s)
    }
}

/// Unified error type for the workflow engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Transport-level HTTP failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Non-success status returned by a remote service.
    #[error("API error {code}: {message}")]
    ApiError { code: u16, message: String },

    /// The request did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    TimeoutError(String),

    /// A response body could not be decoded.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A streaming body failed mid-flight.
    #[error("stream error: {0}")]
    StreamError(String),

    /// The remote service violated the protocol contract
    /// (missing required payload sections, impossible shapes).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A dispatched action failed inside its handler.
    #[error("action failed ({kind}): {message}")]
    ActionFailure {
        kind: ActionFailureKind,
        message: String,
    },

    /// Engine misconfiguration detected before any remote call.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The engine was asked to do something its current state forbids.
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    /// Catch-all for violated internal invariants.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Construct an [`EngineError::ApiError`] from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
        }
    }

    /// Construct an [`EngineError::ActionFailure`].
    pub fn action_failure(kind: ActionFailureKind, message: impl Into<String>) -> Self {
        Self::ActionFailure {
            kind,
            message: message.into(),
        }
    }

    /// Whether a retry of the same request may reasonably succeed.
    ///
    /// Server-side (5xx) and transport failures are retryable; everything
    /// the client did wrong (4xx, contract violations) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::TimeoutError(_) | Self::StreamError(_) => true,
            Self::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }

    /// Whether this error is a protocol-contract violation: treated as a
    /// bug rather than a transient condition, so the engine fails fast
    /// instead of capturing it as an action error output.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ProtocolError(_)
                | Self::ParseError(_)
                | Self::ActionFailure {
                    kind: ActionFailureKind::MissingField,
                    ..
                }
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimeoutError(err.to_string())
        } else if let Some(status) = err.status() {
            Self::ApiError {
                code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_error_class() {
        assert!(EngineError::HttpError("connection refused".into()).is_retryable());
        assert!(EngineError::api_error(503, "unavailable").is_retryable());
        assert!(EngineError::api_error(429, "slow down").is_retryable());
        assert!(!EngineError::api_error(404, "not found").is_retryable());
        assert!(!EngineError::ProtocolError("missing progress".into()).is_retryable());
    }

    #[test]
    fn contract_violations_are_flagged() {
        assert!(EngineError::ProtocolError("bad".into()).is_contract_violation());
        assert!(
            EngineError::action_failure(ActionFailureKind::MissingField, "content")
                .is_contract_violation()
        );
        assert!(
            !EngineError::action_failure(ActionFailureKind::ExecutionFailed, "boom")
                .is_contract_violation()
        );
    }
}
