//! Action descriptors
//!
//! The Generator emits typed action descriptors over NDJSON. Descriptors are
//! kept semi-structured (`kind` + raw body) so the action registry can stay
//! pluggable; builtin handlers decode their own typed payloads from the body
//! and treat missing required fields as contract violations.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ActionFailureKind, EngineError};
use crate::types::template::{WorkflowStep, WorkflowTemplate};

/// A single Generator-produced action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action-type string, e.g. `add`, `exec`, `update_workflow`.
    pub kind: String,
    /// Raw descriptor body as received on the wire.
    pub body: Value,
}

impl ActionDescriptor {
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }

    /// Unwrap a wire value into a descriptor.
    ///
    /// Accepts both the enveloped form `{"action": {…}}` and a bare
    /// descriptor object. The type tag is the body's `"action"` field, with
    /// `"type"` as a fallback. Returns `None` when no tag can be found.
    pub fn from_wire(value: Value) -> Option<Self> {
        let body = match value {
            Value::Object(mut map) => match map.remove("action") {
                Some(Value::Object(inner)) => Value::Object(inner),
                Some(Value::String(tag)) => {
                    // Flat form: the tag sits next to the fields.
                    let mut inner = map;
                    inner.insert("action".to_string(), Value::String(tag));
                    Value::Object(inner)
                }
                Some(other) => {
                    // Envelope key present but not an object; keep the rest.
                    let mut inner = map;
                    inner.insert("action".to_string(), other);
                    Value::Object(inner)
                }
                None => Value::Object(map),
            },
            other => other,
        };

        let kind = body
            .get("action")
            .and_then(Value::as_str)
            .or_else(|| body.get("type").and_then(Value::as_str))?
            .to_string();

        Some(Self { kind, body })
    }

    /// Decode the body into a typed payload.
    ///
    /// Shape mismatches surface as `ActionFailure(MissingField)`, which the
    /// engine treats as a contract violation.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            EngineError::action_failure(
                ActionFailureKind::MissingField,
                format!("action `{}`: {}", self.kind, e),
            )
        })
    }
}

/// Payload of `add`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddAction {
    pub content: String,
    #[serde(default)]
    pub shot_type: Option<String>,
}

impl AddAction {
    /// Dialogue and observation shots render as markdown; everything else
    /// is code.
    pub fn is_markdown(&self) -> bool {
        matches!(self.shot_type.as_deref(), Some("dialogue" | "observation"))
    }
}

/// Payload of `exec`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecAction {
    pub codecell_id: String,
    #[serde(default)]
    pub need_output: Option<bool>,
}

/// Payload of `is_thinking`.
#[derive(Debug, Clone, Deserialize)]
pub struct IsThinkingAction {
    #[serde(default)]
    pub thinking_text: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

/// Payload of `new_chapter` and `new_section`.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionAction {
    pub content: String,
}

/// Payload of `update_title`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTitleAction {
    pub title: String,
}

/// Payload of `update_workflow`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWorkflowAction {
    pub updated_workflow: WorkflowTemplate,
}

/// Payload of `update_stage_steps`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStageStepsAction {
    pub stage_id: String,
    pub updated_steps: Vec<WorkflowStep>,
}

/// Payload of `end_phase` (reserved).
#[derive(Debug, Clone, Deserialize)]
pub struct EndPhaseAction {
    #[serde(default)]
    pub step_id: Option<String>,
}

/// Payload of `next_event` (reserved).
#[derive(Debug, Clone, Deserialize)]
pub struct NextEventAction {
    #[serde(default)]
    pub event_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_enveloped_descriptor() {
        let line = json!({"action": {"action": "add", "content": "hi", "shot_type": "dialogue"}});
        let action = ActionDescriptor::from_wire(line).unwrap();
        assert_eq!(action.kind, "add");
        let add: AddAction = action.decode().unwrap();
        assert_eq!(add.content, "hi");
        assert!(add.is_markdown());
    }

    #[test]
    fn accepts_flat_descriptor() {
        let line = json!({"action": "exec", "codecell_id": "lastAddedCellId"});
        let action = ActionDescriptor::from_wire(line).unwrap();
        assert_eq!(action.kind, "exec");
        let exec: ExecAction = action.decode().unwrap();
        assert_eq!(exec.codecell_id, "lastAddedCellId");
    }

    #[test]
    fn rejects_untagged_objects() {
        assert!(ActionDescriptor::from_wire(json!({"content": "hi"})).is_none());
        assert!(ActionDescriptor::from_wire(json!(42)).is_none());
    }

    #[test]
    fn missing_required_field_is_a_contract_error() {
        let action = ActionDescriptor::from_wire(json!({"action": "add"})).unwrap();
        let err = action.decode::<AddAction>().unwrap_err();
        assert!(err.is_contract_violation());
    }
}
