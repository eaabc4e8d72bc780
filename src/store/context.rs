//! Context store
//!
//! Variables, effect history, todo list, custom context, and the
//! Planner-authored progress focus / outputs tracking per hierarchy level.
//! Focus strings are opaque to the engine: stored verbatim, echoed in the
//! next observation.

use serde_json::{Map, Value};

use crate::types::protocol::{EffectsPayload, OutputsTriple, ProgressLevel};

/// Reserved variable name that always refers to the most recently added cell.
pub const LAST_ADDED_CELL_ID: &str = "lastAddedCellId";

/// Focus text per hierarchy level.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgressFocus {
    pub stages: String,
    pub steps: String,
    pub behaviors: String,
}

/// Outputs tracking triples per hierarchy level.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgressOutputs {
    pub stages: OutputsTriple,
    pub steps: OutputsTriple,
    pub behaviors: OutputsTriple,
}

/// Mutable engine context shared across API turns.
#[derive(Debug, Default)]
pub struct ContextStore {
    variables: Map<String, Value>,
    effects: EffectsPayload,
    todo_list: Vec<String>,
    custom_context: Map<String, Value>,
    focus: ProgressFocus,
    outputs: ProgressOutputs,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- variables ---

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn set_variables(&mut self, vars: Map<String, Value>) {
        for (k, v) in vars {
            self.variables.insert(k, v);
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// The id of the most recently added cell, if any.
    pub fn last_added_cell_id(&self) -> Option<&str> {
        self.variables.get(LAST_ADDED_CELL_ID).and_then(Value::as_str)
    }

    // --- effects ---

    /// Append an effect string produced since the last Planner turn.
    pub fn push_effect(&mut self, effect: impl Into<String>) {
        self.effects.current.push(effect.into());
    }

    /// Move all current effects into history.
    pub fn compact_effects(&mut self) {
        let drained = std::mem::take(&mut self.effects.current);
        self.effects.history.extend(drained);
    }

    /// Atomic replacement per Planner `effects_update` directive.
    pub fn replace_effects(&mut self, current: Option<Vec<String>>, history: Option<Vec<String>>) {
        if let Some(current) = current {
            self.effects.current = current;
        }
        if let Some(history) = history {
            self.effects.history = history;
        }
    }

    pub fn effects(&self) -> &EffectsPayload {
        &self.effects
    }

    // --- todo / custom ---

    pub fn set_todo_list(&mut self, items: Vec<String>) {
        self.todo_list = items;
    }

    pub fn todo_list(&self) -> &[String] {
        &self.todo_list
    }

    pub fn set_custom_context(&mut self, ctx: Map<String, Value>) {
        self.custom_context = ctx;
    }

    pub fn custom_context(&self) -> &Map<String, Value> {
        &self.custom_context
    }

    // --- progress focus / outputs ---

    pub fn set_focus(&mut self, level: ProgressLevel, text: impl Into<String>) {
        let slot = match level {
            ProgressLevel::Stages => &mut self.focus.stages,
            ProgressLevel::Steps => &mut self.focus.steps,
            ProgressLevel::Behaviors => &mut self.focus.behaviors,
        };
        *slot = text.into();
    }

    pub fn focus(&self, level: ProgressLevel) -> &str {
        match level {
            ProgressLevel::Stages => &self.focus.stages,
            ProgressLevel::Steps => &self.focus.steps,
            ProgressLevel::Behaviors => &self.focus.behaviors,
        }
    }

    pub fn progress_focus(&self) -> &ProgressFocus {
        &self.focus
    }

    /// Replace the outputs triple at a level (replace semantics, not merge).
    pub fn set_outputs(&mut self, level: ProgressLevel, outputs: OutputsTriple) {
        let slot = match level {
            ProgressLevel::Stages => &mut self.outputs.stages,
            ProgressLevel::Steps => &mut self.outputs.steps,
            ProgressLevel::Behaviors => &mut self.outputs.behaviors,
        };
        *slot = outputs;
    }

    pub fn outputs(&self, level: ProgressLevel) -> &OutputsTriple {
        match level {
            ProgressLevel::Stages => &self.outputs.stages,
            ProgressLevel::Steps => &self.outputs.steps,
            ProgressLevel::Behaviors => &self.outputs.behaviors,
        }
    }

    pub(crate) fn load(
        &mut self,
        variables: Map<String, Value>,
        effects: EffectsPayload,
        focus: ProgressFocus,
        outputs: ProgressOutputs,
    ) {
        self.variables = variables;
        self.effects = effects;
        self.focus = focus;
        self.outputs = outputs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variables_round_trip() {
        let mut ctx = ContextStore::new();
        ctx.set_variable("k", json!(1));
        assert_eq!(ctx.variable("k"), Some(&json!(1)));
        let mut many = Map::new();
        many.insert("a".into(), json!("x"));
        many.insert("k".into(), json!(2));
        ctx.set_variables(many);
        assert_eq!(ctx.variable("k"), Some(&json!(2)));
        assert_eq!(ctx.remove_variable("a"), Some(json!("x")));
        assert!(ctx.variable("a").is_none());
    }

    #[test]
    fn effect_compaction_preserves_order() {
        let mut ctx = ContextStore::new();
        ctx.push_effect("one");
        ctx.push_effect("two");
        ctx.compact_effects();
        ctx.push_effect("three");
        assert_eq!(ctx.effects().history, vec!["one", "two"]);
        assert_eq!(ctx.effects().current, vec!["three"]);
    }

    #[test]
    fn replace_effects_is_per_list() {
        let mut ctx = ContextStore::new();
        ctx.push_effect("stale");
        ctx.replace_effects(Some(vec!["fresh".into()]), None);
        assert_eq!(ctx.effects().current, vec!["fresh"]);
        assert!(ctx.effects().history.is_empty());
        ctx.replace_effects(None, Some(vec!["old".into()]));
        assert_eq!(ctx.effects().current, vec!["fresh"]);
        assert_eq!(ctx.effects().history, vec!["old"]);
    }

    #[test]
    fn focus_and_outputs_per_level() {
        let mut ctx = ContextStore::new();
        ctx.set_focus(ProgressLevel::Behaviors, "F");
        assert_eq!(ctx.focus(ProgressLevel::Behaviors), "F");
        assert_eq!(ctx.focus(ProgressLevel::Stages), "");

        let triple = OutputsTriple {
            expected: vec!["df".into()],
            produced: vec![],
            in_progress: vec!["model".into()],
        };
        ctx.set_outputs(ProgressLevel::Steps, triple.clone());
        assert_eq!(ctx.outputs(ProgressLevel::Steps), &triple);
        // Replace, not merge.
        ctx.set_outputs(ProgressLevel::Steps, OutputsTriple::default());
        assert!(ctx.outputs(ProgressLevel::Steps).expected.is_empty());
    }
}
