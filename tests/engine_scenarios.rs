//! End-to-end engine scenarios driven through in-process mocks of the
//! decision service and the code executor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use nbflow::prelude::*;
use nbflow::types::LastActionResult;
use serde_json::{json, Value};

/// Scripted decision service: planning responses and generating batches are
/// popped in order; an exhausted planning queue reports the target achieved
/// so runs always terminate.
#[derive(Default)]
struct ScriptedApi {
    plans: Mutex<VecDeque<PlanningResponse>>,
    behaviors: Mutex<VecDeque<Vec<Value>>>,
    planning_calls: Mutex<Vec<ApiRequest>>,
    generating_calls: Mutex<Vec<ApiRequest>>,
    call_log: Mutex<Vec<&'static str>>,
}

impl ScriptedApi {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_plan(&self, plan: Value) {
        let parsed: PlanningResponse = serde_json::from_value(plan).expect("valid plan");
        self.plans.lock().unwrap().push_back(parsed);
    }

    fn push_behavior(&self, actions: Vec<Value>) {
        self.behaviors.lock().unwrap().push_back(actions);
    }

    fn planning_calls(&self) -> Vec<ApiRequest> {
        self.planning_calls.lock().unwrap().clone()
    }

    fn generating_calls(&self) -> Vec<ApiRequest> {
        self.generating_calls.lock().unwrap().clone()
    }

    fn call_log(&self) -> Vec<&'static str> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowApi for ScriptedApi {
    async fn planning(&self, request: &ApiRequest) -> Result<PlanningResponse, EngineError> {
        self.call_log.lock().unwrap().push("planning");
        self.planning_calls.lock().unwrap().push(request.clone());
        Ok(self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                serde_json::from_value(json!({"targetAchieved": true})).unwrap()
            }))
    }

    async fn generating(&self, request: &ApiRequest) -> Result<ActionStream, EngineError> {
        self.call_log.lock().unwrap().push("generating");
        self.generating_calls.lock().unwrap().push(request.clone());
        let batch = self.behaviors.lock().unwrap().pop_front().unwrap_or_default();
        let actions: Vec<Result<ActionDescriptor, EngineError>> = batch
            .into_iter()
            .filter_map(ActionDescriptor::from_wire)
            .map(Ok)
            .collect();
        Ok(futures::stream::iter(actions).boxed())
    }
}

/// Scripted kernel: queued results are popped per call; an empty queue
/// answers with a single text output.
#[derive(Default)]
struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<Vec<CellOutput>, String>>>,
    codes: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_outputs(&self, outputs: Vec<CellOutput>) {
        self.results.lock().unwrap().push_back(Ok(outputs));
    }

    fn push_failure(&self, message: &str) {
        self.results.lock().unwrap().push_back(Err(message.to_string()));
    }

    fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn execute(&self, code: &str) -> Result<Vec<CellOutput>, EngineError> {
        self.codes.lock().unwrap().push(code.to_string());
        match self.results.lock().unwrap().pop_front() {
            Some(Ok(outputs)) => Ok(outputs),
            Some(Err(message)) => Err(EngineError::HttpError(message)),
            None => Ok(vec![CellOutput::text("ok\n")]),
        }
    }
}

fn template(value: Value) -> WorkflowTemplate {
    serde_json::from_value(value).expect("valid template")
}

fn single_step_template() -> Value {
    json!({"stages": [{"id": "s1", "steps": [{"id": "t1"}]}]})
}

fn build_engine(
    tmpl: Option<Value>,
    api: &Arc<ScriptedApi>,
    executor: &Arc<ScriptedExecutor>,
) -> WorkflowEngine {
    let mut descriptor = WorkflowDescriptor::new("demo", "solve the problem");
    if let Some(t) = tmpl {
        descriptor = descriptor.with_template(template(t));
    }
    WorkflowEngine::builder()
        .config(EngineConfig::new())
        .descriptor(descriptor)
        .api(api.clone())
        .executor(executor.clone())
        .build()
        .expect("engine builds")
}

fn visited_states(engine: &WorkflowEngine) -> Vec<String> {
    engine.fsm().history().map(|t| t.to.to_string()).collect()
}

#[tokio::test]
async fn target_achieved_short_circuits_the_step() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": true}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        visited_states(&engine),
        vec![
            "STAGE_RUNNING",
            "STEP_RUNNING",
            "STEP_COMPLETED",
            "STAGE_COMPLETED",
            "WORKFLOW_COMPLETED"
        ]
    );
    assert_eq!(api.planning_calls().len(), 1);
    assert!(api.generating_calls().is_empty());
    // Planning-First: the planner is always the first outbound call.
    assert_eq!(api.call_log().first(), Some(&"planning"));
}

#[tokio::test]
async fn behavior_produces_cells_and_effects() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "add", "content": "hi", "shot_type": "dialogue"}),
        json!({"action": "exec", "codecell_id": "lastAddedCellId"}),
    ]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    executor.push_outputs(vec![CellOutput::text("hi\n")]);
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let cells: Vec<&Cell> = engine.cells().cells().collect();
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0].kind, CellKind::Markdown);
    assert_eq!(cells[1].kind, CellKind::Code);
    assert_eq!(cells[1].outputs, vec![CellOutput::text("hi\n")]);
    assert_eq!(engine.context().effects().current, vec!["hi\n"]);
    assert_eq!(api.planning_calls().len(), 2);
    assert_eq!(api.generating_calls().len(), 1);
}

#[tokio::test]
async fn workflow_update_is_two_phase() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![json!({
        "action": "update_workflow",
        "updated_workflow": {"stages": [{"id": "s2", "steps": [{"id": "t2"}]}]}
    })]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::AwaitingWorkflowUpdate);
    assert_eq!(engine.state(), WorkflowState::WorkflowUpdatePending);
    // Not applied in place.
    assert!(engine.pipeline().stage("s1").is_some());
    assert!(engine.pipeline().stage("s2").is_none());
    let trace = visited_states(&engine);
    assert!(trace.ends_with(&["ACTION_RUNNING".into(), "WORKFLOW_UPDATE_PENDING".into()]));

    let outcome = engine.confirm_workflow_update().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(engine.pipeline().stage("s2").is_some());
    let trace = visited_states(&engine);
    assert!(trace.contains(&"ACTION_COMPLETED".to_string()));
    assert!(trace.contains(&"BEHAVIOR_COMPLETED".to_string()));
    // The vanished stage fell back to the new template's first stage/step,
    // which the final planner call observed.
    let last_planning = api.planning_calls().pop().unwrap();
    let loc = &last_planning.observation.location.current;
    assert_eq!(loc.stage_id.as_deref(), Some("s2"));
    assert_eq!(loc.step_id.as_deref(), Some("t2"));
}

#[tokio::test]
async fn rejected_workflow_update_keeps_the_template() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![json!({
        "action": "update_workflow",
        "updated_workflow": {"stages": [{"id": "s2", "steps": [{"id": "t2"}]}]}
    })]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    engine.start().await.unwrap();
    let outcome = engine.reject_workflow_update().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(engine.pipeline().stage("s1").is_some());
    assert!(engine.pipeline().stage("s2").is_none());
}

#[tokio::test]
async fn context_update_applies_variables_and_focus() {
    let api = ScriptedApi::new();
    api.push_plan(json!({
        "targetAchieved": false,
        "context_update": {
            "variables": {"k": 1},
            "progress_update": {"level": "behaviors", "focus": "F"}
        }
    }));
    // Empty behavior, then the planner closes the step.
    api.push_behavior(vec![]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(engine.context().variable("k"), Some(&json!(1)));
    assert_eq!(
        engine.context().focus(nbflow::types::ProgressLevel::Behaviors),
        "F"
    );
    assert!(engine.cells().is_empty());
    assert!(visited_states(&engine).contains(&"BEHAVIOR_COMPLETED".to_string()));
    // The second planner call echoed the focus back.
    let feedback_call = &api.planning_calls()[1];
    assert_eq!(
        feedback_call.observation.location.progress.behaviors.focus,
        "F"
    );
}

#[tokio::test]
async fn step_gate_pauses_and_resume_continues() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "add", "content": "a", "shot_type": "dialogue"}),
        json!({"action": "add", "content": "b", "shot_type": "dialogue"}),
        json!({"action": "add", "content": "c", "shot_type": "dialogue"}),
    ]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);
    engine.set_max_steps(2);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Paused);
    assert!(engine.is_paused());
    assert_eq!(engine.cells().len(), 2);
    assert_eq!(engine.step_counter(), 2);

    let outcome = engine.resume().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let contents: Vec<&str> = engine.cells().cells().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn actions_execute_in_stream_order() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "add", "content": "one"}),
        json!({"action": "exec", "codecell_id": "lastAddedCellId"}),
        json!({"action": "add", "content": "two"}),
        json!({"action": "exec", "codecell_id": "lastAddedCellId"}),
    ]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    engine.start().await.unwrap();
    assert_eq!(executor.codes(), vec!["one", "two"]);
    let contents: Vec<&str> = engine.cells().cells().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two"]);
}

#[tokio::test]
async fn behavior_ids_increase_and_reset_per_step() {
    let api = ScriptedApi::new();
    // Step t1: two behavior iterations.
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![]);
    api.push_plan(json!({"transition": {"continue_behaviors": true}}));
    api.push_behavior(vec![]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    // Step t2: one behavior iteration.
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(
        Some(json!({"stages": [{"id": "s1", "steps": [{"id": "t1"}, {"id": "t2"}]}]})),
        &api,
        &executor,
    );

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let behavior_ids: Vec<Option<String>> = api
        .generating_calls()
        .iter()
        .map(|r| r.observation.location.current.behavior_id.clone())
        .collect();
    assert_eq!(
        behavior_ids,
        vec![
            Some("behavior_001".to_string()),
            Some("behavior_002".to_string()),
            Some("behavior_001".to_string()),
        ]
    );
}

#[tokio::test]
async fn failing_context_update_applies_nothing() {
    let api = ScriptedApi::new();
    api.push_plan(json!({
        "targetAchieved": false,
        "context_update": {
            "variables": {"k": 1},
            "stage_steps_update": {"stage_id": "missing", "steps": []}
        }
    }));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let err = engine.start().await.unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(engine.state(), WorkflowState::Error);
    // Atomicity: the variables half of the delta was not applied either.
    assert!(engine.context().variable("k").is_none());
    assert!(engine.last_error().is_some());
}

#[tokio::test]
async fn unknown_actions_skip_and_feedback_reports_them() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "teleport", "to": "mars"}),
        json!({"action": "add", "content": "hello", "shot_type": "dialogue"}),
    ]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(engine.cells().len(), 1);

    let feedback = api.planning_calls()[1]
        .behavior_feedback
        .clone()
        .expect("feedback present after a behavior");
    assert_eq!(feedback.behavior_id.as_deref(), Some("behavior_001"));
    assert_eq!(feedback.actions_executed, 2);
    assert_eq!(feedback.actions_succeeded, 1);
    assert_eq!(feedback.last_action_result, LastActionResult::Success);
}

#[tokio::test]
async fn kernel_failures_are_captured_not_fatal() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "add", "content": "x = 1"}),
        json!({"action": "exec", "codecell_id": "lastAddedCellId"}),
    ]);
    api.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor = ScriptedExecutor::new();
    executor.push_failure("kernel down");
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    // The failure landed on the code cell and in the effect log.
    let cell = engine.cells().last_cell().unwrap();
    assert_eq!(cell.kind, CellKind::Code);
    assert_eq!(cell.outputs.len(), 1);
    assert!(cell.outputs[0].content.contains("kernel down"));
    assert!(engine
        .context()
        .effects()
        .current
        .iter()
        .any(|e| e.contains("exec failed")));

    let feedback = api.planning_calls()[1].behavior_feedback.clone().unwrap();
    assert_eq!(feedback.last_action_result, LastActionResult::Error);
    assert_eq!(feedback.actions_succeeded, 1);
}

#[tokio::test]
async fn malformed_action_fails_the_run() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    // `add` without its required content field.
    api.push_behavior(vec![json!({"action": "add"})]);
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let err = engine.start().await.unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(engine.state(), WorkflowState::Error);
}

#[tokio::test]
async fn empty_template_bootstraps_from_the_planner() {
    let api = ScriptedApi::new();
    api.push_plan(json!({
        "targetAchieved": false,
        "context_update": {
            "workflow_update": {"stages": [{"id": "s1", "steps": [{"id": "t1"}]}]}
        }
    }));
    api.push_plan(json!({"targetAchieved": true}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(None, &api, &executor);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(api.planning_calls().len(), 2);
    assert!(api.generating_calls().is_empty());
    assert!(engine.pipeline().stage("s1").is_some());
}

#[tokio::test]
async fn invalid_events_are_ignored() {
    let api = ScriptedApi::new();
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    let outcome = engine.inject_event(WorkflowEvent::CompleteStep).await.unwrap();
    assert_eq!(outcome, RunOutcome::Idle);
    assert_eq!(engine.state(), WorkflowState::Idle);
    assert_eq!(engine.fsm().history().count(), 0);
}

#[tokio::test]
async fn cancel_is_terminal_until_reset() {
    let api = ScriptedApi::new();
    api.push_plan(json!({"targetAchieved": false}));
    api.push_behavior(vec![
        json!({"action": "add", "content": "a", "shot_type": "dialogue"}),
        json!({"action": "add", "content": "b", "shot_type": "dialogue"}),
    ]);
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);
    engine.set_max_steps(1);

    assert_eq!(engine.start().await.unwrap(), RunOutcome::Paused);
    engine.cancel();
    assert_eq!(engine.state(), WorkflowState::Cancelled);

    engine.reset();
    assert_eq!(engine.state(), WorkflowState::Idle);
    // The notebook transcript survives a reset.
    assert_eq!(engine.cells().len(), 1);
}

#[tokio::test]
async fn snapshot_round_trips_through_json() {
    let api = ScriptedApi::new();
    api.push_plan(json!({
        "targetAchieved": false,
        "context_update": {"variables": {"seed": 42}}
    }));
    api.push_behavior(vec![
        json!({"action": "update_title", "title": "Churn Report"}),
        json!({"action": "add", "content": "a", "shot_type": "dialogue"}),
        json!({"action": "add", "content": "b", "shot_type": "dialogue"}),
    ]);
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);
    engine.set_max_steps(2);

    assert_eq!(engine.start().await.unwrap(), RunOutcome::Paused);
    let blob = serde_json::to_string(&engine.snapshot()).unwrap();

    // Rehydrate into a fresh engine wired to fresh mocks. The interrupted
    // behavior replays from its start.
    let api2 = ScriptedApi::new();
    api2.push_behavior(vec![
        json!({"action": "update_title", "title": "Churn Report"}),
        json!({"action": "add", "content": "a", "shot_type": "dialogue"}),
        json!({"action": "add", "content": "b", "shot_type": "dialogue"}),
    ]);
    api2.push_plan(json!({"transition": {"continue_behaviors": false, "target_achieved": true}}));
    let executor2 = ScriptedExecutor::new();
    let mut restored = build_engine(Some(single_step_template()), &api2, &executor2);
    restored
        .restore(serde_json::from_str(&blob).unwrap())
        .unwrap();

    assert_eq!(restored.cells().title(), "Churn Report");
    assert_eq!(restored.cells().len(), 1);
    assert_eq!(restored.context().variable("seed"), Some(&json!(42)));

    let outcome = restored.resume().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    // One cell from the snapshot plus the replayed behavior's two.
    assert_eq!(restored.cells().len(), 3);
    assert_eq!(
        api2.generating_calls()[0]
            .observation
            .location
            .current
            .behavior_id
            .as_deref(),
        Some("behavior_001")
    );
}

#[tokio::test]
async fn restart_after_error_resets_and_runs() {
    let api = ScriptedApi::new();
    api.push_plan(json!({
        "targetAchieved": false,
        "context_update": {"stage_steps_update": {"stage_id": "missing", "steps": []}}
    }));
    // The retry run succeeds immediately.
    api.push_plan(json!({"targetAchieved": true}));
    let executor = ScriptedExecutor::new();
    let mut engine = build_engine(Some(single_step_template()), &api, &executor);

    assert!(engine.start().await.is_err());
    assert_eq!(engine.state(), WorkflowState::Error);

    let outcome = engine.start().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
}
