//! The tool execution coordinator.
//!
//! Walks one tool call through `Requested → Executing → Succeeded | Failed`:
//! decodes and validates arguments, invokes the handler exactly once under a
//! timeout, and turns the outcome into a chained follow-up turn carrying the
//! result (or the failure reason) back to the model. There is no automatic
//! retry — a failing tool is reported to the model, and retrying is the
//! model's decision.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use voxloop_core::error::{Error, ToolError};
use voxloop_core::event::{EngineEvent, EventBus};
use voxloop_core::tool::{ToolCall, ToolCatalog};

use crate::turn::TurnContext;

/// States of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Requested,
    Executing,
    Succeeded,
    Failed,
}

/// What happened to one tool call, for observers and the pipeline.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub call_id: String,
    pub tool_name: String,
    pub state: CallState,
    /// The content attached to the chained turn: the handler's return value
    /// on success, `"fail, reason: …"` on failure.
    pub return_value: String,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.state == CallState::Succeeded
    }
}

/// Coordinates tool execution and produces the chained follow-up turn.
pub struct ToolCoordinator {
    tool_timeout: Duration,
    events: Arc<EventBus>,
}

impl ToolCoordinator {
    pub fn new(tool_timeout: Duration, events: Arc<EventBus>) -> Self {
        Self {
            tool_timeout,
            events,
        }
    }

    /// Execute the turn's pending tool call and chain a follow-up turn
    /// onto it.
    ///
    /// Observers are notified at Requested, at Succeeded/Failed, and always
    /// at Finished. The chained turn carries the tool result as synthetic
    /// input plus the tool's success or fail prompt, and hides the tool
    /// from the next turn's exposure.
    pub async fn execute(
        &self,
        catalog: &ToolCatalog,
        turn: &mut TurnContext,
    ) -> Result<ExecutionReport, Error> {
        let Some(call) = turn.pending_tool_call.clone() else {
            return Err(Error::Internal(
                "execute called on a turn with no pending tool call".to_string(),
            ));
        };
        self.events.publish(EngineEvent::ToolRequested {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            timestamp: Utc::now(),
        });

        let start = Instant::now();
        let outcome = self.run(catalog, &call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match outcome {
            Ok(value) => {
                info!(tool = %call.name, duration_ms, "tool call succeeded");
                self.events.publish(EngineEvent::ToolSucceeded {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                ExecutionReport {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    state: CallState::Succeeded,
                    return_value: value,
                    duration_ms,
                }
            }
            Err(err) => {
                let reason = failure_reason(&err);
                warn!(tool = %call.name, %reason, "tool call failed");
                self.events.publish(EngineEvent::ToolFailed {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    reason: reason.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                ExecutionReport {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    state: CallState::Failed,
                    return_value: format!("fail, reason: {reason}"),
                    duration_ms,
                }
            }
        };

        // Chain the follow-up turn that threads the result back to the model.
        let prompt = catalog.lookup(&call.name).map(|entry| {
            if report.success() {
                entry.descriptor.success_prompt.clone()
            } else {
                entry.descriptor.fail_prompt.clone()
            }
        });
        let chained = turn.chain(prompt.as_deref().filter(|p| !p.is_empty()));
        chained.attach_tool_result(&call.id, &call.name, &report.return_value);

        self.events.publish(EngineEvent::ToolFinished {
            call_id: report.call_id.clone(),
            tool_name: report.tool_name.clone(),
            success: report.success(),
            return_value: report.return_value.clone(),
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Requested → Executing → outcome. The handler runs exactly once.
    async fn run(&self, catalog: &ToolCatalog, call: &ToolCall) -> Result<String, ToolError> {
        let entry = catalog
            .lookup(&call.name)
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: "tool not found".into(),
            })?;

        let arguments: serde_json::Value =
            serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidArguments {
                tool_name: call.name.clone(),
                reason: format!("arguments are not valid JSON: {e}"),
            })?;

        validate_arguments(&call.name, &entry.descriptor.parameter_schema, &arguments)?;

        debug!(tool = %call.name, "executing tool");
        match tokio::time::timeout(self.tool_timeout, entry.handler.invoke(arguments)).await {
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.tool_timeout.as_secs(),
            }),
            Ok(Err(err)) => Err(err),
            // A missing return value is still a success.
            Ok(Ok(value)) => Ok(value.unwrap_or_else(|| "success".into())),
        }
    }
}

/// The reason string reported to the model. Handler errors keep their bare
/// message; validation and timeout failures describe themselves.
fn failure_reason(err: &ToolError) -> String {
    match err {
        ToolError::ExecutionFailed { reason, .. } => reason.clone(),
        ToolError::InvalidArguments { reason, .. } => reason.clone(),
        ToolError::Timeout { timeout_secs, .. } => {
            format!("timed out after {timeout_secs}s")
        }
    }
}

/// Check decoded arguments against the descriptor's parameter schema.
///
/// Covers the parts of JSON Schema the function-calling convention uses:
/// top-level object shape, `required` membership, and primitive `type` tags
/// on properties. Deeper structure is the handler's to validate.
fn validate_arguments(
    tool_name: &str,
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool_name: tool_name.to_string(),
        reason,
    };

    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if schema_obj.get("type").and_then(|t| t.as_str()) == Some("object") && !arguments.is_object() {
        return Err(invalid("arguments must be a JSON object".into()));
    }

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if arguments.get(field).is_none() {
                return Err(invalid(format!("missing required field '{field}'")));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        for (name, property) in properties {
            let Some(value) = arguments.get(name) else {
                continue;
            };
            if let Some(expected) = property.get("type").and_then(|t| t.as_str())
                && !type_matches(expected, value)
            {
                return Err(invalid(format!(
                    "field '{name}' must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voxloop_core::tool::{SkillHandler, ToolDescriptor};

    struct CountingSkill {
        invocations: Arc<AtomicUsize>,
        result: Result<Option<String>, String>,
    }

    #[async_trait]
    impl SkillHandler for CountingSkill {
        async fn invoke(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<Option<String>, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(value) => Ok(value.clone()),
                Err(reason) => Err(ToolError::ExecutionFailed {
                    tool_name: "city_weather".into(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    struct SlowSkill;

    #[async_trait]
    impl SkillHandler for SlowSkill {
        async fn invoke(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<Option<String>, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn weather_descriptor() -> ToolDescriptor {
        ToolDescriptor::builder("city_weather")
            .description("Current weather for a city")
            .parameter_schema(serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }))
            .success_prompt("Summarize the weather for the user.")
            .fail_prompt("Explain that the weather lookup failed.")
            .build()
    }

    fn setup(
        result: Result<Option<String>, String>,
    ) -> (ToolCatalog, Arc<AtomicUsize>, ToolCoordinator) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut catalog = ToolCatalog::new();
        catalog
            .register(
                weather_descriptor(),
                Arc::new(CountingSkill {
                    invocations: Arc::clone(&invocations),
                    result,
                }),
            )
            .unwrap();
        let coordinator =
            ToolCoordinator::new(Duration::from_secs(5), Arc::new(EventBus::default()));
        (catalog, invocations, coordinator)
    }

    fn call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "city_weather".into(),
            arguments: arguments.into(),
        }
    }

    async fn run_call(
        coordinator: &ToolCoordinator,
        catalog: &ToolCatalog,
        turn: &mut TurnContext,
        arguments: &str,
    ) -> ExecutionReport {
        turn.pending_tool_call = Some(call(arguments));
        coordinator.execute(catalog, turn).await.unwrap()
    }

    #[tokio::test]
    async fn success_chains_result_and_prompt() {
        let (catalog, invocations, coordinator) = setup(Ok(Some("sunny, 22C".into())));
        let mut turn = TurnContext::new("u", "weather in Berlin?");

        let report =
            run_call(&coordinator, &catalog, &mut turn, r#"{"city":"Berlin"}"#).await;

        assert_eq!(report.state, CallState::Succeeded);
        assert_eq!(report.return_value, "sunny, 22C");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        let chained = turn.take_chained().unwrap();
        let attachment = chained.tool_result.as_ref().unwrap();
        assert_eq!(attachment.content, "sunny, 22C");
        assert!(chained.excluded_tools.contains("city_weather"));
        assert_eq!(
            chained.prompt_additions.assemble(""),
            "Summarize the weather for the user."
        );
    }

    #[tokio::test]
    async fn missing_return_value_becomes_success_literal() {
        let (catalog, _, coordinator) = setup(Ok(None));
        let mut turn = TurnContext::new("u", "weather in Berlin?");

        let report =
            run_call(&coordinator, &catalog, &mut turn, r#"{"city":"Berlin"}"#).await;
        assert_eq!(report.return_value, "success");
        assert_eq!(report.state, CallState::Succeeded);
    }

    #[tokio::test]
    async fn handler_error_chains_fail_reason_and_prompt() {
        let (catalog, _, coordinator) = setup(Err("bad city".into()));
        let mut turn = TurnContext::new("u", "weather in Atlantis?");

        let report =
            run_call(&coordinator, &catalog, &mut turn, r#"{"city":"Atlantis"}"#).await;

        assert_eq!(report.state, CallState::Failed);
        assert_eq!(report.return_value, "fail, reason: bad city");

        let chained = turn.take_chained().unwrap();
        assert_eq!(
            chained.tool_result.as_ref().unwrap().content,
            "fail, reason: bad city"
        );
        assert_eq!(
            chained.prompt_additions.assemble(""),
            "Explain that the weather lookup failed."
        );
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_handler() {
        let (catalog, invocations, coordinator) = setup(Ok(Some("unreachable".into())));
        let mut turn = TurnContext::new("u", "weather?");

        // Missing the required "city" field.
        let report = run_call(&coordinator, &catalog, &mut turn, "{}").await;

        assert_eq!(report.state, CallState::Failed);
        assert!(report.return_value.contains("missing required field 'city'"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_type_is_invalid_arguments() {
        let (catalog, invocations, coordinator) = setup(Ok(Some("unreachable".into())));
        let mut turn = TurnContext::new("u", "weather?");

        let report =
            run_call(&coordinator, &catalog, &mut turn, r#"{"city": 42}"#).await;

        assert_eq!(report.state, CallState::Failed);
        assert!(report.return_value.contains("must be of type string"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_arguments() {
        let (catalog, invocations, coordinator) = setup(Ok(Some("unreachable".into())));
        let mut turn = TurnContext::new("u", "weather?");

        let report = run_call(&coordinator, &catalog, &mut turn, "{not json").await;

        assert_eq!(report.state, CallState::Failed);
        assert!(report.return_value.starts_with("fail, reason: "));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_panic() {
        let (catalog, _, coordinator) = setup(Ok(None));
        let mut turn = TurnContext::new("u", "hello");

        turn.pending_tool_call = Some(ToolCall {
            id: "call_9".into(),
            name: "no_such_tool".into(),
            arguments: "{}".into(),
        });
        let report = coordinator.execute(&catalog, &mut turn).await.unwrap();
        assert_eq!(report.return_value, "fail, reason: tool not found");
    }

    #[tokio::test]
    async fn execute_without_pending_call_is_an_error() {
        let (catalog, invocations, coordinator) = setup(Ok(None));
        let mut turn = TurnContext::new("u", "hello");

        let err = coordinator.execute(&catalog, &mut turn).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(weather_descriptor(), Arc::new(SlowSkill))
            .unwrap();
        let coordinator =
            ToolCoordinator::new(Duration::from_secs(30), Arc::new(EventBus::default()));
        let mut turn = TurnContext::new("u", "weather?");

        let report =
            run_call(&coordinator, &catalog, &mut turn, r#"{"city":"Berlin"}"#).await;
        assert_eq!(report.state, CallState::Failed);
        assert!(report.return_value.contains("timed out after 30s"));
    }

    #[tokio::test]
    async fn finished_event_published_on_success_and_failure() {
        let (catalog, _, _) = setup(Ok(Some("sunny".into())));
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let coordinator = ToolCoordinator::new(Duration::from_secs(5), Arc::clone(&events));

        let mut turn = TurnContext::new("u", "weather?");
        run_call(&coordinator, &catalog, &mut turn, r#"{"city":"Berlin"}"#).await;

        let mut saw_finished = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::ToolFinished { success, .. } = event.as_ref() {
                assert!(success);
                saw_finished = true;
            }
        }
        assert!(saw_finished);
    }
}
