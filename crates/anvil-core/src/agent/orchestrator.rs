//! The agentic loop.
//!
//! `AgentLoop` owns one conversation's control flow: send the transcript
//! and tool catalog to the model, turn the response into invocations, run
//! them sequentially through the gate and the registry, append the results,
//! and repeat until the model answers without tool calls or the iteration
//! cap is hit. Consumers watch the [`LoopEvent`] stream; the return value
//! carries the final text.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::ai::client::{CallOptions, ModelClient};
use crate::ai::extract;
use crate::ai::types::{Content, ModelMessage, Role};
use crate::checkpoint::CheckpointManager;
use crate::error::AgentError;
use crate::permission::PermissionGate;
use crate::process::ProcessRegistry;
use crate::tools::registry::ToolRegistry;

use super::executor;
use super::loop_events::LoopEvent;

const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Shared services the loop composes. An explicit context rather than
/// globals, so independent instances (tests, sub-agents) never interfere.
#[derive(Clone)]
pub struct LoopServices {
    pub model: Arc<dyn ModelClient>,
    pub tools: Arc<ToolRegistry>,
    pub processes: Arc<ProcessRegistry>,
    pub checkpoints: Arc<CheckpointManager>,
    pub gate: Arc<PermissionGate>,
}

/// Per-conversation configuration.
#[derive(Clone)]
pub struct LoopConfig {
    pub working_dir: PathBuf,
    pub max_iterations: usize,
    /// Per-tool timeout override; the registry default applies otherwise.
    pub tool_timeout: Option<Duration>,
    pub options: CallOptions,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: None,
            options: CallOptions::default(),
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced text with no further invocations.
    Completed { text: String, iterations: usize },
    /// The iteration cap was hit; a fallback message was appended and the
    /// partial transcript preserved. This is a soft, non-error ending.
    IterationLimit { fallback: String, iterations: usize },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed { text, .. } => text,
            TurnOutcome::IterationLimit { fallback, .. } => fallback,
        }
    }
}

pub struct AgentLoop {
    services: LoopServices,
    config: LoopConfig,
    event_tx: mpsc::UnboundedSender<LoopEvent>,
}

impl AgentLoop {
    /// Build a loop and the event stream its consumer reads.
    pub fn new(
        services: LoopServices,
        config: LoopConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                services,
                config,
                event_tx,
            },
            event_rx,
        )
    }

    /// Run one user turn to completion, mutating `conversation` in place.
    ///
    /// Tool and provider failures are absorbed into tool-result turns; only
    /// a model-transport failure aborts with an error.
    pub async fn run_turn(
        &self,
        conversation: &mut Vec<ModelMessage>,
    ) -> Result<TurnOutcome, AgentError> {
        let catalog = self.services.tools.catalog().await;

        for iteration in 1..=self.config.max_iterations {
            let response = match self
                .services
                .model
                .complete(conversation, &catalog, &self.config.options)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let error = AgentError::from(e);
                    let _ = self.event_tx.send(LoopEvent::Error {
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            };

            if !response.text.is_empty() {
                let _ = self.event_tx.send(LoopEvent::AssistantText {
                    text: response.text.clone(),
                });
            }

            let calls = extract::resolve_tool_calls(&response.tool_calls, &response.text);

            let mut content = Vec::with_capacity(calls.len() + 1);
            if !response.text.is_empty() {
                content.push(Content::Text {
                    text: response.text.clone(),
                });
            }
            for call in &calls {
                content.push(Content::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                });
            }
            if !content.is_empty() {
                conversation.push(ModelMessage {
                    role: Role::Assistant,
                    content,
                });
            }

            if calls.is_empty() {
                let _ = self.event_tx.send(LoopEvent::TurnComplete {
                    iteration,
                    has_more: false,
                });
                let _ = self.event_tx.send(LoopEvent::Finished);
                return Ok(TurnOutcome::Completed {
                    text: response.text,
                    iterations: iteration,
                });
            }

            let results =
                executor::execute_tool_calls(&calls, &self.services, &self.config, &self.event_tx)
                    .await;
            conversation.push(ModelMessage {
                role: Role::Tool,
                content: results,
            });

            let _ = self.event_tx.send(LoopEvent::TurnComplete {
                iteration,
                has_more: true,
            });
        }

        tracing::warn!(
            max_iterations = self.config.max_iterations,
            "Iteration cap reached; ending turn with fallback message"
        );

        let fallback = format!(
            "Stopping after {} tool iterations without a final answer. \
             The work so far is preserved in the conversation; ask me to \
             continue if needed.",
            self.config.max_iterations
        );
        conversation.push(ModelMessage::text(Role::Assistant, fallback.clone()));
        let _ = self.event_tx.send(LoopEvent::Finished);

        Ok(TurnOutcome::IterationLimit {
            fallback,
            iterations: self.config.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::{ModelError, ModelResponse};
    use crate::ai::types::{AiTool, ToolCall};
    use crate::permission::{Mode, ModeAction};
    use crate::tools::registry::{Tool, ToolContext, ToolResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Scripted model: pops one canned reply per call; repeats the last
    /// reply when the script runs dry.
    struct ScriptedModel {
        script: Mutex<Vec<Result<ModelResponse, ModelError>>>,
    }

    impl ScriptedModel {
        fn new(mut script: Vec<Result<ModelResponse, ModelError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
            }
        }

        fn text(text: &str) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                text: text.to_string(),
                ..Default::default()
            })
        }

        fn tool(name: &str, arguments: Value) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                tool_calls: vec![ToolCall::new(name, arguments)],
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            _conversation: &[ModelMessage],
            _tools: &[AiTool],
            _options: &CallOptions,
        ) -> Result<ModelResponse, ModelError> {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                return script.pop().unwrap();
            }
            match script.last() {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(ModelError::Unavailable(m))) => Err(ModelError::Unavailable(m.clone())),
                Some(Err(ModelError::Transport(m))) => Err(ModelError::Transport(m.clone())),
                None => ScriptedModel::text("done"),
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success(params.to_string())
        }
    }

    struct WriteStub;

    #[async_trait]
    impl Tool for WriteStub {
        fn name(&self) -> &str {
            "write"
        }
        fn description(&self) -> &str {
            "Pretend write"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success("written")
        }
    }

    async fn loop_with(
        model: ScriptedModel,
        gate: PermissionGate,
        max_iterations: usize,
    ) -> (AgentLoop, mpsc::UnboundedReceiver<LoopEvent>) {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(EchoTool)).await;
        tools.register(Arc::new(WriteStub)).await;

        let services = LoopServices {
            model: Arc::new(model),
            tools,
            processes: Arc::new(ProcessRegistry::new()),
            checkpoints: Arc::new(CheckpointManager::disabled()),
            gate: Arc::new(gate),
        };
        let config = LoopConfig {
            max_iterations,
            ..Default::default()
        };
        AgentLoop::new(services, config)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LoopEvent>) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn text_only_response_ends_the_turn() {
        let model = ScriptedModel::new(vec![ScriptedModel::text("All done.")]);
        let (agent, mut rx) = loop_with(model, PermissionGate::new(), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "hello")];
        let outcome = agent.run_turn(&mut conversation).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                text: "All done.".to_string(),
                iterations: 1
            }
        );
        assert_eq!(conversation.len(), 2);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::AssistantText { .. })));
        assert!(events.iter().any(|e| matches!(e, LoopEvent::Finished)));
    }

    #[tokio::test]
    async fn relentless_tool_caller_hits_the_iteration_cap() {
        let model = ScriptedModel::new(vec![ScriptedModel::tool("echo", json!({"n": 1}))]);
        let (agent, _rx) = loop_with(model, PermissionGate::new(), 3).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        let outcome = agent.run_turn(&mut conversation).await.unwrap();

        match outcome {
            TurnOutcome::IterationLimit {
                fallback,
                iterations,
            } => {
                assert_eq!(iterations, 3);
                assert!(fallback.contains("3 tool iterations"));
            }
            other => panic!("expected iteration limit, got {:?}", other),
        }

        // user + 3 * (assistant + tool results) + fallback assistant.
        assert_eq!(conversation.len(), 1 + 3 * 2 + 1);
        assert!(conversation.last().unwrap().plain_text().contains("Stopping"));
    }

    #[tokio::test]
    async fn unknown_tool_is_absorbed_not_fatal() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool("no_such_tool", json!({})),
            ScriptedModel::text("recovered"),
        ]);
        let (agent, _rx) = loop_with(model, PermissionGate::new(), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        let outcome = agent.run_turn(&mut conversation).await.unwrap();
        assert_eq!(outcome.text(), "recovered");

        // The failed call left an error envelope in the tool turn.
        let tool_turn = conversation
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool turn");
        let Content::ToolResult { output, is_error, .. } = &tool_turn.content[0] else {
            panic!("expected tool result");
        };
        assert_eq!(*is_error, Some(true));
        assert!(output["error"].as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn plan_mode_denial_carries_remediation_into_transcript() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool("write", json!({"path": "a.rs"})),
            ScriptedModel::text("understood"),
        ]);
        let (agent, _rx) = loop_with(model, PermissionGate::with_mode(Mode::Plan), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        agent.run_turn(&mut conversation).await.unwrap();

        let tool_turn = conversation
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool turn");
        let Content::ToolResult { output, .. } = &tool_turn.content[0] else {
            panic!("expected tool result");
        };
        let error = output["error"].as_str().unwrap();
        assert!(error.contains("plan mode"));
        assert!(error.contains("act mode"));
    }

    #[tokio::test]
    async fn approved_act_mode_lets_write_tools_run() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool("write", json!({})),
            ScriptedModel::text("done"),
        ]);
        let gate = PermissionGate::with_mode(Mode::Plan);
        gate.apply(ModeAction::Approve).unwrap();
        let (agent, _rx) = loop_with(model, gate, 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        agent.run_turn(&mut conversation).await.unwrap();

        let tool_turn = conversation
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool turn");
        let Content::ToolResult { output, is_error, .. } = &tool_turn.content[0] else {
            panic!("expected tool result");
        };
        assert!(is_error.is_none());
        assert_eq!(output, &json!("written"));
    }

    #[tokio::test]
    async fn textual_tool_calls_are_extracted_and_run() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::text("```json\n{\"name\":\"echo\",\"arguments\":{\"x\":1}}\n```"),
            ScriptedModel::text("finished"),
        ]);
        let (agent, mut rx) = loop_with(model, PermissionGate::new(), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        let outcome = agent.run_turn(&mut conversation).await.unwrap();
        assert_eq!(outcome.text(), "finished");

        let events = drain(&mut rx);
        let invoked = events.iter().any(
            |e| matches!(e, LoopEvent::ToolInvoked { name, .. } if name == "echo"),
        );
        let completed = events.iter().any(
            |e| matches!(e, LoopEvent::ToolCompleted { name, success, .. } if name == "echo" && *success),
        );
        assert!(invoked);
        assert!(completed);
    }

    #[tokio::test]
    async fn mode_tools_switch_the_gate() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool("enter_plan_mode", json!({"reason": "plan first"})),
            ScriptedModel::text("planning"),
        ]);
        let (agent, mut rx) = loop_with(model, PermissionGate::new(), 10).await;
        let gate = agent.services.gate.clone();

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        agent.run_turn(&mut conversation).await.unwrap();

        assert_eq!(gate.mode(), Mode::Plan);
        let events = drain(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, LoopEvent::ModeChanged { mode, .. } if mode == "plan"),
        ));
    }

    #[tokio::test]
    async fn model_unavailable_aborts_with_remediation() {
        let model = ScriptedModel::new(vec![Err(ModelError::Unavailable(
            "connection refused".to_string(),
        ))]);
        let (agent, mut rx) = loop_with(model, PermissionGate::new(), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        let err = agent.run_turn(&mut conversation).await.unwrap_err();

        match &err {
            AgentError::ModelUnavailable { remediation, .. } => {
                assert!(remediation.contains("backend"));
            }
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, LoopEvent::Error { .. })));
    }

    #[tokio::test]
    async fn other_transport_errors_pass_through() {
        let model = ScriptedModel::new(vec![Err(ModelError::Transport(
            "500 internal".to_string(),
        ))]);
        let (agent, _rx) = loop_with(model, PermissionGate::new(), 10).await;

        let mut conversation = vec![ModelMessage::text(Role::User, "go")];
        let err = agent.run_turn(&mut conversation).await.unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
    }
}
