//! Tool registry: name -> handler dispatch with a uniform result contract.
//!
//! Every execution path converges on a [`ToolResult`]. Unknown tools and
//! handler failures become error results, never propagated errors, so a
//! single bad call can never abort the loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::ai::types::AiTool;
use crate::checkpoint::CheckpointManager;
use crate::process::ProcessRegistry;

/// Default tool execution timeout (2 minutes).
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// How much of the argument payload makes it into the log line.
const ARG_PREVIEW_CHARS: usize = 200;

/// Uniform tool execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message.to_string()),
        }
    }

    pub fn error_with_output(message: impl std::fmt::Display, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(message.to_string()),
        }
    }

    /// The value recorded in the transcript: the plain output on success,
    /// an `{error, output?}` envelope on failure.
    pub fn transcript_value(&self) -> Value {
        if self.success {
            Value::String(self.output.clone())
        } else {
            let mut envelope = serde_json::Map::new();
            envelope.insert(
                "error".to_string(),
                Value::String(self.error.clone().unwrap_or_else(|| "tool failed".into())),
            );
            if !self.output.is_empty() {
                envelope.insert("output".to_string(), Value::String(self.output.clone()));
            }
            Value::Object(envelope)
        }
    }
}

/// Parse tool parameters, converting failures into an error result.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::error(format!("invalid parameters: {}", e)))
}

/// Context handed to every tool execution.
#[derive(Default)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub process_registry: Option<Arc<ProcessRegistry>>,
    pub checkpoints: Option<Arc<CheckpointManager>>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_process_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.process_registry = Some(registry);
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Trait for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id).
    fn name(&self) -> &str;

    /// Tool description for the model.
    fn description(&self) -> &str;

    /// JSON schema for parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. Failures are expressed in the result, not thrown.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Registry mapping tool names to handlers.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Register a tool. A later registration overwrites an existing name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Catalog advertised to the model, sorted for a stable prompt.
    pub async fn catalog(&self) -> Vec<AiTool> {
        let tools = self.tools.read().await;
        let mut catalog: Vec<AiTool> = tools
            .values()
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        catalog
    }

    /// Remove all tools whose names start with `prefix`.
    pub async fn unregister_by_prefix(&self, prefix: &str) {
        let mut tools = self.tools.write().await;
        tools.retain(|name, _| !name.starts_with(prefix));
    }

    /// Execute a tool by name.
    ///
    /// Every call is logged before execution (name plus a truncated argument
    /// preview) and after (pass/fail), independent of what the tool does.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        tracing::info!(
            tool = name,
            args = %preview(&params),
            "Executing tool"
        );

        let Some(tool) = self.get(name).await else {
            tracing::warn!(tool = name, "Unknown tool requested");
            return ToolResult::error(format!("unknown tool: {}", name));
        };

        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => ToolResult::error(format!(
                "tool '{}' timed out after {}s",
                name,
                timeout.as_secs()
            )),
        };

        if result.success {
            tracing::info!(
                tool = name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Tool succeeded"
            );
        } else {
            tracing::warn!(
                tool = name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Tool failed"
            );
        }

        result
    }
}

fn preview(params: &Value) -> String {
    let rendered = params.to_string();
    if rendered.chars().count() <= ARG_PREVIEW_CHARS {
        return rendered;
    }
    let clipped: String = rendered.chars().take(ARG_PREVIEW_CHARS).collect();
    format!("{}...", clipped)
}
