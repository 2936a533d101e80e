//! Launch a command off the synchronous path.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct RunBackgroundTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    /// Deadline in milliseconds; the registry default applies otherwise.
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for RunBackgroundTool {
    fn name(&self) -> &str {
        "run_background"
    }

    fn description(&self) -> &str {
        "Run a shell command in the background and return a task id \
         immediately. Use the processes tool to check status and output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional deadline in milliseconds"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let Some(registry) = &ctx.process_registry else {
            return ToolResult::error("process registry not available");
        };

        let spawned = match params.timeout {
            Some(ms) => {
                registry
                    .spawn_with_timeout(
                        params.command,
                        ctx.working_dir.clone(),
                        Duration::from_millis(ms),
                    )
                    .await
            }
            None => registry.spawn(params.command, ctx.working_dir.clone()).await,
        };

        match spawned {
            Ok(task_id) => ToolResult::success(
                json!({
                    "task_id": task_id,
                    "status": "running"
                })
                .to_string(),
            ),
            Err(e) => ToolResult::error(format!("failed to start: {}", e)),
        }
    }
}
