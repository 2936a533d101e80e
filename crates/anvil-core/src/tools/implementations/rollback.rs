//! Restore the most recent working-tree checkpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct RollbackTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default = "default_action")]
    action: String,
}

fn default_action() -> String {
    "restore".to_string()
}

#[async_trait]
impl Tool for RollbackTool {
    fn name(&self) -> &str {
        "rollback"
    }

    fn description(&self) -> &str {
        "Discard current uncommitted changes and restore the working tree \
         to the most recent checkpoint. Action 'list' shows available \
         checkpoints instead (older entries are informational only)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["restore", "list"],
                    "description": "restore (default) or list"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let Some(checkpoints) = &ctx.checkpoints else {
            return ToolResult::error("checkpoint manager not available");
        };

        match params.action.as_str() {
            "list" => match checkpoints.list() {
                Ok(labels) => {
                    let count = labels.len();
                    ToolResult::success(
                        json!({ "checkpoints": labels, "count": count }).to_string(),
                    )
                }
                Err(e) => ToolResult::error(format!("listing failed: {}", e)),
            },
            "restore" => match checkpoints.rollback() {
                Ok(Some(label)) => {
                    ToolResult::success(json!({ "restored": label }).to_string())
                }
                Ok(None) => ToolResult::error(
                    "nothing to restore: no checkpoint exists (or version \
                     control is unavailable)",
                ),
                Err(e) => ToolResult::error(format!("rollback failed: {}", e)),
            },
            other => ToolResult::error(format!(
                "unknown action '{}'; use restore or list",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointManager;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[tokio::test]
    async fn restore_without_checkpoints_reports_the_gap() {
        let ctx = ToolContext::new(PathBuf::from("."))
            .with_checkpoints(Arc::new(CheckpointManager::disabled()));

        let result = RollbackTool.execute(json!({}), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("nothing to restore"));
    }

    #[tokio::test]
    async fn list_on_disabled_manager_is_empty_not_fatal() {
        let ctx = ToolContext::new(PathBuf::from("."))
            .with_checkpoints(Arc::new(CheckpointManager::disabled()));

        let result = RollbackTool.execute(json!({"action": "list"}), &ctx).await;
        assert!(result.success);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["count"], 0);
    }

    #[tokio::test]
    async fn missing_manager_is_an_error_result() {
        let result = RollbackTool
            .execute(json!({}), &ToolContext::default())
            .await;
        assert!(!result.success);
    }
}
