//! Mode-switch tools.
//!
//! These are intercepted by the loop executor and applied to the permission
//! gate; the registry-level execute bodies only run if a caller dispatches
//! them directly. Approval into act mode is deliberately not a tool: it is
//! an explicit action on the gate owned by the embedding surface.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct EnterPlanModeTool;

#[async_trait]
impl Tool for EnterPlanModeTool {
    fn name(&self) -> &str {
        "enter_plan_mode"
    }

    fn description(&self) -> &str {
        "Switch to plan mode to design an approach before making changes. \
         In plan mode only read-only tools are available; the user must \
         approve the plan before act mode unlocks modifications."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Brief explanation shown to the user"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        // Handled by the loop executor.
        ToolResult::success(json!({"note": "mode switch handled by the loop"}).to_string())
    }
}

pub struct ExitPlanModeTool;

#[async_trait]
impl Tool for ExitPlanModeTool {
    fn name(&self) -> &str {
        "exit_plan_mode"
    }

    fn description(&self) -> &str {
        "Leave the plan workflow and return to normal mode without \
         approving the plan."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Brief explanation shown to the user"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        // Handled by the loop executor.
        ToolResult::success(json!({"note": "mode switch handled by the loop"}).to_string())
    }
}
