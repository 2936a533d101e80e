//! Parallel sub-agent fan-out tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::subagent::{SubAgentPool, SubAgentTask};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct AgentsTool {
    pool: Arc<SubAgentPool>,
}

impl AgentsTool {
    pub fn new(pool: Arc<SubAgentPool>) -> Self {
        Self { pool }
    }
}

#[derive(Deserialize)]
struct Params {
    tasks: Vec<SubAgentTask>,
}

#[async_trait]
impl Tool for AgentsTool {
    fn name(&self) -> &str {
        "agents"
    }

    fn description(&self) -> &str {
        "Run independent read-only sub-agents in parallel, one per task. \
         Tasks beyond the concurrency cap are dropped. Returns one entry \
         per executed task, in input order."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "prompt": {"type": "string"}
                        },
                        "required": ["title", "prompt"]
                    },
                    "description": "Independent task descriptions"
                }
            },
            "required": ["tasks"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.tasks.is_empty() {
            return ToolResult::error("at least one task is required");
        }

        let outcomes = self.pool.execute(params.tasks).await;
        let total = outcomes.len();
        let failed = outcomes.iter().filter(|o| !o.success).count();
        let rendered = json!({ "results": outcomes }).to_string();

        // The full aggregate is always returned, even when sub-tasks fail,
        // so the caller sees every outcome.
        if failed == 0 {
            ToolResult::success(rendered)
        } else {
            ToolResult::error_with_output(
                format!("{} of {} sub-agents failed", failed, total),
                rendered,
            )
        }
    }
}
