//! Adapter exposing provider tools through the local `Tool` contract.
//!
//! Remote tool `T` of provider `P` registers as `mcp_P_T`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::manager::McpManager;
use super::protocol::ProviderToolDef;
use crate::tools::registry::{Tool, ToolContext, ToolRegistry, ToolResult};

pub struct McpTool {
    provider: String,
    tool_name: String,
    full_name: String,
    definition: ProviderToolDef,
    manager: Arc<McpManager>,
}

impl McpTool {
    pub fn new(provider: String, definition: ProviderToolDef, manager: Arc<McpManager>) -> Self {
        let tool_name = definition.name.clone();
        let full_name = format!("mcp_{}_{}", provider, tool_name);

        Self {
            provider,
            tool_name,
            full_name,
            definition,
            manager,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        self.definition
            .description
            .as_deref()
            .unwrap_or("External provider tool")
    }

    fn parameters_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        match self
            .manager
            .call_tool(&self.provider, &self.tool_name, params)
            .await
        {
            Ok(outcome) if outcome.is_error => ToolResult::error_with_output(
                format!("provider tool '{}' reported an error", self.tool_name),
                outcome.text,
            ),
            Ok(outcome) => ToolResult::success(outcome.text),
            Err(e) => ToolResult::error(format!("provider call failed: {}", e)),
        }
    }
}

/// Register every discovered provider tool with the local registry.
pub async fn register_provider_tools(manager: Arc<McpManager>, registry: &ToolRegistry) {
    for (provider, definition) in manager.all_tools().await {
        let tool = Arc::new(McpTool::new(provider, definition, manager.clone()));
        registry.register(tool).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn remote_tools_are_namespaced_by_provider() {
        let manager = Arc::new(McpManager::new(PathBuf::from(".")));
        let definition = ProviderToolDef {
            name: "search".to_string(),
            description: Some("Search things".to_string()),
            input_schema: json!({"type": "object"}),
        };

        let tool = McpTool::new("web".to_string(), definition, manager);
        assert_eq!(tool.name(), "mcp_web_search");
        assert_eq!(tool.description(), "Search things");
    }

    #[tokio::test]
    async fn call_against_dead_provider_is_an_error_result() {
        let manager = Arc::new(McpManager::new(PathBuf::from(".")));
        let definition = ProviderToolDef {
            name: "echo".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        };

        let tool = McpTool::new("gone".to_string(), definition, manager);
        let result = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("provider call failed"));
    }
}
