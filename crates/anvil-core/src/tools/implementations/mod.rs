//! Built-in tools owned by the core.
//!
//! - run_background: launch a command detached
//! - processes: inspect and stop background tasks
//! - agents: parallel sub-agent fan-out
//! - enter_plan_mode / exit_plan_mode: mode switches (intercepted by the loop)
//! - rollback: restore the most recent working-tree checkpoint
//!
//! File-level tools (read/write/edit/grep/...) belong to the embedding
//! surface and are registered by it.

pub mod agents;
pub mod plan_mode;
pub mod processes;
pub mod rollback;
pub mod run_background;

pub use agents::AgentsTool;
pub use plan_mode::{EnterPlanModeTool, ExitPlanModeTool};
pub use processes::ProcessesTool;
pub use rollback::RollbackTool;
pub use run_background::RunBackgroundTool;

use std::sync::Arc;

use crate::agent::subagent::SubAgentPool;
use crate::tools::registry::ToolRegistry;

/// Register the core-owned tools.
pub async fn register_core_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(RunBackgroundTool)).await;
    registry.register(Arc::new(ProcessesTool)).await;
    registry.register(Arc::new(EnterPlanModeTool)).await;
    registry.register(Arc::new(ExitPlanModeTool)).await;
    registry.register(Arc::new(RollbackTool)).await;
}

/// Register the fan-out tool. Separate because the pool needs a model
/// client, which is only available once the backend is configured.
pub async fn register_agents_tool(registry: &ToolRegistry, pool: Arc<SubAgentPool>) {
    registry.register(Arc::new(AgentsTool::new(pool))).await;
}
