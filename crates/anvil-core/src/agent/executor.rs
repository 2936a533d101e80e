//! Sequential tool execution for one model turn.
//!
//! Invocations run in order through the permission gate and the registry;
//! one tool-result content block is produced per invocation before the next
//! begins, keeping transcript ordering deterministic. Mode-switch tools are
//! intercepted here and applied to the gate. A checkpoint is taken before
//! each write-category tool.

use tokio::sync::mpsc;

use crate::ai::types::{Content, ToolCall};
use crate::checkpoint::CheckpointOutcome;
use crate::permission::ModeAction;
use crate::tools::registry::{ToolContext, ToolResult};

use super::loop_events::LoopEvent;
use super::orchestrator::{LoopConfig, LoopServices};

/// Coarse classification used for gating side effects, not tool semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ToolCategory {
    ReadOnly,
    Mode,
    Write,
}

pub(crate) fn tool_category(name: &str) -> ToolCategory {
    match name {
        "read" | "grep" | "glob" | "list" | "processes" | "agents" => ToolCategory::ReadOnly,
        "enter_plan_mode" | "exit_plan_mode" => ToolCategory::Mode,
        _ => ToolCategory::Write,
    }
}

/// Rollback restores the newest checkpoint; snapshotting right before it
/// would make it restore the pre-rollback tree instead.
fn should_checkpoint(name: &str) -> bool {
    tool_category(name) == ToolCategory::Write && name != "rollback"
}

pub(crate) async fn execute_tool_calls(
    calls: &[ToolCall],
    services: &LoopServices,
    config: &LoopConfig,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
) -> Vec<Content> {
    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        let _ = event_tx.send(LoopEvent::ToolInvoked {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let result = execute_one(call, services, config, event_tx).await;

        let _ = event_tx.send(LoopEvent::ToolCompleted {
            id: call.id.clone(),
            name: call.name.clone(),
            success: result.success,
        });

        results.push(Content::ToolResult {
            tool_use_id: call.id.clone(),
            output: result.transcript_value(),
            is_error: if result.success { None } else { Some(true) },
        });
    }

    results
}

async fn execute_one(
    call: &ToolCall,
    services: &LoopServices,
    config: &LoopConfig,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
) -> ToolResult {
    // Mode switches are handled by the loop, not the registry.
    if tool_category(&call.name) == ToolCategory::Mode {
        let action = match call.name.as_str() {
            "enter_plan_mode" => ModeAction::EnterPlan,
            _ => ModeAction::Exit,
        };
        return match services.gate.apply(action) {
            Ok(mode) => {
                let reason = call
                    .arguments
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let _ = event_tx.send(LoopEvent::ModeChanged {
                    mode: mode.to_string(),
                    reason,
                });
                ToolResult::success(format!("mode is now {}", mode))
            }
            Err(e) => ToolResult::error(e),
        };
    }

    if let Err(denial) = services.gate.check(&call.name) {
        return ToolResult::error(denial);
    }

    if should_checkpoint(&call.name) {
        match services.checkpoints.create(&call.name) {
            Ok(CheckpointOutcome::Created { label, .. }) => {
                let _ = event_tx.send(LoopEvent::CheckpointCreated { label });
            }
            Ok(_) => {}
            Err(e) => {
                // Best effort; a failed snapshot must not block the tool.
                tracing::warn!(tool = %call.name, "Checkpoint failed: {:#}", e);
            }
        }
    }

    let mut ctx = ToolContext::new(config.working_dir.clone())
        .with_process_registry(services.processes.clone())
        .with_checkpoints(services.checkpoints.clone());
    if let Some(timeout) = config.tool_timeout {
        ctx = ctx.with_timeout(timeout);
    }

    services
        .tools
        .execute(&call.name, call.arguments.clone(), &ctx)
        .await
}
