//! Typed event stream emitted by the agentic loop.
//!
//! Consumers (TUI, server, tests) receive these over an unbounded channel
//! and map them to their own presentation. Events fire at fixed points
//! regardless of whether the underlying operation succeeds.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// Assistant text for this iteration.
    AssistantText { text: String },

    /// A tool invocation was observed, before any gating or execution.
    ToolInvoked {
        id: String,
        name: String,
        arguments: Value,
    },

    /// A tool invocation finished (including denials and failures).
    ToolCompleted {
        id: String,
        name: String,
        success: bool,
    },

    /// The permission mode changed.
    ModeChanged {
        mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A working-tree checkpoint was taken before a mutating tool.
    CheckpointCreated { label: String },

    /// One loop iteration finished.
    TurnComplete { iteration: usize, has_more: bool },

    /// The loop finished for this turn.
    Finished,

    /// A hard error aborted the turn.
    Error { error: String },
}
