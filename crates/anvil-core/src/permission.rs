//! Work-mode permission gate.
//!
//! A single mode value constrains which tools may execute. Plan mode is a
//! strict allow-list of read-only tools; Act mode lifts the restriction but
//! is reachable only through an explicit approval, which belongs to the
//! embedding surface (a user action), never to a model tool.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tools that may run while a plan is being drafted. Strictly read-only,
/// plus the mode switches themselves.
pub const PLAN_MODE_TOOLS: &[&str] = &[
    "read",
    "grep",
    "glob",
    "list",
    "enter_plan_mode",
    "exit_plan_mode",
];

/// Current permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Plan,
    Act,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Plan => write!(f, "plan"),
            Mode::Act => write!(f, "act"),
        }
    }
}

/// Requested mode transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeAction {
    /// Normal/Act -> Plan. Always allowed.
    EnterPlan,
    /// Plan -> Act. The explicit approval step.
    Approve,
    /// Plan/Act -> Normal. Leave the plan workflow.
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error(
        "tool '{tool}' is not allowed in plan mode; present the plan and \
         switch to act mode (approve the plan) before making changes"
    )]
    Denied { tool: String },

    #[error("invalid mode transition: {action:?} from {from}")]
    InvalidTransition { from: Mode, action: ModeAction },
}

/// Mode state machine with a validated transition table.
#[derive(Debug, Default)]
pub struct PermissionGate {
    mode: RwLock<Mode>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode: RwLock::new(mode),
        }
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read().expect("mode lock poisoned")
    }

    /// Apply a transition. Only the edges in the table exist; anything else
    /// is an error and leaves the mode unchanged.
    pub fn apply(&self, action: ModeAction) -> Result<Mode, PermissionError> {
        let mut mode = self.mode.write().expect("mode lock poisoned");
        let next = match (*mode, action) {
            (Mode::Normal | Mode::Act, ModeAction::EnterPlan) => Mode::Plan,
            (Mode::Plan, ModeAction::Approve) => Mode::Act,
            (Mode::Plan | Mode::Act, ModeAction::Exit) => Mode::Normal,
            (from, action) => {
                return Err(PermissionError::InvalidTransition { from, action });
            }
        };

        tracing::info!(from = %*mode, to = %next, "Mode transition");
        *mode = next;
        Ok(next)
    }

    /// May `tool` execute under the current mode?
    pub fn check(&self, tool: &str) -> Result<(), PermissionError> {
        match self.mode() {
            Mode::Normal | Mode::Act => Ok(()),
            Mode::Plan => {
                if PLAN_MODE_TOOLS.contains(&tool) {
                    Ok(())
                } else {
                    Err(PermissionError::Denied {
                        tool: tool.to_string(),
                    })
                }
            }
        }
    }
}
