//! Tool dispatch for Anvil.
//!
//! Provides the registry, the `Tool` trait, and the built-in tools the core
//! itself owns (process management, parallel agents, mode switches,
//! checkpoint rollback). File-level tools live with the embedding surface.

pub mod implementations;
pub mod registry;

pub use implementations::{register_agents_tool, register_core_tools};
pub use registry::{parse_params, Tool, ToolContext, ToolRegistry, ToolResult};
