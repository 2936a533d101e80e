//! Model-facing types and parsing.
//!
//! - `types` - message/content/tool shapes shared across the crate
//! - `client` - the model-backend seam (`ModelClient`)
//! - `extract` - tool-call extraction from raw assistant text

pub mod client;
pub mod extract;
pub mod types;

pub use client::{CallOptions, ModelClient, ModelError, ModelResponse};
pub use extract::{extract_tool_calls, resolve_tool_calls};
pub use types::{AiTool, Content, ModelMessage, Role, ToolCall, Usage};
