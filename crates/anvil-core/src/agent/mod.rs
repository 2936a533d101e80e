//! The agentic loop.
//!
//! - `orchestrator` - [`AgentLoop`]: the model-call / tool-call cycle
//! - `executor` - sequential per-turn tool execution
//! - `loop_events` - typed event stream consumed by the embedding surface
//! - `subagent` - bounded parallel fan-out over isolated transcripts

pub mod executor;
pub mod loop_events;
pub mod orchestrator;
pub mod subagent;

pub use loop_events::LoopEvent;
pub use orchestrator::{AgentLoop, LoopConfig, LoopServices, TurnOutcome};
pub use subagent::{SubAgentOutcome, SubAgentPool, SubAgentTask, MAX_PARALLEL_AGENTS};
