//! The model-backend seam.
//!
//! The loop only needs batch completion: conversation + tool catalog in,
//! assistant text and any native tool calls out. Concrete backends (HTTP
//! providers, local inference, test doubles) implement [`ModelClient`].

use async_trait::async_trait;
use thiserror::Error;

use super::types::{AiTool, ModelMessage, ToolCall, Usage};

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.0,
        }
    }
}

/// One complete model response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: String,
    /// Natively structured tool calls, if the backend supports them.
    /// When empty, the loop falls back to text extraction.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// Transport-level failures from the model backend.
///
/// `Unavailable` is the only kind surfaced to the operator with remediation
/// text; everything else is rethrown as-is by the loop.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Transport(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        conversation: &[ModelMessage],
        tools: &[AiTool],
        options: &CallOptions,
    ) -> Result<ModelResponse, ModelError>;
}
