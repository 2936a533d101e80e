//! Errors surfaced by the agentic loop.
//!
//! Only model-transport failures escape a turn. Tool failures, provider
//! failures, permission denials, and timeouts are all absorbed into
//! structured tool results that re-enter the transcript, so the model can
//! self-correct.

use thiserror::Error;

use crate::ai::client::ModelError;

/// Hard errors that abort the current turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model backend is unreachable. Carries remediation text for the
    /// operator, since this is the one failure the user must fix themselves.
    #[error("model unavailable: {message}. {remediation}")]
    ModelUnavailable { message: String, remediation: String },

    /// Any other model-transport failure, rethrown as-is.
    #[error("model request failed: {0}")]
    Model(String),
}

impl From<ModelError> for AgentError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable(message) => AgentError::ModelUnavailable {
                message,
                remediation: "Check that the model backend is running and the \
                              API credentials are configured, then retry."
                    .to_string(),
            },
            ModelError::Transport(message) => AgentError::Model(message),
        }
    }
}
