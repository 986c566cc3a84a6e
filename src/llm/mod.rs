//! Language-model access.
//!
//! The Fix Generator depends on the narrow [`LanguageModel`] capability:
//! a single `complete` operation from chat messages to text. The production
//! binding ([`openai::FallbackClient`]) wraps an OpenAI-compatible HTTP API
//! with a model fallback chain; tests substitute a canned implementation.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::FallbackClient;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Errors from a model invocation.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The endpoint signalled throttling (HTTP 429, "quota", "Too Many
    /// Requests"). Retried with backoff by the fallback chain.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Every model in the chain exhausted its rate-limit retries.
    #[error("all models exhausted: {0}")]
    Exhausted(String),

    /// Non-throttling API failure.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint returned no usable content.
    #[error("empty completion")]
    NoContent,

    /// No API key configured.
    #[error("no LLM credentials configured")]
    Unconfigured,
}

impl LlmError {
    /// Whether this error should be retried with backoff.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// A text-completion capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produces a completion for the conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Canned model for tests: returns the configured response verbatim.
    pub struct CannedModel {
        pub response: Result<String, fn() -> LlmError>,
    }

    impl CannedModel {
        pub fn text(response: impl Into<String>) -> Self {
            Self {
                response: Ok(response.into()),
            }
        }

        pub fn failing(make: fn() -> LlmError) -> Self {
            Self {
                response: Err(make),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }
}
