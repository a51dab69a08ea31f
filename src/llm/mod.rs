//! LLM client module.
//!
//! A trait-based abstraction over chat-completion providers, with an
//! OpenRouter-format HTTP implementation as the production client and
//! scripted implementations in tests. All JSON-returning call sites go
//! through [`complete_json`], which owns the extract/parse/re-prompt policy.

mod error;
mod openrouter;
mod parse;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use openrouter::OpenRouterClient;
pub use parse::{complete_json, extract_json};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Optional per-call parameter overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// Sampling temperature; the client default applies when unset.
    pub temperature: Option<f64>,
    /// Maximum output tokens; the client default applies when unset.
    pub max_tokens: Option<u64>,
}

/// Trait for LLM clients.
///
/// # Contract
/// - Implementations are stateless per call and safe for concurrent use.
/// - Transient transport failures are retried internally; an `Err` is final.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a conversation and return the model's text response.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<String, LlmError>;
}
