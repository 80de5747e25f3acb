use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Shape the caller expects back from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Json,
    Text,
}

/// A single prompt sent to a `CompletionProvider`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub system: String,
    pub turns: Vec<ChatTurn>,
    pub shape: ResponseShape,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ProviderRequest {
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: vec![ChatTurn::user(prompt)],
            shape: ResponseShape::Json,
            temperature: 0.3,
            max_output_tokens: 1024,
        }
    }

    pub fn text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: vec![ChatTurn::user(prompt)],
            shape: ResponseShape::Text,
            temperature: 0.5,
            max_output_tokens: 512,
        }
    }

    /// Text of the final user turn.
    #[must_use]
    pub fn prompt(&self) -> &str {
        self.turns.last().map_or("", |t| t.text.as_str())
    }
}

/// Remote large-language-model backend.
///
/// The CLI implements this with reqwest against Gemini; tests script replies.
/// One call is one attempt: retry policy lives in the orchestrator.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn send(&self, request: &ProviderRequest) -> Result<String, ProviderError>;
}
