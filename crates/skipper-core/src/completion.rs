use std::time::Duration;

use async_trait::async_trait;

/// Role tag on a prompt input block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged text block of the model input.
#[derive(Clone, Debug)]
pub struct PromptBlock {
    pub role: Role,
    pub content: String,
}

impl PromptBlock {
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

/// A single completion request: system instructions plus ordered input
/// blocks and a token budget.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub system: String,
    pub input: Vec<PromptBlock>,
    pub max_tokens: u32,
}

/// Classified request failure. The step engine's recovery policy keys off
/// these three classes and nothing finer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompletionError {
    /// Recoverable. The engine backs off (long) before the next step and
    /// asks the history log to compact.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Terminal. The prompt no longer fits the model's context window; no
    /// further step can succeed, so the run ends.
    #[error("token limit exceeded")]
    TokenLimitExceeded,

    /// Recoverable. Anything else — network failure, server error,
    /// malformed response envelope.
    #[error("completion request failed: {0}")]
    Other(String),
}

impl CompletionError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TokenLimitExceeded)
    }

    /// Classify an HTTP response status into the three-class taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => Self::RateLimited { retry_after: None },
            400 if looks_like_token_limit(body) => Self::TokenLimitExceeded,
            _ => Self::Other(format!("status {status}: {body}")),
        }
    }
}

/// Providers phrase context-window overflow differently; match the common
/// spellings rather than a single exact string.
fn looks_like_token_limit(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("prompt is too long")
        || body.contains("context window")
        || body.contains("maximum context length")
        || body.contains("too many tokens")
}

/// The completion collaborator: one request in, one text completion or a
/// classified error out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}
