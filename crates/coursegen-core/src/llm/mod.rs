//! LLM provider abstraction.
//!
//! Each concrete provider (Anthropic, OpenAI) wraps one vendor HTTP API and
//! translates it into the common [`LlmProvider`] contract. The trait is
//! intentionally object-safe so providers can be stored as
//! `Box<dyn LlmProvider>` in the [`registry::ProviderRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;

/// Errors that can occur during LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// A text completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Vendor model identifier (e.g. "claude-sonnet-4-5", "gpt-4o").
    pub model: String,
    /// System prompt, sent the way each vendor expects.
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// A single-turn request with one user message.
    pub fn single_turn(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: vec![ChatMessage::user(user)],
            max_tokens: 4096,
        }
    }
}

/// A completed text generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
}

/// An image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    /// Vendor size string, e.g. "1024x1024".
    pub size: String,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: "1024x1024".to_owned(),
        }
    }
}

/// A generated image: either a hosted URL or inline base64 data, depending
/// on what the vendor returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub b64_data: Option<String>,
}

/// Adapter interface for LLM vendors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used as the registry key (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Generate a text completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// Generate an image. Providers without an image endpoint keep the
    /// default implementation.
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, LlmError> {
        let _ = request;
        Err(LlmError::Unsupported(format!(
            "provider {} cannot generate images",
            self.name()
        )))
    }
}

// Compile-time assertion: LlmProvider must be object-safe.
// If this line compiles, the trait can be used as `dyn LlmProvider`.
const _: () = {
    fn _assert_object_safe(_: &dyn LlmProvider) {}
};

/// Map a non-success HTTP status to an [`LlmError`].
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::Auth(body),
        429 => LlmError::RateLimited,
        _ => LlmError::InvalidRequest(body),
    }
}
