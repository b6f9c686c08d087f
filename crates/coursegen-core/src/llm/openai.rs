//! OpenAI chat-completions and image-generation provider.

use async_trait::async_trait;
use serde_json::json;

use super::{
    Completion, CompletionRequest, GeneratedImage, ImageRequest, LlmError, LlmProvider, Role,
    error_for_status,
};

/// Configuration for [`OpenAiProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Model used for the images endpoint.
    pub image_model: String,
}

impl OpenAiConfig {
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
    pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        // OpenAI carries the system prompt as the first message.
        let mut api_messages = vec![json!({
            "role": "system",
            "content": request.system,
        })];
        for msg in &request.messages {
            api_messages.push(json!({
                "role": match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": msg.content,
            }));
        }

        let payload = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": api_messages,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| LlmError::Parse("no message content in response".to_string()))?
            .to_owned();

        Ok(Completion { text })
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, LlmError> {
        let url = format!("{}/images/generations", self.config.base_url);

        let payload = json!({
            "model": self.config.image_model,
            "prompt": request.prompt,
            "size": request.size,
            "n": 1,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let first = data
            .get("data")
            .and_then(|d| d.get(0))
            .ok_or_else(|| LlmError::Parse("no image data in response".to_string()))?;

        let url = first
            .get("url")
            .and_then(|u| u.as_str())
            .map(str::to_owned);
        let b64_data = first
            .get("b64_json")
            .and_then(|b| b.as_str())
            .map(str::to_owned);

        if url.is_none() && b64_data.is_none() {
            return Err(LlmError::Parse(
                "image response has neither url nor b64_json".to_string(),
            ));
        }

        Ok(GeneratedImage { url, b64_data })
    }
}
