//! Provider registry -- a named collection of available LLM providers.
//!
//! The worker looks providers up by the job's `ai_model` string at runtime;
//! the designated image provider serves the `design_assets` step regardless
//! of which provider generated the text content.

use std::collections::HashMap;

use anyhow::{Result, bail};

use super::LlmProvider;

/// A collection of registered [`LlmProvider`] implementations, keyed by name.
///
/// # Example
///
/// ```ignore
/// let mut registry = ProviderRegistry::new();
/// registry.register(AnthropicProvider::new(config));
/// let provider = registry.for_model("claude-sonnet-4-5").unwrap();
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn LlmProvider>>,
    default_provider: Option<String>,
    image_provider: Option<String>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    ///
    /// The provider is stored under the name returned by
    /// [`LlmProvider::name`]. The first registered provider becomes the
    /// default. If a provider with the same name is already registered, it
    /// is replaced and the old one is returned.
    pub fn register(&mut self, provider: impl LlmProvider + 'static) -> Option<Box<dyn LlmProvider>> {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, Box::new(provider))
    }

    /// Override the default provider by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            bail!("provider {:?} is not registered", name);
        }
        self.default_provider = Some(name.to_owned());
        Ok(())
    }

    /// Designate the provider used for image generation.
    pub fn set_image_provider(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            bail!("provider {:?} is not registered", name);
        }
        self.image_provider = Some(name.to_owned());
        Ok(())
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&dyn LlmProvider> {
        self.providers.get(name).map(|b| b.as_ref())
    }

    /// Resolve the provider for a vendor model identifier.
    ///
    /// Model prefixes map to providers ("claude-*" -> anthropic,
    /// "gpt-*"/"o*"/"dall-e-*" -> openai); anything unrecognised falls back
    /// to the default provider.
    pub fn for_model(&self, model: &str) -> Result<&dyn LlmProvider> {
        let preferred = if model.starts_with("claude") {
            Some("anthropic")
        } else if model.starts_with("gpt")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
            || model.starts_with("dall-e")
        {
            Some("openai")
        } else {
            None
        };

        if let Some(name) = preferred {
            if let Some(provider) = self.get(name) {
                return Ok(provider);
            }
        }

        let Some(ref default) = self.default_provider else {
            bail!("no LLM providers registered");
        };
        self.get(default)
            .ok_or_else(|| anyhow::anyhow!("default provider {:?} is not registered", default))
    }

    /// The provider designated for image generation, falling back to the
    /// default provider.
    pub fn for_images(&self) -> Result<&dyn LlmProvider> {
        let name = self
            .image_provider
            .as_deref()
            .or(self.default_provider.as_deref());
        let Some(name) = name else {
            bail!("no LLM providers registered");
        };
        self.get(name)
            .ok_or_else(|| anyhow::anyhow!("image provider {:?} is not registered", name))
    }

    /// List the names of all registered providers.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    /// Return `true` if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default", &self.default_provider)
            .field("image", &self.image_provider)
            .finish()
    }
}
