//! Web search client.
//!
//! Thin JSON wrapper over a search API endpoint. The client is optional:
//! when no endpoint is configured the web_search step records an empty
//! result set instead of failing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Configuration for [`SearchClient`].
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

pub struct SearchClient {
    config: SearchConfig,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Run a search and return up to `max_results` hits.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let url = format!("{}/search", self.config.base_url);

        let payload = json!({
            "query": query,
            "max_results": max_results,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("search request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("search endpoint returned {status}: {body}");
        }

        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            results: Vec<SearchResult>,
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("failed to parse search response")?;

        Ok(parsed.results.into_iter().take(max_results).collect())
    }
}
