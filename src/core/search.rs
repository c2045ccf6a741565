//! Web Search - grounding context for tool generation
//!
//! Information Hiding:
//! - Search backend protocol and response shape hidden
//! - Result flattening hidden behind `SearchHit`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::SearchConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Errors mean the service failed; an empty list means nothing was found.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Best-effort view of a provider: empty on any failure
pub async fn search_or_empty(provider: &dyn SearchProvider, query: &str) -> Vec<SearchHit> {
    match provider.search(query).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!("Web search failed: {:#}", e);
            Vec::new()
        }
    }
}

/// DuckDuckGo instant-answer search
pub struct WebSearch {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl WebSearch {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.endpoint.clone(), config.timeout_secs)
    }
}

#[async_trait]
impl SearchProvider for WebSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        tracing::debug!("Searching for: {}", query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("skip_disambig", "1"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .context("Search request failed")?
            .error_for_status()
            .context("Search service returned an error")?;

        // The endpoint labels its JSON as javascript, so decode from text
        let body = response.text().await.context("Failed to read search response")?;
        let data: Value = serde_json::from_str(&body).context("Search response is not JSON")?;

        let mut hits = Vec::new();
        if let Some(topics) = data.get("RelatedTopics").and_then(|t| t.as_array()) {
            collect_topics(topics, &mut hits);
        }

        tracing::debug!("Search returned {} results", hits.len());
        Ok(hits)
    }
}

fn collect_topics(topics: &[Value], hits: &mut Vec<SearchHit>) {
    for item in topics {
        let text = item.get("Text").and_then(|t| t.as_str());
        let url = item.get("FirstURL").and_then(|u| u.as_str());

        match (text, url) {
            (Some(text), Some(url)) => hits.push(SearchHit {
                title: text.to_string(),
                url: url.to_string(),
                snippet: text.to_string(),
            }),
            _ => {
                // Disambiguation groups nest their topics one level down
                if let Some(nested) = item.get("Topics").and_then(|t| t.as_array()) {
                    collect_topics(nested, hits);
                }
            }
        }
    }
}

/// Provider used when search is disabled
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}
