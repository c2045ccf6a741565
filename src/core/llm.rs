use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::{LLMConfig, Settings};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Code generation failures. Neither kind is retried.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Missing credentials, unknown provider, bad endpoint.
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Request(String),
}

/// Produces program source from a natural-language prompt
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    OpenAI,
    Gemini,
}

pub struct LLMClient {
    client: Client,
    api_key: Option<String>,
    config: LLMConfig,
}

impl LLMClient {
    pub fn new(config: LLMConfig, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            config,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.llm.clone(), settings.api_key())
    }

    fn provider(&self) -> Result<Provider, GenerationError> {
        match self.config.provider.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            other => Err(GenerationError::Config(format!(
                "Unknown LLM provider: {}",
                other
            ))),
        }
    }

    fn api_key(&self, provider: Provider) -> Result<&str, GenerationError> {
        self.api_key.as_deref().ok_or_else(|| {
            let var = match provider {
                Provider::OpenAI => "OPENAI_API_KEY",
                Provider::Gemini => "GEMINI_API_KEY",
            };
            GenerationError::Config(format!("{} environment variable not set", var))
        })
    }

    fn api_base(&self, provider: Provider) -> String {
        let default = match provider {
            Provider::OpenAI => OPENAI_API_BASE,
            Provider::Gemini => GEMINI_API_BASE,
        };
        self.config
            .api_base
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    async fn chat_openai(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self.api_key(Provider::OpenAI)?;
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base(Provider::OpenAI)))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("[LLMClient] API returned error status {}: {}", status, error_text);
            return Err(GenerationError::Request(format!(
                "API error {}: {}",
                status, error_text
            )));
        }

        let chat_response = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| GenerationError::Request(format!("Response decode error: {}", e)))?;

        Ok(chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default())
    }

    async fn chat_gemini(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self.api_key(Provider::Gemini)?;
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base(Provider::Gemini),
            self.config.model
        );

        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("[LLMClient] Gemini returned error status {}: {}", status, error_text);
            return Err(GenerationError::Request(format!(
                "API error {}: {}",
                status, error_text
            )));
        }

        let body = response
            .json::<GeminiResponse>()
            .await
            .map_err(|e| GenerationError::Request(format!("Response decode error: {}", e)))?;

        Ok(body
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
                    .trim()
                    .to_string()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CodeGenerator for LLMClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let provider = self.provider()?;
        tracing::debug!(
            "[LLMClient] Generating with {:?} model {}",
            provider,
            self.config.model
        );

        match provider {
            Provider::OpenAI => self.chat_openai(prompt).await,
            Provider::Gemini => self.chat_gemini(prompt).await,
        }
    }
}

/// Body of the first fenced code block in `text`, or `text` itself
pub fn extract_code_block(text: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"```[A-Za-z0-9_+-]*[ \t]*\r?\n([\s\S]*?)```").expect("valid fence regex")
    });

    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => text.trim().to_string(),
    }
}
