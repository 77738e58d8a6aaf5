use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::log_llm_operation;

/// One completion call: prompts plus per-call timeout and temperature.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub timeout: Duration,
    pub temperature: f32,
}

/// Anything that turns a prompt pair into plain text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn provider_name(&self) -> &str;
}

/// Generation capability, chosen once at startup.
#[derive(Clone)]
pub enum GenerationBackend {
    Configured(Arc<dyn CompletionBackend>),
    Absent,
}

impl GenerationBackend {
    pub fn configured(backend: impl CompletionBackend + 'static) -> Self {
        GenerationBackend::Configured(Arc::new(backend))
    }

    /// A real provider when an API key is present, otherwise `Absent`.
    pub fn from_settings(
        provider_type: LLMProviderType,
        api_key: Option<String>,
        base_url: Option<String>,
        model: Option<String>,
    ) -> Self {
        match api_key.filter(|key| !key.trim().is_empty()) {
            Some(api_key) => Self::configured(LLMProviderFactory::create_provider(
                provider_type,
                api_key,
                base_url,
                model,
            )),
            None => GenerationBackend::Absent,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, GenerationBackend::Configured(_))
    }

    pub fn provider_name(&self) -> &str {
        match self {
            GenerationBackend::Configured(backend) => backend.provider_name(),
            GenerationBackend::Absent => "none",
        }
    }
}

impl std::fmt::Debug for GenerationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationBackend::Configured(backend) => {
                f.debug_tuple("Configured").field(&backend.provider_name()).finish()
            }
            GenerationBackend::Absent => f.write_str("Absent"),
        }
    }
}

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

#[async_trait]
impl CompletionBackend for LLMProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        log_llm_operation!(start, "complete", provider = self.provider_name(), model = self.model_name());

        let result = match self {
            LLMProvider::OpenAI(provider) => provider.make_request(request).await,
            LLMProvider::Gemini(provider) => provider.make_request(request).await,
        };

        match &result {
            Ok(content) => {
                log_llm_operation!(success, "complete", provider = self.provider_name(), response_length = content.len());
            }
            Err(e) => {
                log_llm_operation!(error, "complete", provider = self.provider_name(), error = e);
            }
        }
        result
    }

    fn provider_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(_) => "OpenAI",
            LLMProvider::Gemini(_) => "Gemini",
        }
    }
}

/// OpenAI-compatible chat completions provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: LLMMessage,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.siliconflow.cn/v1".to_string()),
            model: model.unwrap_or_else(|| "Qwen/Qwen2.5-72B-Instruct".to_string()),
        }
    }

    pub async fn make_request(&self, request: &CompletionRequest) -> Result<String> {
        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                LLMMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                LLMMessage {
                    role: "user".to_string(),
                    content: request.user_prompt.clone(),
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!("OpenAI API request failed ({}): {}", status, error_text));
        }

        let openai_response: OpenAIResponse = response.json().await?;
        let content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No choices in OpenAI response"))?;

        if content.trim().is_empty() {
            return Err(anyhow::anyhow!("Empty content in OpenAI response"));
        }
        Ok(content.trim().to_string())
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-1.5-flash".to_string()),
        }
    }

    pub async fn make_request(&self, request: &CompletionRequest) -> Result<String> {
        // Gemini has no system role on this endpoint
        let full_prompt = format!("{}\n\n{}", request.system_prompt, request.user_prompt);

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: 2048,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!("Gemini API request failed ({}): {}", status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| anyhow::anyhow!("No candidates in Gemini response"))?;

        if content.trim().is_empty() {
            return Err(anyhow::anyhow!("Empty content in Gemini response"));
        }
        Ok(content.trim().to_string())
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl LLMProviderType {
    /// Parse a provider name; unknown names default to OpenAI-compatible.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "gemini" | "google" => LLMProviderType::Gemini,
            _ => LLMProviderType::OpenAI,
        }
    }
}

impl LLMProviderFactory {
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
    ) -> LLMProvider {
        match provider_type {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model)),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model)),
        }
    }
}
