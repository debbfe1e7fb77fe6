//! Generative model collaborators.
//!
//! [`HttpGenerator`] speaks either the Ollama `/api/generate` API or an
//! OpenAI-compatible `/v1/chat/completions` API.

use crate::config::LlmConfig;
use crate::error::{ConsolidateError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = ConsolidateError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            other => Err(ConsolidateError::Config(format!(
                "Unsupported LLM provider '{other}' (expected 'ollama' or 'openai')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

impl From<&LlmConfig> for GenerateOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Produces text for a prompt
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Short identifier used in logs and reports
    fn name(&self) -> String;
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for a local or hosted model
pub struct HttpGenerator {
    client: reqwest::Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsolidateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    fn request_error(&self, e: &reqwest::Error) -> ConsolidateError {
        if e.is_timeout() {
            ConsolidateError::Generation(format!(
                "request to {} timed out after {:?}",
                self.endpoint, self.timeout
            ))
        } else if e.is_connect() {
            ConsolidateError::Generation(format!("cannot connect to {}", self.endpoint))
        } else {
            ConsolidateError::Generation(format!("request failed: {e}"))
        }
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| self.request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConsolidateError::Generation(format!(
                "{url} returned HTTP {}: {body}",
                status.as_u16()
            )));
        }
        Ok(response)
    }

    async fn generate_ollama(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let response: OllamaResponse = self
            .post(&url, &request)
            .await?
            .json()
            .await
            .map_err(|e| ConsolidateError::Generation(format!("invalid response: {e}")))?;
        if !response.done {
            log::warn!("{} reported an incomplete generation", self.model);
        }
        Ok(response.response)
    }

    async fn generate_chat(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let response: ChatResponse = self
            .post(&url, &request)
            .await?
            .json()
            .await
            .map_err(|e| ConsolidateError::Generation(format!("invalid response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ConsolidateError::Generation("response has no choices".to_string()))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        log::debug!(
            "Generating with {} (prompt_length={})",
            self.model,
            prompt.len()
        );
        let start = Instant::now();
        let text = match self.provider {
            LlmProvider::Ollama => self.generate_ollama(prompt, options).await?,
            LlmProvider::OpenAi => self.generate_chat(prompt, options).await?,
        };
        log::debug!(
            "Generation completed in {:.2}s (model={})",
            start.elapsed().as_secs_f64(),
            self.model
        );
        Ok(text)
    }

    fn name(&self) -> String {
        self.model.clone()
    }
}

/// Return the body of the first fenced code block, or the trimmed text when there is none.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_open = &trimmed[open + 3..];
    // Skip the info string (`python`, `py`, ...)
    let body_start = after_open.find('\n').map_or(after_open.len(), |pos| pos + 1);
    let body = &after_open[body_start..];
    let body = body.find("```").map_or(body, |close| &body[..close]);
    body.trim_end().to_string()
}
