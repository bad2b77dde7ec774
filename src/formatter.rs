//! AI-assisted rewriting of raw server output.
//!
//! One prompt, one structured answer: the model receives the raw output and
//! is asked for `{"formattedOutput": "..."}`. Non-JSON answers are accepted
//! verbatim, since small local models often ignore the schema.

use clap::ValueEnum;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{HubError, Result};

// -- Collaborator interface -------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRequest {
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatResponse {
    pub formatted_output: String,
}

/// Anything that can turn raw output into a readable rendition.
pub trait OutputFormatter: Send + Sync {
    fn format(&self, req: FormatRequest) -> impl Future<Output = Result<FormatResponse>> + Send;
}

// -- Provider selection -----------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    Openai,
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::Openai => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "llama3",
            Provider::Openai => "gpt-3.5-turbo",
            Provider::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::Openai => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Provider::Ollama => None,
            Provider::Openai => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }
}

// -- Wire types -------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
    pub options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
pub struct OllamaGenerateResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChatResponse {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
}

// -- Prompt -----------------------------------------------------------------

pub fn build_prompt(raw_output: &str) -> String {
    format!(
        "You are an expert at formatting output from an MCP (Model Context Protocol) server \
to improve readability and comprehension for users.\n\n\
Take the raw MCP server output provided below and format it to be more easily understood, \
using markdown formatting, natural language explanations, and any other techniques to improve clarity.\n\n\
Respond with a JSON object of the form {{\"formattedOutput\": \"<formatted text>\"}} and nothing else.\n\n\
Raw MCP Server Output:\n{raw_output}"
    )
}

/// Extract the formatted text from a model answer.
pub fn parse_answer(provider: Provider, answer: &str) -> Result<String> {
    let trimmed = answer.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let text = match serde_json::from_str::<FormatResponse>(unfenced) {
        Ok(resp) => resp.formatted_output,
        Err(_) => unfenced.to_string(),
    };
    if text.trim().is_empty() {
        return Err(HubError::Provider {
            provider: provider.to_string(),
            detail: "model returned an empty answer".to_string(),
        });
    }
    Ok(text)
}

// -- LlmFormatter -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LlmFormatter {
    client: Client,
    api_key: Option<String>,
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
}

impl LlmFormatter {
    /// Build a formatter. Providers that need a key read it from the
    /// environment here, so a missing key fails early.
    pub fn new(
        provider: Provider,
        model: Option<String>,
        base_url: Option<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = match provider.api_key_var() {
            Some(var) => Some(env::var(var).map_err(|_| HubError::MissingApiKey(var))?),
            None => None,
        };
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: base_url
                .unwrap_or_else(|| provider.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature,
        })
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        debug!(provider = %self.provider, model = %self.model, "requesting formatted output");
        match self.provider {
            Provider::Ollama => self.complete_ollama(prompt).await,
            Provider::Openai => self.complete_openai(prompt).await,
            Provider::Anthropic => self.complete_anthropic(prompt).await,
        }
    }

    async fn complete_ollama(&self, prompt: String) -> Result<String> {
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let body: OllamaGenerateResponse = response.json().await?;
        Ok(body.response)
    }

    async fn complete_openai(&self, prompt: String) -> Result<String> {
        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.as_deref().unwrap_or_default()),
            )
            .json(&request)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let body: OpenAIChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| self.provider_error("response had no choices"))
    }

    async fn complete_anthropic(&self, prompt: String) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: 4096,
            temperature: self.temperature,
        };
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let body: AnthropicResponse = response.json().await?;
        body.content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| self.provider_error("response had no text content"))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(self.provider_error(&format!("HTTP {status}: {text}")))
    }

    fn provider_error(&self, detail: &str) -> HubError {
        HubError::Provider {
            provider: self.provider.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl OutputFormatter for LlmFormatter {
    async fn format(&self, req: FormatRequest) -> Result<FormatResponse> {
        let answer = self.complete(build_prompt(&req.raw_output)).await?;
        let formatted_output = parse_answer(self.provider, &answer)?;
        Ok(FormatResponse { formatted_output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::Ollama.to_string(), "ollama");
        assert_eq!(Provider::Openai.to_string(), "openai");
        assert_eq!(Provider::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn test_only_hosted_providers_need_keys() {
        assert_eq!(Provider::Ollama.api_key_var(), None);
        assert_eq!(Provider::Openai.api_key_var(), Some("OPENAI_API_KEY"));
        assert_eq!(Provider::Anthropic.api_key_var(), Some("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_prompt_embeds_raw_output() {
        let p = build_prompt("Players: 3/20");
        assert!(p.contains("Raw MCP Server Output:\nPlayers: 3/20"));
        assert!(p.contains("formattedOutput"));
    }

    #[test]
    fn test_parse_json_answer() {
        let out = parse_answer(Provider::Ollama, r#"{"formattedOutput": "**Online**"}"#).unwrap();
        assert_eq!(out, "**Online**");
    }

    #[test]
    fn test_parse_fenced_json_answer() {
        let answer = "```json\n{\"formattedOutput\": \"ok\"}\n```";
        assert_eq!(parse_answer(Provider::Openai, answer).unwrap(), "ok");
    }

    #[test]
    fn test_parse_plain_answer() {
        assert_eq!(
            parse_answer(Provider::Anthropic, "  The server is online.  ").unwrap(),
            "The server is online."
        );
    }

    #[test]
    fn test_parse_empty_answer_is_error() {
        assert!(parse_answer(Provider::Ollama, "   ").is_err());
        assert!(parse_answer(Provider::Ollama, r#"{"formattedOutput": ""}"#).is_err());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let json = serde_json::to_string(&FormatRequest {
            raw_output: "x".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"rawOutput":"x"}"#);
    }

    #[test]
    fn test_ollama_request_serializes() {
        let req = OllamaGenerateRequest {
            model: "llama3".into(),
            prompt: "hi".into(),
            stream: false,
            format: "json".into(),
            options: OllamaOptions { temperature: 0.2 },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"stream\":false"));
        assert!(json.contains("\"format\":\"json\""));
    }

    #[test]
    fn test_ollama_formatter_defaults() {
        let f = LlmFormatter::new(
            Provider::Ollama,
            None,
            Some("http://localhost:11434/".into()),
            0.2,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(f.model, "llama3");
        assert_eq!(f.base_url, "http://localhost:11434");
    }
}
