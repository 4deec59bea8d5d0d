//! LLM provider backends.
//!
//! Each provider owns its request shape and its response extraction. The
//! transport only moves JSON; it knows nothing about the providers.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::error::{Result, SubtransError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Groq,
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Groq, Provider::Gemini, Provider::OpenAi];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }

    /// Endpoint, model and batch size tuned to each provider's throughput
    pub fn default_settings(&self) -> ProviderSettings {
        match self {
            Provider::Groq => ProviderSettings {
                endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                model: "llama-3.3-70b-versatile".to_string(),
                batch_size: 20,
            },
            Provider::Gemini => ProviderSettings {
                endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
                model: "gemini-pro".to_string(),
                batch_size: 8,
            },
            Provider::OpenAi => ProviderSettings {
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                batch_size: 12,
            },
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn credential_from_env(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Cheap format check; a key that fails it is still tried
    pub fn credential_looks_valid(&self, key: &str) -> bool {
        if key.len() < 20 {
            return false;
        }
        match self {
            Provider::Groq => key.starts_with("gsk_"),
            Provider::OpenAi => key.starts_with("sk-"),
            Provider::Gemini => true,
        }
    }

    pub fn build_request(
        &self,
        settings: &ProviderSettings,
        prompt: &str,
        credential: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<ProviderRequest> {
        match self {
            Provider::Groq | Provider::OpenAi => {
                let body = ChatCompletionRequest {
                    model: &settings.model,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                    }],
                    temperature,
                    max_tokens,
                };
                Ok(ProviderRequest {
                    url: settings.endpoint.clone(),
                    bearer: Some(credential.to_string()),
                    body: serde_json::to_value(body)?,
                })
            }
            Provider::Gemini => {
                let body = GenerateContentRequest {
                    contents: vec![Content {
                        parts: vec![Part {
                            text: prompt.to_string(),
                        }],
                    }],
                    generation_config: GenerationConfig {
                        temperature,
                        max_output_tokens: max_tokens,
                    },
                };
                let base = format!(
                    "{}/{}:generateContent",
                    settings.endpoint.trim_end_matches('/'),
                    settings.model
                );
                let url = reqwest::Url::parse_with_params(&base, &[("key", credential)])
                    .map_err(|e| SubtransError::Config(format!("Invalid Gemini endpoint: {}", e)))?;
                Ok(ProviderRequest {
                    url: url.to_string(),
                    bearer: None,
                    body: serde_json::to_value(body)?,
                })
            }
        }
    }

    /// Pull the raw completion text out of a response body.
    /// A body carrying an `error` field is a provider failure.
    pub fn extract_text(&self, body: &Value) -> Result<String> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| match error.as_str() {
                    Some(s) => s.to_string(),
                    None => error.to_string(),
                });
            return Err(SubtransError::from_provider_message(&message));
        }

        let text = match self {
            Provider::Groq | Provider::OpenAi => {
                let response: ChatCompletionResponse = serde_json::from_value(body.clone())
                    .map_err(|e| SubtransError::MalformedResponse(e.to_string()))?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
            Provider::Gemini => {
                let response: GenerateContentResponse = serde_json::from_value(body.clone())
                    .map_err(|e| SubtransError::MalformedResponse(e.to_string()))?;
                response
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content.parts.into_iter().next())
                    .map(|p| p.text)
            }
        };

        text.ok_or_else(|| {
            SubtransError::MalformedResponse(format!("{} response carried no completion text", self))
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = SubtransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Provider::Groq),
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            _ => Err(SubtransError::Config(format!(
                "Invalid provider '{}'. Valid providers: groq, gemini, openai",
                s
            ))),
        }
    }
}

/// `abcd...wxyz`, or empty for keys too short to mask safely
pub fn mask_credential(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return String::new();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub bearer: Option<String>,
    pub body: Value,
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = match self.url.split_once("key=") {
            Some((base, key)) => format!("{}key={}", base, mask_credential(key)),
            None => self.url.clone(),
        };
        f.debug_struct("ProviderRequest")
            .field("url", &url)
            .field("bearer", &self.bearer.as_deref().map(mask_credential))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

/// Moves a provider request over the wire and returns the JSON body
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &ProviderRequest) -> Result<Value>;
}

pub struct HttpCompletionTransport {
    client: Client,
}

impl HttpCompletionTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<Value> {
        debug!("Sending completion request: {:?}", request);

        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request.body);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(SubtransError::from_request)?;
        let status = response.status();
        let text = response.text().await.map_err(SubtransError::from_request)?;

        match status.as_u16() {
            429 => return Err(SubtransError::Throttled(format!("{}: {}", status, text))),
            408 | 504 => return Err(SubtransError::Timeout(format!("{}", status))),
            _ => {}
        }

        match serde_json::from_str::<Value>(&text) {
            // Error bodies are classified by the provider
            Ok(body) if status.is_success() || body.get("error").is_some() => Ok(body),
            Ok(_) => Err(SubtransError::Transport(format!("Provider API error {}", status))),
            Err(_) if !status.is_success() => Err(SubtransError::Transport(format!(
                "Provider API error {}: {}",
                status, text
            ))),
            Err(e) => Err(SubtransError::MalformedResponse(format!("Failed to parse response: {}", e))),
        }
    }
}
