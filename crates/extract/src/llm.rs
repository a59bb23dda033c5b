use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-call model selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            temperature: 0.1,
        }
    }
}

/// Text-generation service constrained to a single JSON object response.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn chat_messages<'a>(system: &'a str, prompt: &'a str) -> Vec<ChatMessage<'a>> {
    vec![
        ChatMessage { role: "system", content: system },
        ChatMessage { role: "user", content: prompt },
    ]
}

fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'static str, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model: &options.model,
            messages: chat_messages(system, prompt),
            stream: false,
            format: "json", // Force JSON output
            options: OllamaOptions {
                temperature: options.temperature,
            },
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.message.content)
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    async fn generate(&self, system: &str, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = OpenAiChatRequest {
            model: &options.model,
            messages: chat_messages(system, prompt),
            temperature: options.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            anyhow::bail!("Chat completion request failed: {}", response.status());
        }

        let completion: OpenAiChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        // Missing content is reported as empty; the extractor decides what that means
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ollama_request_forces_json_format() {
        let request = OllamaChatRequest {
            model: "qwen2.5",
            messages: chat_messages("sys", "user"),
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.5 },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "qwen2.5",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "user"}
                ],
                "stream": false,
                "format": "json",
                "options": {"temperature": 0.5}
            })
        );
    }

    #[test]
    fn test_openai_request_asks_for_json_object() {
        let request = OpenAiChatRequest {
            model: "gpt-4o-mini",
            messages: chat_messages("sys", "user"),
            temperature: 0.25,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"], json!({"type": "json_object"}));
        assert_eq!(value["messages"][1]["content"], "user");
    }

    #[test]
    fn test_openai_response_tolerates_null_content() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let parsed: OpenAiChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/".to_string(), None).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
