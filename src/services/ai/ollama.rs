use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatOptions, LlmProvider, Message};

/// Local models can take a while to load on first use.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ReplyMessage>,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// Native `/api/chat` client for a self-hosted Ollama server.
pub struct OllamaProvider {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(url: String, model: String) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn request<'a>(
        &'a self,
        system_prompt: &'a str,
        messages: &'a [Message],
        options: ChatOptions,
    ) -> ChatRequest<'a> {
        let turns = std::iter::once(ChatTurn {
            role: "system",
            content: system_prompt,
        })
        .chain(messages.iter().map(|m| ChatTurn {
            role: &m.role,
            content: &m.content,
        }))
        .collect();

        ChatRequest {
            model: &self.model,
            messages: turns,
            stream: false,
            options: SamplingOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

fn reply_text(response: ChatResponse, model: &str) -> anyhow::Result<String> {
    if response.done_reason.as_deref() == Some("length") {
        tracing::warn!(model, "Ollama reply cut off at the token limit");
    }
    let content = response
        .message
        .map(|m| m.content.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        anyhow::bail!("empty reply from Ollama model {model}");
    }
    Ok(content)
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        options: ChatOptions,
    ) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&self.request(system_prompt, messages, options))
            .send()
            .await
            .context("failed to call Ollama API")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({status}): {detail}");
        }

        let response: ChatResponse = resp
            .json()
            .await
            .context("failed to parse Ollama response")?;
        reply_text(response, &self.model)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_puts_system_prompt_first() {
        let provider = OllamaProvider::new("http://localhost:11434/".to_string(), "llama3.2".to_string());
        let messages = [Message::user("hello")];
        let options = ChatOptions {
            max_tokens: 400,
            temperature: 0.1,
        };
        let body = serde_json::to_value(provider.request("be brief", &messages, options)).unwrap();

        assert_eq!(provider.url, "http://localhost:11434");
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hello"}));
        assert_eq!(body["options"]["num_predict"], 400);
    }

    #[test]
    fn test_reply_text() {
        let ok: ChatResponse = serde_json::from_value(json!({
            "message": {"role": "assistant", "content": "  hi there \n"},
            "done_reason": "stop"
        }))
        .unwrap();
        assert_eq!(reply_text(ok, "m").unwrap(), "hi there");

        let empty: ChatResponse = serde_json::from_value(json!({"done": true})).unwrap();
        assert!(reply_text(empty, "m").is_err());
    }
}
