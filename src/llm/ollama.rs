//! Self-hosted provider: the Ollama chat API.
//!
//! Per that backend's convention the system directive is folded into the
//! message list as a leading `system`-role entry. Responses are requested
//! non-streaming.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;
use crate::error::ProviderError;
use crate::llm::provider::{ChatMessage, ChatProvider, Role};

const PROVIDER: &str = "ollama";

pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        // Local models can be slow to first token; allow a generous timeout.
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }
}

#[async_trait::async_trait]
impl ChatProvider for OllamaProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: wire_messages(messages, system),
            stream: false,
        };

        let url = format!("{}/api/chat", self.config.base_url);
        tracing::debug!(%url, model = %self.config.model, "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("JSON parse error: {e}. Raw: {body}"),
            })?;

        Ok(parsed.message.content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn wire_messages(messages: &[ChatMessage], system: Option<&str>) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        wire.push(WireMessage {
            role: "system",
            content: system.to_string(),
        });
    }
    for msg in messages {
        wire.push(WireMessage {
            role: match msg.role {
                Role::Own => "assistant",
                Role::Other => "user",
            },
            content: msg.content.clone(),
        });
    }
    wire
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}
