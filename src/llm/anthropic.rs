//! Hosted provider: the Anthropic messages API.
//!
//! The system directive travels as a separate top-level field, not as a
//! message. The wire format also requires user/assistant turns to strictly
//! alternate starting with `user`, so consecutive same-role entries from the
//! per-agent view are coalesced before sending.

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::AnthropicConfig;
use crate::error::ProviderError;
use crate::llm::provider::{ChatMessage, ChatProvider, Role};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a hosted provider. Fails fast if no API key is configured.
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() {
            return Err(ProviderError::MissingApiKey {
                provider: PROVIDER.to_string(),
            });
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self { client, config })
    }

    fn api_key(&self) -> String {
        self.config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ChatProvider for AnthropicProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: wire_messages(messages),
        };

        let url = format!("{}/v1/messages", self.config.base_url);
        tracing::debug!(%url, model = %self.config.model, "sending messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
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

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("JSON parse error: {e}. Raw: {body}"),
            })?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "no text content in response".to_string(),
            });
        }

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Map the per-agent view onto the wire format: own turns become
/// `assistant`, everyone else's become `user`, and runs of the same role
/// collapse into one message.
fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = Vec::new();
    for msg in messages {
        let role = match msg.role {
            Role::Own => "assistant",
            Role::Other => "user",
        };
        match wire.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => wire.push(WireMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }
    // The API rejects a leading assistant turn.
    if wire.first().map(|m| m.role) == Some("assistant") {
        wire.insert(
            0,
            WireMessage {
                role: "user",
                content: "[The conversation is already in progress.]".to_string(),
            },
        );
    }
    wire
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}
