//! Anthropic messages API with prompt caching on the newest user turn.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::client::ChatClient;
use super::Agent;
use crate::error::RunError;
use crate::transcript::ChatMessage;

const MAX_REPLY_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

impl TextBlock {
    fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
            cache_control: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ApiMessage {
    role: String,
    content: Vec<TextBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ApiMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    role: String,
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

pub(crate) struct AnthropicAgent {
    client: Arc<ChatClient>,
    model: String,
    messages: Vec<ApiMessage>,
}

impl AnthropicAgent {
    pub fn new(client: Arc<ChatClient>, model: String) -> Self {
        Self {
            client,
            model,
            messages: Vec::new(),
        }
    }

    /// Mark only the newest user block as a cache breakpoint.
    fn push_user_turn(&mut self, text: &str) {
        for message in &mut self.messages {
            for block in &mut message.content {
                block.cache_control = None;
            }
        }
        let mut block = TextBlock::new(text);
        block.cache_control = Some(CacheControl { kind: "ephemeral" });
        self.messages.push(ApiMessage {
            role: "user".to_string(),
            content: vec![block],
        });
    }
}

#[async_trait]
impl Agent for AnthropicAgent {
    fn reset(&mut self) {
        self.messages.clear();
    }

    fn premember(&mut self, messages: &[ChatMessage]) {
        self.messages.extend(messages.iter().map(|m| ApiMessage {
            role: m.role.to_string(),
            content: vec![TextBlock::new(m.content.clone())],
        }));
    }

    async fn act(&mut self, environment_message: &str) -> Result<String> {
        self.push_user_turn(environment_message);

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_REPLY_TOKENS,
            messages: &self.messages,
        };
        let response: MessagesResponse = self.client.post("messages", &request).await?;

        let Some(text) = response.content.into_iter().find_map(|block| block.text) else {
            return Err(RunError::refused("Message returned no text content").into());
        };

        debug!(model = %self.model, chars = text.len(), "Message received");
        self.messages.push(ApiMessage {
            role: response.role,
            content: vec![TextBlock::new(text.clone())],
        });
        Ok(text)
    }

    fn identify(&self) -> String {
        format!("anthropic/{}", self.model)
    }
}
