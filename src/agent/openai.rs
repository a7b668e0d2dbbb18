//! OpenAI-compatible chat completions (OpenAI itself and Together).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::client::{api_failure, ChatClient};
use super::{Agent, Provider};
use crate::error::RunError;
use crate::transcript::ChatMessage;

const MAX_REPLY_TOKENS: u32 = 1024;

/// Together's validation message when the prompt leaves no room to answer.
const TOKEN_LIMIT_MESSAGE: &str =
    "Input validation error: `inputs` tokens + `max_new_tokens` must be <=";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// A chat-completions agent keeping the whole conversation client-side.
pub(crate) struct OpenAiAgent {
    provider: Provider,
    client: Arc<ChatClient>,
    model: String,
    messages: Vec<ApiMessage>,
}

impl OpenAiAgent {
    pub fn new(provider: Provider, client: Arc<ChatClient>, model: String) -> Self {
        Self {
            provider,
            client,
            model,
            messages: Vec::new(),
        }
    }

    fn request(&self) -> CompletionRequest<'_> {
        // OpenAI renamed the token cap; Together still wants the old name.
        let (max_completion_tokens, max_tokens) = match self.provider {
            Provider::Together => (None, Some(MAX_REPLY_TOKENS)),
            _ => (Some(MAX_REPLY_TOKENS), None),
        };
        CompletionRequest {
            model: &self.model,
            messages: &self.messages,
            max_completion_tokens,
            max_tokens,
        }
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn reset(&mut self) {
        self.messages.clear();
    }

    fn premember(&mut self, messages: &[ChatMessage]) {
        self.messages.extend(messages.iter().map(|m| ApiMessage {
            role: m.role.to_string(),
            content: Some(m.content.clone()),
        }));
    }

    async fn act(&mut self, environment_message: &str) -> Result<String> {
        self.messages.push(ApiMessage {
            role: "user".to_string(),
            content: Some(environment_message.to_string()),
        });

        let response: CompletionResponse = self
            .client
            .post("chat/completions", &self.request())
            .await
            .map_err(classify_failure)?;

        let Some(Choice { message }) = response.choices.into_iter().next() else {
            return Err(RunError::refused("Completion returned no choices").into());
        };
        let content = message.content.unwrap_or_default();
        if content.is_empty() {
            return Err(RunError::refused("Completion returned empty content").into());
        }

        debug!(model = %self.model, chars = content.len(), "Completion received");
        self.messages.push(ApiMessage {
            role: message.role,
            content: Some(content.clone()),
        });
        Ok(content)
    }

    fn identify(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Map provider rejections onto the run taxonomy.
fn classify_failure(err: anyhow::Error) -> anyhow::Error {
    let verdict = match api_failure(&err) {
        Some(failure) if failure.status == 400 => bad_request_verdict(&failure.body),
        _ => None,
    };
    match verdict {
        Some(run_error) => err.context(run_error),
        None => err,
    }
}

fn bad_request_verdict(body: &str) -> Option<RunError> {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let code = error.as_ref().and_then(|e| e.code.as_deref());
    let message = error
        .as_ref()
        .and_then(|e| e.message.as_deref())
        .unwrap_or(body);

    if code == Some("invalid_prompt") {
        Some(RunError::refused(message))
    } else if message.contains(TOKEN_LIMIT_MESSAGE) {
        Some(RunError::failure("Hit the token limit"))
    } else {
        None
    }
}
