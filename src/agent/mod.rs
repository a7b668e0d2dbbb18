//! Agents under evaluation.
//!
//! Every agent exposes the same four capabilities:
//! - `reset`: forget the previous run
//! - `premember`: absorb the seeded conversation before the first live turn
//! - `act`: answer the latest environment message
//! - `identify`: a stable `provider/model` label for run records
//!
//! HTTP-backed agents share one `ChatClient` per provider, constructed once at
//! startup and handed to each agent instance.

mod anthropic;
mod client;
mod human;
#[cfg(test)]
mod mock;
mod openai;

pub(crate) use anthropic::AnthropicAgent;
pub(crate) use client::{ChatClient, RetryPolicy};
pub(crate) use human::HumanAgent;
#[cfg(test)]
pub(crate) use mock::{ScriptedAgent, ScriptedReply};
pub(crate) use openai::OpenAiAgent;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::transcript::ChatMessage;

/// Default model per provider when `--model` is not given.
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_TOGETHER_MODEL: &str = "Qwen/Qwen2.5-72B-Instruct-Turbo";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";

/// An agent that plays the challenge one reply at a time.
#[async_trait]
pub(crate) trait Agent: Send {
    /// Drop all conversation state.
    fn reset(&mut self);

    /// Load the turns that precede the first live call.
    fn premember(&mut self, messages: &[ChatMessage]);

    /// Reply to the latest environment message.
    ///
    /// Errors carrying `RunError::Refused` or `RunError::Failure` decide the
    /// run's status; anything else is treated as retriable.
    async fn act(&mut self, environment_message: &str) -> Result<String>;

    /// Label recorded with every run, e.g. `openai/gpt-4o`.
    fn identify(&self) -> String;
}

/// Supported agent providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Provider {
    /// OpenAI chat completions.
    #[default]
    OpenAi,
    /// Together's OpenAI-compatible endpoint.
    Together,
    /// Anthropic messages API.
    Anthropic,
    /// A person typing at stdin.
    Human,
}

impl Provider {
    /// Model used when none is specified.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Together => DEFAULT_TOGETHER_MODEL,
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Self::Human => "",
        }
    }

    /// Environment variable holding the provider's API key.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Together => Some("TOGETHER_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Human => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Together => write!(f, "together"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Human => write!(f, "human"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "together" => Ok(Self::Together),
            "anthropic" => Ok(Self::Anthropic),
            "human" => Ok(Self::Human),
            _ => anyhow::bail!(
                "Unknown agent provider: '{s}'. Supported: openai, together, anthropic, human"
            ),
        }
    }
}

/// Builds a fresh agent per run, all sharing one provider client.
pub(crate) struct AgentFactory {
    provider: Provider,
    model: String,
    client: Option<Arc<ChatClient>>,
}

impl AgentFactory {
    /// Construct the provider's shared client from the environment.
    pub fn from_env(provider: Provider, model: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let client = match provider.api_key_var() {
            Some(var) => {
                let api_key = std::env::var(var)
                    .with_context(|| format!("{var} must be set to use the {provider} agent"))?;
                Some(Arc::new(ChatClient::for_provider(provider, api_key, retry)?))
            }
            None => None,
        };

        Ok(Self {
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            client,
        })
    }

    pub fn build(&self) -> Box<dyn Agent> {
        match (self.provider, &self.client) {
            (Provider::Anthropic, Some(client)) => Box::new(AnthropicAgent::new(
                Arc::clone(client),
                self.model.clone(),
            )),
            (Provider::OpenAi | Provider::Together, Some(client)) => Box::new(OpenAiAgent::new(
                self.provider,
                Arc::clone(client),
                self.model.clone(),
            )),
            _ => Box::new(HumanAgent::new()),
        }
    }
}
