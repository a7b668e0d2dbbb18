//! HTTP client shared by every agent of one provider.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::Provider;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_BETA: &str = "prompt-caching-2024-07-31";

/// Request timeout; the retry policy handles what exceeds it.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// How long to keep retrying transient API failures.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            pause: Duration::from_secs(40),
        }
    }
}

/// A non-success HTTP response that was not retried (or ran out of retries).
#[derive(Debug, thiserror::Error)]
#[error("API returned {status}: {body}")]
pub(crate) struct ApiFailure {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    AnthropicKey(String),
}

/// One provider's connection pool, credentials and retry rules.
#[derive(Debug)]
pub(crate) struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
    retry: RetryPolicy,
    retry_statuses: &'static [u16],
}

impl ChatClient {
    pub fn for_provider(provider: Provider, api_key: String, retry: RetryPolicy) -> Result<Self> {
        let (base_url, auth, retry_statuses): (&str, Auth, &'static [u16]) = match provider {
            Provider::OpenAi => (OPENAI_BASE_URL, Auth::Bearer(api_key), &[429]),
            Provider::Together => (TOGETHER_BASE_URL, Auth::Bearer(api_key), &[429]),
            Provider::Anthropic => (
                ANTHROPIC_BASE_URL,
                Auth::AnthropicKey(api_key),
                &[429, 500, 529],
            ),
            Provider::Human => anyhow::bail!("The human agent does not use an API client"),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            auth,
            retry,
            retry_statuses,
        })
    }

    /// Point the client at another endpoint.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    ///
    /// Timeouts and the provider's transient statuses are retried per the
    /// policy. Other non-success responses surface as `ApiFailure`.
    #[allow(tail_expr_drop_order)] // Drop order changes are harmless for HTTP responses
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt = 0;

        loop {
            attempt += 1;
            let exhausted = attempt >= self.retry.max_attempts;

            let response = match self.request(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() && !exhausted => {
                    warn!(attempt, error = %e, "API request timed out, retrying");
                    tokio::time::sleep(self.retry.pause).await;
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Request to {url} failed"));
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                debug!(status, attempt, "API request succeeded");
                return response
                    .json::<R>()
                    .await
                    .with_context(|| format!("Failed to decode response from {url}"));
            }

            let body = response.text().await.unwrap_or_default();
            if self.retry_statuses.contains(&status) && !exhausted {
                warn!(status, attempt, "Transient API error, retrying");
                tokio::time::sleep(self.retry.pause).await;
                continue;
            }

            if exhausted {
                warn!(status, attempt, "Giving up after {attempt} attempts");
            }
            return Err(ApiFailure { status, body }.into());
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(url);
        match &self.auth {
            Auth::Bearer(key) => builder.bearer_auth(key),
            Auth::AnthropicKey(key) => builder
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("anthropic-beta", ANTHROPIC_BETA),
        }
    }
}

/// Find an `ApiFailure` anywhere in the chain.
pub(crate) fn api_failure(err: &anyhow::Error) -> Option<&ApiFailure> {
    err.chain().find_map(|cause| cause.downcast_ref::<ApiFailure>())
}
