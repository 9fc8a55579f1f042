use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

static REASONING_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(think|thinking|reasoning)>.*?</(think|thinking|reasoning)>")
        .expect("reasoning block regex")
});
static REASONING_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(think|thinking|reasoning)>").expect("reasoning tag regex")
});

/// What a completion call is for; drives tracing and test scripting only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Base,
    Anchors,
    Partial,
    FullSimple,
    Custom,
    Verify,
    FixMeaning,
    FixNaturalness,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Anchors => "anchors",
            Self::Partial => "partial",
            Self::FullSimple => "full_simple",
            Self::Custom => "custom",
            Self::Verify => "verify",
            Self::FixMeaning => "fix_meaning",
            Self::FixNaturalness => "fix_naturalness",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

/// Black-box text completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    user_prompt: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default)]
struct WireError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    async fn send(&self, request: &CompletionRequest) -> PipelineResult<String> {
        let body = WireRequest {
            model: &request.model,
            system_prompt: &request.system_prompt,
            user_prompt: &request.user_prompt,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let parsed: WireError = serde_json::from_str(&text).unwrap_or_default();
            let message = parsed
                .error
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            let details = parsed.details.map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            return Err(PipelineError::Backend {
                status: status.as_u16(),
                message,
                details,
            });
        }

        let parsed: WireResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(format!("completion body: {e}")))?;
        Ok(strip_reasoning(&parsed.content))
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            out = self.send(request) => out,
        }
    }
}

/// Removes reasoning wrappers some models emit even when told not to reason.
#[must_use]
pub fn strip_reasoning(text: &str) -> String {
    let without_blocks = REASONING_BLOCK_RE.replace_all(text, "");
    REASONING_TAG_RE
        .replace_all(&without_blocks, "")
        .trim()
        .to_string()
}
