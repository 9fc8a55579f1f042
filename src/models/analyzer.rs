use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_ANALYZER_TIMEOUT: Duration = Duration::from_secs(3);

/// Universal part-of-speech classes returned by the tagging service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartOfSpeech {
    Noun,
    Propn,
    Num,
    Pron,
    Verb,
    Adj,
    Adv,
    Aux,
    Adp,
    Det,
    Cconj,
    Sconj,
    Part,
    Punct,
    Intj,
    Sym,
    #[serde(other)]
    X,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default)]
    pub lemma: String,
    #[serde(rename = "upos")]
    pub pos: PartOfSpeech,
    #[serde(default)]
    pub protect: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub protected: usize,
    #[serde(default)]
    pub unprotected: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub summary: AnalysisSummary,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub model: String,
}

impl Analysis {
    /// "No structural constraint available."
    #[must_use]
    pub fn empty(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Black-box structural analysis service.
///
/// Implementations must return `Ok(Analysis::empty(..))` on any failure; only
/// cancellation is reported as an error.
#[async_trait]
pub trait StructuralAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        lang: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Analysis>;
}

/// Used when no analysis endpoint is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAnalyzer;

#[async_trait]
impl StructuralAnalyzer for NullAnalyzer {
    async fn analyze(
        &self,
        _text: &str,
        lang: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Analysis> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(Analysis::empty(lang))
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

#[derive(Clone, Debug)]
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    async fn fetch(&self, text: &str, lang: &str) -> PipelineResult<Analysis> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&WireRequest { text, lang })
            .send()
            .await
            .map_err(|e| PipelineError::StructuralAnalysisUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PipelineError::StructuralAnalysisUnavailable(format!(
                "status {}",
                resp.status()
            )));
        }
        resp.json::<Analysis>()
            .await
            .map_err(|e| PipelineError::StructuralAnalysisUnavailable(e.to_string()))
    }
}

#[async_trait]
impl StructuralAnalyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        lang: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Analysis> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            out = tokio::time::timeout(self.timeout, self.fetch(text, lang)) => out,
        };
        match outcome {
            Ok(Ok(analysis)) => Ok(analysis),
            Ok(Err(e)) => {
                tracing::debug!("structural analysis degraded to empty: {e}");
                Ok(Analysis::empty(lang))
            }
            Err(_) => {
                tracing::debug!(
                    "structural analysis timed out after {:?}; continuing without structure",
                    self.timeout
                );
                Ok(Analysis::empty(lang))
            }
        }
    }
}
