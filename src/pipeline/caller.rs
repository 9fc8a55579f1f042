use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineResult;
use crate::ir::CacheKey;
use crate::models::{parse_json_response, CompletionBackend, CompletionRequest};

use super::trace::TraceWriter;

/// Completion backend plus prompt tracing, shared by generation and verification.
#[derive(Clone)]
pub struct ModelCaller {
    backend: Arc<dyn CompletionBackend>,
    trace: Arc<TraceWriter>,
}

impl ModelCaller {
    pub fn new(backend: Arc<dyn CompletionBackend>, trace: Arc<TraceWriter>) -> Self {
        Self { backend, trace }
    }

    pub async fn call_text(
        &self,
        key: &CacheKey,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        if let Err(e) = self
            .trace
            .write_call(key, request.stage, "prompt", &request.user_prompt)
        {
            tracing::debug!("trace write failed: {e:#}");
        }
        let text = self.backend.complete(request, cancel).await?;
        if let Err(e) = self.trace.write_call(key, request.stage, "response", &text) {
            tracing::debug!("trace write failed: {e:#}");
        }
        Ok(text)
    }

    pub async fn call_json<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<T> {
        let text = self.call_text(key, request, cancel).await?;
        parse_json_response(&text)
    }
}
