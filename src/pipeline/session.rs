use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineResult;
use crate::ir::{BandId, BandResult, SourceRequest, ToneBandSet};

use super::lock::LockStore;
use super::translator::TonePipeline;

/// The one in-flight source text of a conversation.
///
/// Owns the generation cancellation scope: a new text or language pair, or
/// closing the session, cancels generation for the previous request.
/// Verification already scheduled is never affected.
pub struct TranslationSession {
    pipeline: TonePipeline,
    lock: Option<LockStore>,
    current: Option<(SourceRequest, CancellationToken)>,
}

impl TranslationSession {
    pub fn new(pipeline: TonePipeline, lock: Option<LockStore>) -> Self {
        Self {
            pipeline,
            lock,
            current: None,
        }
    }

    pub fn pipeline(&self) -> &TonePipeline {
        &self.pipeline
    }

    pub fn current(&self) -> Option<&SourceRequest> {
        self.current.as_ref().map(|(req, _)| req)
    }

    /// Makes `text` the active request and returns its generation scope.
    pub fn submit(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> (SourceRequest, CancellationToken) {
        let request = self.pipeline.new_request(text, source_lang, target_lang);
        if let Some((current, token)) = self.current.as_ref() {
            if *current == request && !token.is_cancelled() {
                return (current.clone(), token.clone());
            }
        }
        self.cancel_current();
        let token = CancellationToken::new();
        self.current = Some((request.clone(), token.clone()));
        (request, token)
    }

    /// Submits `text` and returns the base band, or the locked band when a
    /// position is locked.
    pub async fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> PipelineResult<BandResult> {
        let (request, token) = self.submit(text, source_lang, target_lang);
        let locked = self.lock.as_ref().and_then(LockStore::locked_position);
        if let Some(position) = locked {
            tracing::info!("locked at {}", position.label());
        }
        self.pipeline.translate(&request, locked, &token).await
    }

    pub async fn band(&self, band: &BandId) -> PipelineResult<BandResult> {
        let (request, token) = self.active()?;
        self.pipeline.band(request, band, token).await
    }

    pub async fn all_bands(&self) -> PipelineResult<ToneBandSet> {
        let (request, token) = self.active()?;
        self.pipeline.generate_all(request, token).await
    }

    pub async fn custom(&self, style: &str) -> PipelineResult<BandResult> {
        let (request, token) = self.active()?;
        self.pipeline.custom_band(request, style, token).await
    }

    pub fn close(&mut self) {
        self.cancel_current();
    }

    fn active(&self) -> PipelineResult<(&SourceRequest, &CancellationToken)> {
        self.current
            .as_ref()
            .map(|(req, token)| (req, token))
            .ok_or_else(|| anyhow!("no source text submitted").into())
    }

    fn cancel_current(&mut self) {
        if let Some((_, token)) = self.current.take() {
            if !token.is_cancelled() {
                tracing::debug!("cancelling generation for previous source text");
            }
            token.cancel();
        }
    }
}

impl Drop for TranslationSession {
    fn drop(&mut self) {
        self.cancel_current();
    }
}
