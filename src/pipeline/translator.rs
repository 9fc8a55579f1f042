use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::guards::{apply_text_guards, check_modality, ModalityClassifier, RuleTableClassifier};
use crate::ir::{
    BandId, BandResult, BandStatus, CacheKey, Level, Risk, SourceRequest, Tone, ToneBandSet,
    TonePosition,
};
use crate::models::{
    CompletionBackend, CompletionRequest, HttpAnalyzer, HttpCompletionClient, NullAnalyzer, Stage,
    StructuralAnalyzer,
};
use crate::textutil::{clip, has_letters, LangCode};

use super::anchors::{build_anchors, StructureContext, WordClasses};
use super::cache::{BandCache, BandText, CacheEvent, CacheWrite};
use super::caller::ModelCaller;
use super::config::{ModelSettings, PipelineConfig};
use super::prompts::{render_template, tone_instruction, PromptSet, NATIVE_RULE_TEXT};
use super::status::{StatusBoard, StatusEvent};
use super::trace::TraceWriter;
use super::verify::{links_for, Verifier, VerifyJob};

/// Collaborators and settings a [`TonePipeline`] is assembled from.
pub struct PipelineParts {
    pub backend: Arc<dyn CompletionBackend>,
    pub analyzer: Arc<dyn StructuralAnalyzer>,
    pub classifier: Arc<dyn ModalityClassifier>,
    pub prompts: PromptSet,
    pub settings: ModelSettings,
    pub trace: TraceWriter,
    pub prompt_version: String,
    pub native_mode: bool,
}

impl PipelineParts {
    /// Built-in prompts, rule tables and settings; no structural analysis.
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            analyzer: Arc::new(NullAnalyzer),
            classifier: Arc::new(RuleTableClassifier::builtin()),
            prompts: PromptSet::default(),
            settings: ModelSettings::default(),
            trace: TraceWriter::disabled(),
            prompt_version: super::config::DEFAULT_PROMPT_VERSION.to_string(),
            native_mode: false,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let backend = HttpCompletionClient::new(
            cfg.completion_endpoint.clone(),
            cfg.api_key(),
            cfg.request_timeout,
        )?;
        let analyzer: Arc<dyn StructuralAnalyzer> = match cfg.analyzer_endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpAnalyzer::new(endpoint, cfg.analyzer_timeout)?),
            None => Arc::new(NullAnalyzer),
        };
        let trace = match TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("prompt trace disabled: {e:#}");
                TraceWriter::disabled()
            }
        };
        Ok(Self {
            backend: Arc::new(backend),
            analyzer,
            classifier: Arc::new(RuleTableClassifier::builtin()),
            prompts: cfg.prompts.clone(),
            settings: cfg.models.clone(),
            trace,
            prompt_version: cfg.prompt_version.clone(),
            native_mode: cfg.native_mode,
        })
    }
}

#[derive(Deserialize)]
struct GenerationReply {
    #[serde(default)]
    translation: String,
    #[serde(default)]
    reverse_translation: String,
    #[serde(default)]
    risk: Risk,
    #[serde(default)]
    detected_language: Option<String>,
}

type StructureMemo = HashMap<(CacheKey, String), Arc<StructureContext>>;

struct Inner {
    caller: ModelCaller,
    analyzer: Arc<dyn StructuralAnalyzer>,
    classifier: Arc<dyn ModalityClassifier>,
    prompts: Arc<PromptSet>,
    settings: Arc<ModelSettings>,
    cache: Arc<BandCache>,
    status: Arc<StatusBoard>,
    verifier: Verifier,
    structures: Mutex<StructureMemo>,
    prompt_version: String,
    native_mode: bool,
}

/// The tone-band generator. Cheap to clone; clones share cache and verifier.
#[derive(Clone)]
pub struct TonePipeline {
    inner: Arc<Inner>,
}

impl TonePipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let caller = ModelCaller::new(parts.backend, Arc::new(parts.trace));
        let prompts = Arc::new(parts.prompts);
        let settings = Arc::new(parts.settings);
        let cache = Arc::new(BandCache::new());
        let status = Arc::new(StatusBoard::new());
        let verifier = Verifier::new(
            caller.clone(),
            prompts.clone(),
            settings.clone(),
            parts.classifier.clone(),
            cache.clone(),
            status.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                caller,
                analyzer: parts.analyzer,
                classifier: parts.classifier,
                prompts,
                settings,
                cache,
                status,
                verifier,
                structures: Mutex::new(HashMap::new()),
                prompt_version: parts.prompt_version,
                native_mode: parts.native_mode,
            }),
        }
    }

    /// A request stamped with the configured prompt version and native mode.
    pub fn new_request(
        &self,
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> SourceRequest {
        SourceRequest::new(text, source_lang, target_lang, self.inner.prompt_version.clone())
            .with_native_mode(self.inner.native_mode)
    }

    pub fn cache(&self) -> &BandCache {
        &self.inner.cache
    }

    pub fn cached(&self, request: &SourceRequest, band: &BandId) -> Option<BandResult> {
        let key = CacheKey::for_band(request, band);
        let entry = self.inner.cache.get(&key)?;
        Some(BandResult::from_entry(band.clone(), key, entry))
    }

    pub fn status_of(&self, key: &CacheKey) -> BandStatus {
        self.inner.status.get(key)
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.cache.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.status.subscribe()
    }

    pub async fn wait_for_verification(&self) {
        self.inner.verifier.wait_idle().await;
    }

    pub fn shutdown(&self) {
        self.inner.verifier.shutdown();
    }

    /// The base band, or every band when a position is locked.
    pub async fn translate(
        &self,
        request: &SourceRequest,
        locked: Option<TonePosition>,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        match locked {
            None => self.base_band(request, cancel).await,
            Some(position) => {
                let set = self.generate_all(request, cancel).await?;
                Ok(set.get(position).clone())
            }
        }
    }

    /// Base, then both 50 bands together, then both 100 bands together.
    pub async fn generate_all(
        &self,
        request: &SourceRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<ToneBandSet> {
        let base = self.base_band(request, cancel).await?;
        self.structure_for(request, &base, cancel).await?;

        let casual_50 = BandId::toned(Tone::Casual, Level::Fifty);
        let business_50 = BandId::toned(Tone::Business, Level::Fifty);
        let (casual, polite) = tokio::join!(
            self.toned_with(request, &casual_50, &base, &base, cancel),
            self.toned_with(request, &business_50, &base, &base, cancel),
        );
        let (casual, polite) = (casual?, polite?);

        let casual_100 = BandId::toned(Tone::Casual, Level::Hundred);
        let business_100 = BandId::toned(Tone::Business, Level::Hundred);
        let (more_casual, more_polite) = tokio::join!(
            self.toned_with(request, &casual_100, &casual, &base, cancel),
            self.toned_with(request, &business_100, &polite, &base, cancel),
        );

        Ok(ToneBandSet {
            more_casual: more_casual?,
            casual,
            base,
            polite,
            more_polite: more_polite?,
        })
    }

    /// Any single band, generating its references first when needed.
    pub async fn band(
        &self,
        request: &SourceRequest,
        band: &BandId,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        match band.tone {
            Tone::Base => return self.base_band(request, cancel).await,
            Tone::Custom => {
                let style = band.custom_style.as_deref().unwrap_or_default();
                return self.custom_band(request, style, cancel).await;
            }
            Tone::Casual | Tone::Business => {}
        }
        if let Some(hit) = self.cached(request, band) {
            tracing::debug!(band = %band, "cache hit");
            return Ok(hit);
        }

        let base = self.base_band(request, cancel).await?;
        let reference = match band.level {
            Level::Hundred => {
                let fifty = BandId::toned(band.tone, Level::Fifty);
                self.toned_with(request, &fifty, &base, &base, cancel).await?
            }
            _ => base.clone(),
        };
        self.toned_with(request, band, &reference, &base, cancel)
            .await
    }

    pub async fn base_band(
        &self,
        request: &SourceRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        let band = BandId::base();
        if let Some(hit) = self.cached(request, &band) {
            tracing::debug!(band = %band, "cache hit");
            return Ok(hit);
        }
        let key = CacheKey::for_band(request, &band);
        tracing::info!(
            "base: {} -> {}: {}",
            request.source_lang,
            request.target_lang,
            clip(&request.text, 60)
        );

        let native_rule = native_rule(request);
        let user_prompt = render_template(
            &self.inner.prompts.base,
            &[
                ("source_lang", request.source_lang.as_str()),
                ("target_lang", request.target_lang.as_str()),
                ("source", request.text.as_str()),
                ("native_rule", native_rule),
            ],
        );
        let reply = self
            .generate(
                &key,
                Stage::Base,
                user_prompt,
                self.inner.settings.base_temperature,
                cancel,
            )
            .await?;
        if let Some(lang) = reply.detected_language.as_deref() {
            tracing::debug!(detected = lang, "source language");
        }
        let text = self.guarded(request, &band, reply, None)?;

        let write = self.commit(request, &band, &key, text, cancel)?;
        self.after_write(request, &band, &key, &write, &Default::default());
        Ok(BandResult::from_entry(band, key, write.entry))
    }

    /// One style-described band shared by every level of the custom tone.
    pub async fn custom_band(
        &self,
        request: &SourceRequest,
        style: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        let band = BandId::custom(style.trim());
        if let Some(hit) = self.cached(request, &band) {
            tracing::debug!(band = %band, "cache hit");
            return Ok(hit);
        }
        let key = CacheKey::for_band(request, &band);
        let base = self.base_band(request, cancel).await?;

        let native_rule = native_rule(request);
        let style_text = tone_instruction(&band);
        let user_prompt = render_template(
            &self.inner.prompts.custom,
            &[
                ("source_lang", request.source_lang.as_str()),
                ("target_lang", request.target_lang.as_str()),
                ("source", request.text.as_str()),
                ("native_rule", native_rule),
                ("style", style_text.as_str()),
                ("reference", base.translation.as_str()),
            ],
        );
        let generated = match self
            .generate(
                &key,
                Stage::Custom,
                user_prompt,
                self.inner.settings.custom_temperature,
                cancel,
            )
            .await
        {
            Ok(reply) => self.guarded(request, &band, reply, Some(&base.translation)),
            Err(e) => Err(e),
        };
        let text = match generated {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(band = %band, "custom generation failed, showing base: {e}");
                return Ok(BandResult::degraded_from(&base, band, key));
            }
        };

        let write = self.commit(request, &band, &key, text, cancel)?;
        self.after_write(request, &band, &key, &write, &Default::default());
        Ok(BandResult::from_entry(band, key, write.entry))
    }

    /// Analysis and meaning anchors of the base translation, computed once.
    pub async fn structure_for(
        &self,
        request: &SourceRequest,
        base: &BandResult,
        cancel: &CancellationToken,
    ) -> PipelineResult<Arc<StructureContext>> {
        let memo_key = (base.key.clone(), base.translation.clone());
        let mut memo = self.inner.structures.lock().await;
        if let Some(ctx) = memo.get(&memo_key) {
            return Ok(ctx.clone());
        }

        let target = LangCode::parse(&request.target_lang);
        let analysis = self
            .inner
            .analyzer
            .analyze(&base.translation, target.code(), cancel)
            .await?;
        let classes = WordClasses::from_analysis(&analysis);
        let anchors = build_anchors(
            &self.inner.caller,
            &self.inner.prompts,
            &self.inner.settings,
            request,
            &base.key,
            &base.translation,
            &classes.flexible,
            cancel,
        )
        .await?;
        tracing::info!(
            fixed = classes.fixed.len(),
            flexible = classes.flexible.len(),
            free = classes.free.len(),
            anchors = anchors.len(),
            "structure ready"
        );

        let ctx = Arc::new(StructureContext {
            analysis,
            classes,
            anchors,
        });
        memo.insert(memo_key, ctx.clone());
        Ok(ctx)
    }

    /// Cached result or a fresh generation against `reference`. Failures other
    /// than cancellation degrade to `reference` and are not cached.
    async fn toned_with(
        &self,
        request: &SourceRequest,
        band: &BandId,
        reference: &BandResult,
        base: &BandResult,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        if let Some(hit) = self.cached(request, band) {
            tracing::debug!(band = %band, "cache hit");
            return Ok(hit);
        }
        let key = CacheKey::for_band(request, band);
        let structure = self.structure_for(request, base, cancel).await?;

        match self
            .generate_toned(request, band, &key, reference, base, &structure, cancel)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(
                    band = %band,
                    "generation failed, showing {}: {e}",
                    reference.band
                );
                Ok(BandResult::degraded_from(reference, band.clone(), key))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_toned(
        &self,
        request: &SourceRequest,
        band: &BandId,
        key: &CacheKey,
        reference: &BandResult,
        base: &BandResult,
        structure: &StructureContext,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandResult> {
        tracing::info!(band = %band, "partial generation");
        let mut text = self
            .partial(request, band, key, reference, structure, cancel)
            .await?;

        if text.translation == reference.translation {
            tracing::info!(band = %band, "no movement from {}; full-simple retry", reference.band);
            match self
                .full_simple(request, band, key, reference, structure, cancel)
                .await
            {
                Ok(retry) => text = retry,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => tracing::warn!(band = %band, "full-simple retry failed: {e}"),
            }
        }

        let source_lang = LangCode::parse(&request.source_lang);
        let target_lang = LangCode::parse(&request.target_lang);
        let check = check_modality(
            self.inner.classifier.as_ref(),
            &request.text,
            source_lang,
            &text.translation,
            target_lang,
        );
        if check.violated() {
            tracing::warn!(
                band = %band,
                "mood drift: {} became {}",
                check.source.as_str(),
                check.candidate.as_str()
            );
            text = match self.modality_fallback(request, band, reference, base) {
                Some(fallback) => fallback,
                None => {
                    let mut retry = self
                        .full_simple(request, band, key, reference, structure, cancel)
                        .await?;
                    let recheck = check_modality(
                        self.inner.classifier.as_ref(),
                        &request.text,
                        source_lang,
                        &retry.translation,
                        target_lang,
                    );
                    if recheck.violated() {
                        tracing::warn!(band = %band, "mood still drifted after regeneration");
                        retry.risk = Risk::High;
                    }
                    retry
                }
            };
        }

        let write = self.commit(request, band, key, text, cancel)?;
        self.after_write(request, band, key, &write, structure);
        Ok(BandResult::from_entry(band.clone(), key.clone(), write.entry))
    }

    /// Nearest generated band whose mood matches the source, without a call.
    fn modality_fallback(
        &self,
        request: &SourceRequest,
        band: &BandId,
        reference: &BandResult,
        base: &BandResult,
    ) -> Option<BandText> {
        let source_lang = LangCode::parse(&request.source_lang);
        let target_lang = LangCode::parse(&request.target_lang);
        let mut candidates = vec![reference];
        if band.level == Level::Hundred {
            candidates.push(base);
        }
        candidates
            .into_iter()
            .filter(|c| !c.degraded)
            .find(|c| {
                !check_modality(
                    self.inner.classifier.as_ref(),
                    &request.text,
                    source_lang,
                    &c.translation,
                    target_lang,
                )
                .violated()
            })
            .map(|c| {
                tracing::info!(band = %band, "falling back to {}", c.band);
                BandText {
                    translation: c.translation.clone(),
                    reverse_translation: c.reverse_translation.clone(),
                    risk: c.risk,
                }
            })
    }

    async fn partial(
        &self,
        request: &SourceRequest,
        band: &BandId,
        key: &CacheKey,
        reference: &BandResult,
        structure: &StructureContext,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandText> {
        let tone = tone_instruction(band);
        let classes = &structure.classes;
        let fixed = WordClasses::render(&classes.fixed);
        let flexible = WordClasses::render(&classes.flexible);
        let free = WordClasses::render(&classes.free);
        let anchors = structure.anchors.render_for_prompt();
        let user_prompt = render_template(
            &self.inner.prompts.partial,
            &[
                ("source_lang", request.source_lang.as_str()),
                ("target_lang", request.target_lang.as_str()),
                ("source", request.text.as_str()),
                ("native_rule", native_rule(request)),
                ("tone_instruction", tone.as_str()),
                ("fixed_words", fixed.as_str()),
                ("flexible_words", flexible.as_str()),
                ("free_words", free.as_str()),
                ("anchors", anchors.as_str()),
                ("reference", reference.translation.as_str()),
            ],
        );
        let reply = self
            .generate(
                key,
                Stage::Partial,
                user_prompt,
                self.inner.settings.partial_temperature,
                cancel,
            )
            .await?;
        self.guarded(request, band, reply, Some(&reference.translation))
    }

    /// Whole-sentence regeneration constrained only by meaning anchors, with
    /// `reference` as the floor to go past.
    async fn full_simple(
        &self,
        request: &SourceRequest,
        band: &BandId,
        key: &CacheKey,
        reference: &BandResult,
        structure: &StructureContext,
        cancel: &CancellationToken,
    ) -> PipelineResult<BandText> {
        let tone = tone_instruction(band);
        let anchors = structure.anchors.render_for_prompt();
        let user_prompt = render_template(
            &self.inner.prompts.full_simple,
            &[
                ("source_lang", request.source_lang.as_str()),
                ("target_lang", request.target_lang.as_str()),
                ("source", request.text.as_str()),
                ("native_rule", native_rule(request)),
                ("tone_instruction", tone.as_str()),
                ("anchors", anchors.as_str()),
                ("reference", reference.translation.as_str()),
            ],
        );
        let reply = self
            .generate(
                key,
                Stage::FullSimple,
                user_prompt,
                self.inner.settings.full_simple_temperature,
                cancel,
            )
            .await?;
        self.guarded(request, band, reply, Some(&reference.translation))
    }

    async fn generate(
        &self,
        key: &CacheKey,
        stage: Stage,
        user_prompt: String,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> PipelineResult<GenerationReply> {
        let call = CompletionRequest {
            stage,
            model: self.inner.settings.generation_model.clone(),
            system_prompt: self.inner.prompts.system.clone(),
            user_prompt,
            temperature,
            max_output_tokens: self.inner.settings.max_output_tokens,
        };
        self.inner.caller.call_json(key, &call, cancel).await
    }

    fn guarded(
        &self,
        request: &SourceRequest,
        band: &BandId,
        reply: GenerationReply,
        reference: Option<&str>,
    ) -> PipelineResult<BandText> {
        if reply.translation.trim().is_empty() {
            return Err(PipelineError::MalformedResponse(format!(
                "{band}: empty translation"
            )));
        }
        let guarded = apply_text_guards(
            &request.text,
            LangCode::parse(&request.source_lang),
            LangCode::parse(&request.target_lang),
            reply.translation.trim(),
            &reply.reverse_translation,
            reply.risk,
            reference,
        );
        if !guarded.flags.is_empty() {
            tracing::debug!(band = %band, flags = ?guarded.flags, "guards");
        }
        if !has_letters(&guarded.translation) {
            return Err(PipelineError::MalformedResponse(format!(
                "{band}: nothing left after script cleanup"
            )));
        }
        Ok(BandText {
            translation: guarded.translation,
            reverse_translation: guarded.reverse_translation,
            risk: guarded.risk,
        })
    }

    /// Writes `text` unless the generation scope was cancelled meanwhile.
    fn commit(
        &self,
        request: &SourceRequest,
        band: &BandId,
        key: &CacheKey,
        text: BandText,
        cancel: &CancellationToken,
    ) -> PipelineResult<CacheWrite> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(self
            .inner
            .cache
            .write_band(key, text, &links_for(request, band)))
    }

    fn after_write(
        &self,
        request: &SourceRequest,
        band: &BandId,
        key: &CacheKey,
        write: &CacheWrite,
        structure: &StructureContext,
    ) {
        if !write.entry.no_change {
            self.inner.verifier.schedule(VerifyJob {
                request: request.clone(),
                band: band.clone(),
                key: key.clone(),
                anchors: structure.anchors.clone(),
            });
        }
        for released in &write.released {
            let Some(dep) = band
                .dependents()
                .into_iter()
                .find(|b| CacheKey::for_band(request, b) == *released)
            else {
                continue;
            };
            self.inner.verifier.schedule(VerifyJob {
                request: request.clone(),
                band: dep,
                key: released.clone(),
                anchors: structure.anchors.clone(),
            });
        }
    }
}

fn native_rule(request: &SourceRequest) -> &'static str {
    if request.native_mode {
        NATIVE_RULE_TEXT
    } else {
        ""
    }
}
