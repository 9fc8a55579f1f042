use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Analysis, CompletionBackend, CompletionRequest, PartOfSpeech, Stage, StructuralAnalyzer,
    Token,
};

type Script = Box<dyn Fn(&CompletionRequest) -> PipelineResult<String> + Send + Sync>;

/// In-process completion backend answering from a closure and recording calls.
pub(crate) struct ScriptedBackend {
    script: Script,
    calls: Mutex<Vec<(Stage, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new(
        script: impl Fn(&CompletionRequest) -> PipelineResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn count(&self, stage: Stage) -> usize {
        let calls = self.calls.lock().expect("calls");
        calls.iter().filter(|(s, _)| *s == stage).count()
    }

    pub(crate) fn total(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }

    pub(crate) fn prompts(&self, stage: Stage) -> Vec<String> {
        let calls = self.calls.lock().expect("calls");
        calls
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<String> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.calls
            .lock()
            .expect("calls")
            .push((request.stage, request.user_prompt.clone()));
        (self.script)(request)
    }
}

/// Generation-shaped JSON reply.
pub(crate) fn reply(translation: &str, reverse: &str) -> String {
    serde_json::json!({
        "translation": translation,
        "reverse_translation": reverse,
        "risk": "low",
    })
    .to_string()
}

/// Structural analyzer returning the same tagged tokens for every text.
pub(crate) struct TaggedAnalyzer {
    tokens: Vec<Token>,
    calls: Mutex<Vec<String>>,
}

impl TaggedAnalyzer {
    pub(crate) fn new(tokens: &[(&str, PartOfSpeech)]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(text, pos)| Token {
                    text: (*text).to_string(),
                    lemma: (*text).to_string(),
                    pos: *pos,
                    protect: false,
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Texts analyzed so far, in call order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl StructuralAnalyzer for TaggedAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        lang: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Analysis> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.calls.lock().expect("calls").push(text.to_string());
        Ok(Analysis {
            tokens: self.tokens.clone(),
            lang: lang.to_string(),
            ..Analysis::default()
        })
    }
}
