use std::collections::BTreeMap;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineResult;
use crate::ir::{CacheKey, SourceRequest};
use crate::models::{Analysis, CompletionRequest, PartOfSpeech, Stage, Token};

use super::caller::ModelCaller;
use super::config::ModelSettings;
use super::prompts::{render_template, PromptSet};

/// How much freedom a tone edit has over one word of the base translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordClass {
    /// Must survive verbatim.
    Fixed,
    /// May be reworded but must keep its anchored meaning.
    Flexible,
    Free,
}

#[must_use]
pub fn classify_token(token: &Token) -> WordClass {
    if token.protect {
        return WordClass::Fixed;
    }
    match token.pos {
        PartOfSpeech::Noun | PartOfSpeech::Propn | PartOfSpeech::Num | PartOfSpeech::Pron => {
            WordClass::Fixed
        }
        PartOfSpeech::Verb | PartOfSpeech::Adj | PartOfSpeech::Adv | PartOfSpeech::Aux => {
            WordClass::Flexible
        }
        _ => WordClass::Free,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WordClasses {
    pub fixed: Vec<String>,
    pub flexible: Vec<String>,
    pub free: Vec<String>,
}

impl WordClasses {
    #[must_use]
    pub fn from_analysis(analysis: &Analysis) -> Self {
        let mut out = Self::default();
        for token in &analysis.tokens {
            if matches!(token.pos, PartOfSpeech::Punct | PartOfSpeech::Sym) && !token.protect {
                continue;
            }
            let word = token.text.trim();
            if word.is_empty() {
                continue;
            }
            let bucket = match classify_token(token) {
                WordClass::Fixed => &mut out.fixed,
                WordClass::Flexible => &mut out.flexible,
                WordClass::Free => &mut out.free,
            };
            if !bucket.iter().any(|w| w == word) {
                bucket.push(word.to_string());
            }
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.flexible.is_empty() && self.free.is_empty()
    }

    #[must_use]
    pub fn render(words: &[String]) -> String {
        if words.is_empty() {
            "(none)".to_string()
        } else {
            words.join(", ")
        }
    }
}

/// Word -> in-context definition for the flexible words of a base translation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeaningAnchors(BTreeMap<String, String>);

impl MeaningAnchors {
    #[must_use]
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, word: &str) -> Option<&str> {
        self.0.get(word).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn render_for_prompt(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        out.push_str("MEANING ANCHORS (each word must keep this meaning):\n");
        for (word, def) in &self.0 {
            out.push_str("- ");
            out.push_str(word);
            out.push_str(": ");
            out.push_str(def.trim());
            out.push('\n');
        }
        out
    }
}

/// Analysis of the base translation plus everything derived from it.
#[derive(Clone, Debug, Default)]
pub struct StructureContext {
    pub analysis: Analysis,
    pub classes: WordClasses,
    pub anchors: MeaningAnchors,
}

#[derive(Deserialize)]
struct AnchorReply {
    #[serde(default)]
    anchors: BTreeMap<String, serde_json::Value>,
}

/// One call asking for definitions of `words`. Any failure other than
/// cancellation yields empty anchors.
#[allow(clippy::too_many_arguments)]
pub async fn build_anchors(
    caller: &ModelCaller,
    prompts: &PromptSet,
    settings: &ModelSettings,
    request: &SourceRequest,
    key: &CacheKey,
    translation: &str,
    words: &[String],
    cancel: &CancellationToken,
) -> PipelineResult<MeaningAnchors> {
    if words.is_empty() {
        return Ok(MeaningAnchors::default());
    }
    let words_list = words
        .iter()
        .map(|w| format!("- {w}"))
        .collect::<Vec<_>>()
        .join("\n");
    let user_prompt = render_template(
        &prompts.anchors,
        &[
            ("source_lang", request.source_lang.as_str()),
            ("target_lang", request.target_lang.as_str()),
            ("source", request.text.as_str()),
            ("translation", translation),
            ("words", words_list.as_str()),
        ],
    );
    let call = CompletionRequest {
        stage: Stage::Anchors,
        model: settings.generation_model.clone(),
        system_prompt: prompts.system.clone(),
        user_prompt,
        temperature: settings.anchors_temperature,
        max_output_tokens: settings.max_output_tokens,
    };

    match caller.call_json::<AnchorReply>(key, &call, cancel).await {
        Ok(reply) => {
            let map = reply
                .anchors
                .into_iter()
                .filter_map(|(word, def)| {
                    let def = match def {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => return None,
                        other => other.to_string(),
                    };
                    let word = word.trim().to_string();
                    (!word.is_empty() && !def.trim().is_empty()).then_some((word, def))
                })
                .collect();
            Ok(MeaningAnchors::new(map))
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            tracing::warn!("meaning anchors unavailable: {e}");
            Ok(MeaningAnchors::default())
        }
    }
}
