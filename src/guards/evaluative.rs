use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::textutil::LangCode;

const EVALUATIVE_WORDS_TOML: &str = include_str!("evaluative_words.toml");

#[derive(Debug, Deserialize)]
struct WordsFile {
    #[serde(default)]
    words: HashMap<String, Vec<String>>,
}

static WORDS: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    let file: WordsFile = toml::from_str(EVALUATIVE_WORDS_TOML).expect("built-in evaluative words");
    file.words
        .into_iter()
        .map(|(lang, words)| {
            let words = words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();
            (lang.to_ascii_lowercase(), words)
        })
        .collect()
});

/// Evaluative words from the table that occur in `text`.
#[must_use]
pub fn evaluative_hits(text: &str, lang: LangCode) -> Vec<&'static str> {
    let Some(words) = WORDS.get(lang.code()) else {
        return Vec::new();
    };
    let lowered = text.to_lowercase();
    words
        .iter()
        .filter(|w| lowered.contains(w.as_str()))
        .map(String::as_str)
        .collect()
}

/// Returns the evaluative words of `reference` when `candidate` kept none of them.
///
/// Both texts may be in different languages: a source sentence and its
/// back-translation, or two tone bands of the same translation.
#[must_use]
pub fn dropped_evaluative(
    reference: &str,
    reference_lang: LangCode,
    candidate: &str,
    candidate_lang: LangCode,
) -> Option<Vec<&'static str>> {
    let expected = evaluative_hits(reference, reference_lang);
    if expected.is_empty() {
        return None;
    }
    // No table for the candidate language: nothing to compare against.
    if !WORDS.contains_key(candidate_lang.code()) {
        return None;
    }
    if evaluative_hits(candidate, candidate_lang).is_empty() {
        Some(expected)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dropped_gratitude() {
        let dropped = dropped_evaluative(
            "Thanks, that was amazing!",
            LangCode::En,
            "That happened.",
            LangCode::En,
        );
        let dropped = dropped.expect("dropped words");
        assert!(dropped.contains(&"thank"));
        assert!(dropped.contains(&"amazing"));
    }

    #[test]
    fn kept_evaluative_word_is_fine() {
        assert!(dropped_evaluative(
            "本当に助かりました、ありがとう！",
            LangCode::Ja,
            "Thank you so much, that really helped!",
            LangCode::En,
        )
        .is_none());
    }

    #[test]
    fn neutral_reference_never_flags() {
        assert!(dropped_evaluative("Send it tomorrow.", LangCode::En, "明日送って。", LangCode::Ja).is_none());
    }

    #[test]
    fn unknown_candidate_language_is_ignored() {
        assert!(dropped_evaluative("Thanks!", LangCode::En, "Grazie!", LangCode::It).is_none());
    }
}
