//! Deterministic checks applied to every generated translation.
//!
//! Guards never fail: they repair what they can and report risk.

mod evaluative;
mod modality;
mod purity;

pub use evaluative::{dropped_evaluative, evaluative_hits};
pub use modality::{
    check_modality, ModalityCheck, ModalityClass, ModalityClassifier, RuleTableClassifier,
};
pub use purity::{
    check_reverse_purity, cleanup_double_endings, enforce_target_purity, reverse_lacks_japanese,
};

use crate::ir::Risk;
use crate::textutil::LangCode;

/// A translation/back-translation pair after the purity and evaluative guards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedText {
    pub translation: String,
    pub reverse_translation: String,
    pub risk: Risk,
    pub flags: Vec<String>,
}

/// Runs the language-purity, reverse-purity and evaluative-word guards.
///
/// `reference` is the text the candidate was derived from (the base or a lower
/// band, in the target language); `None` for the base band itself.
#[must_use]
pub fn apply_text_guards(
    source_text: &str,
    source_lang: LangCode,
    target_lang: LangCode,
    translation: &str,
    reverse_translation: &str,
    model_risk: Risk,
    reference: Option<&str>,
) -> GuardedText {
    let mut risk = model_risk;
    let mut flags = Vec::new();

    let purity = enforce_target_purity(translation, target_lang);
    if purity.stripped {
        risk = Risk::High;
        flags.push("target_script_stripped".to_string());
    }

    let reverse = check_reverse_purity(reverse_translation, source_lang);
    if reverse.wrong_language {
        risk = Risk::High;
        flags.push("reverse_not_in_source_language".to_string());
    }
    if reverse_lacks_japanese(&reverse.text, target_lang) {
        risk = Risk::High;
        flags.push("reverse_without_japanese".to_string());
    }

    if let Some(words) =
        dropped_evaluative(source_text, source_lang, &reverse.text, source_lang)
    {
        risk = Risk::High;
        flags.push(format!("evaluative_dropped_in_reverse:{}", words.join(",")));
    }
    if let Some(reference) = reference {
        if let Some(words) =
            dropped_evaluative(reference, target_lang, &purity.text, target_lang)
        {
            risk = Risk::High;
            flags.push(format!("evaluative_dropped:{}", words.join(",")));
        }
    }

    GuardedText {
        translation: purity.text,
        reverse_translation: reverse.text,
        risk,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_target_with_kana_is_stripped_and_high_risk() {
        let g = apply_text_guards(
            "ちょっと手伝ってくれる?",
            LangCode::parse("日本語"),
            LangCode::parse("英語"),
            "Can you help me ちょっと?",
            "ちょっと手伝ってくれる？",
            Risk::Low,
            None,
        );
        assert_eq!(g.translation, "Can you help me?");
        assert_eq!(g.risk, Risk::High);
        assert!(g.flags.iter().any(|f| f == "target_script_stripped"));
    }

    #[test]
    fn japanese_reverse_without_japanese_is_high_risk() {
        let g = apply_text_guards(
            "Can you send it tomorrow?",
            LangCode::En,
            LangCode::parse("日本語"),
            "明日送ってくれる？",
            "Can you send it tomorrow?",
            Risk::Low,
            None,
        );
        assert_eq!(g.risk, Risk::High);
        assert!(g.flags.iter().any(|f| f == "reverse_without_japanese"));
        assert!(!g.flags.iter().any(|f| f == "reverse_not_in_source_language"));

        let g = apply_text_guards(
            "Can you send it tomorrow?",
            LangCode::En,
            LangCode::parse("日本語"),
            "明日送ってくれる？",
            "明日送ってくれる？ (Can you send it tomorrow?)",
            Risk::Low,
            None,
        );
        assert!(!g.flags.iter().any(|f| f == "reverse_without_japanese"));

        let g = apply_text_guards(
            "明日送ってくれる？",
            LangCode::parse("日本語"),
            LangCode::En,
            "Can you send it tomorrow?",
            "Can you send it tomorrow?",
            Risk::Low,
            None,
        );
        assert_eq!(g.risk, Risk::High);
        assert!(g.flags.iter().any(|f| f == "reverse_not_in_source_language"));
    }

    #[test]
    fn clean_pair_keeps_model_risk() {
        let g = apply_text_guards(
            "明日送ってくれる？",
            LangCode::Ja,
            LangCode::En,
            "Can you send it tomorrow?",
            "明日送ってくれる？",
            Risk::Medium,
            Some("Could you send it tomorrow?"),
        );
        assert_eq!(g.risk, Risk::Medium);
        assert!(g.flags.is_empty());
    }

    #[test]
    fn dropping_thanks_from_reference_is_flagged() {
        let g = apply_text_guards(
            "ありがとう、明日送って。",
            LangCode::Ja,
            LangCode::En,
            "Send it tomorrow.",
            "ありがとう、明日送って。",
            Risk::Low,
            Some("Thanks, send it tomorrow."),
        );
        assert_eq!(g.risk, Risk::High);
        assert!(g.flags.iter().any(|f| f.starts_with("evaluative_dropped:")));
    }
}
