use once_cell::sync::Lazy;
use regex::Regex;

use crate::textutil::{is_han, is_hangul, is_kana, script_counts, tidy_spacing, LangCode};

static JA_DOUBLE_ENDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(です|ます|ました|でした)(です|ます)+([。？！?!」]*)\s*$").expect("ja ending regex")
});
static KO_DOUBLE_ENDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(요|니다)요+([.?!]*)\s*$").expect("ko ending regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurityOutcome {
    pub text: String,
    /// Characters were removed; the band must be flagged high risk.
    pub stripped: bool,
}

/// Removes characters of scripts the target language never uses.
#[must_use]
pub fn enforce_target_purity(text: &str, target: LangCode) -> PurityOutcome {
    let foreign: fn(char) -> bool = match target {
        LangCode::Ja => |c| is_hangul(c),
        LangCode::Ko => |c| is_kana(c) || is_han(c),
        LangCode::Zh => |c| is_kana(c) || is_hangul(c),
        LangCode::Other => |_| false,
        _ => |c| is_kana(c) || is_han(c) || is_hangul(c),
    };
    if !text.chars().any(foreign) {
        return PurityOutcome {
            text: text.trim().to_string(),
            stripped: false,
        };
    }
    let kept: String = text
        .chars()
        .map(|c| if foreign(c) { ' ' } else { c })
        .collect();
    PurityOutcome {
        text: tidy_spacing(&kept),
        stripped: true,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReverseOutcome {
    pub text: String,
    /// The back-translation is not recognisably in the source language.
    pub wrong_language: bool,
}

/// Checks that a back-translation is written in the source language and cleans
/// doubled politeness endings.
#[must_use]
pub fn check_reverse_purity(reverse: &str, source: LangCode) -> ReverseOutcome {
    let text = cleanup_double_endings(reverse.trim(), source);
    let counts = script_counts(&text);
    let wrong_language = if counts.non_ws == 0 {
        true
    } else {
        match source {
            LangCode::Ja => counts.japanese() == 0,
            LangCode::Ko => counts.hangul == 0,
            LangCode::Zh => counts.han == 0,
            lang if lang.is_latin_script() => {
                counts.latin_alpha == 0 || counts.ratio(counts.cjk()) > 0.3
            }
            _ => false,
        }
    };
    ReverseOutcome {
        text,
        wrong_language,
    }
}

/// A Japanese-target band whose back-translation holds no Japanese at all.
#[must_use]
pub fn reverse_lacks_japanese(reverse: &str, target: LangCode) -> bool {
    target == LangCode::Ja && script_counts(reverse).japanese() == 0
}

/// `送りますです。` -> `送ります。`, `감사합니다요` -> `감사합니다`.
#[must_use]
pub fn cleanup_double_endings(text: &str, lang: LangCode) -> String {
    match lang {
        LangCode::Ja => JA_DOUBLE_ENDING_RE.replace(text, "$1$3").into_owned(),
        LangCode::Ko => KO_DOUBLE_ENDING_RE.replace(text, "$1$2").into_owned(),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_kana_from_english_target() {
        let out = enforce_target_purity("Could you help me ちょっと?", LangCode::En);
        assert!(out.stripped);
        assert_eq!(out.text, "Could you help me?");
    }

    #[test]
    fn clean_english_is_untouched() {
        let out = enforce_target_purity("  Could you help me a bit? ", LangCode::En);
        assert!(!out.stripped);
        assert_eq!(out.text, "Could you help me a bit?");
    }

    #[test]
    fn japanese_target_keeps_kanji_and_latin() {
        let out = enforce_target_purity("明日PDFを送ってくれる?", LangCode::Ja);
        assert!(!out.stripped);
        let out = enforce_target_purity("明日送って주세요", LangCode::Ja);
        assert!(out.stripped);
        assert_eq!(out.text, "明日送って");
    }

    #[test]
    fn reverse_without_japanese_is_wrong_language() {
        let out = check_reverse_purity("Can you help me a little?", LangCode::Ja);
        assert!(out.wrong_language);
        let out = check_reverse_purity("ちょっと手伝ってくれる？", LangCode::Ja);
        assert!(!out.wrong_language);
    }

    #[test]
    fn reverse_for_english_source_must_be_latin() {
        assert!(check_reverse_purity("明日送ってもらえますか？", LangCode::En).wrong_language);
        assert!(!check_reverse_purity("Can you send it tomorrow?", LangCode::En).wrong_language);
    }

    #[test]
    fn japanese_target_needs_japanese_in_reverse() {
        assert!(reverse_lacks_japanese("Can you send it tomorrow?", LangCode::Ja));
        assert!(!reverse_lacks_japanese("明日送ってくれる？", LangCode::Ja));
        assert!(!reverse_lacks_japanese("Can you send it tomorrow?", LangCode::En));
    }

    #[test]
    fn doubled_polite_endings_are_collapsed() {
        assert_eq!(
            cleanup_double_endings("明日送りますです。", LangCode::Ja),
            "明日送ります。"
        );
        assert_eq!(
            cleanup_double_endings("手伝ってくれましたです？", LangCode::Ja),
            "手伝ってくれました？"
        );
        assert_eq!(cleanup_double_endings("감사합니다요.", LangCode::Ko), "감사합니다.");
        assert_eq!(cleanup_double_endings("送ります。", LangCode::Ja), "送ります。");
    }
}
