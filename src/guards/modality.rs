use std::collections::HashMap;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::textutil::LangCode;

const DEFAULT_RULES_TOML: &str = include_str!("modality_rules.toml");

static DEFAULT_TABLE: Lazy<RuleTableClassifier> = Lazy::new(|| {
    RuleTableClassifier::from_toml_str(DEFAULT_RULES_TOML).expect("built-in modality rules")
});

/// Speech-act category of a sentence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityClass {
    Request,
    Confirmation,
    Suggestion,
    Obligation,
    Statement,
}

impl ModalityClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Confirmation => "confirmation",
            Self::Suggestion => "suggestion",
            Self::Obligation => "obligation",
            Self::Statement => "statement",
        }
    }
}

pub trait ModalityClassifier: Send + Sync {
    fn classify(&self, text: &str, lang: LangCode) -> ModalityClass;
}

/// Outcome of comparing the source mood with a candidate translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModalityCheck {
    pub source: ModalityClass,
    pub candidate: ModalityClass,
}

impl ModalityCheck {
    /// A marked source mood (request, confirmation, suggestion, obligation) must
    /// survive unchanged; losing it to a plain statement counts as drift. An
    /// unmarked source constrains nothing.
    #[must_use]
    pub fn violated(&self) -> bool {
        self.source != ModalityClass::Statement && self.candidate != self.source
    }
}

pub fn check_modality(
    classifier: &dyn ModalityClassifier,
    source_text: &str,
    source_lang: LangCode,
    candidate: &str,
    target_lang: LangCode,
) -> ModalityCheck {
    ModalityCheck {
        source: classifier.classify(source_text, source_lang),
        candidate: classifier.classify(candidate, target_lang),
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    lang: Vec<LangRules>,
}

#[derive(Debug, Deserialize)]
struct LangRules {
    code: String,
    #[serde(default)]
    rule: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    class: ModalityClass,
    #[serde(default)]
    patterns: Vec<String>,
}

struct CompiledRule {
    class: ModalityClass,
    patterns: Vec<Regex>,
}

/// Regex tables keyed by language; adding a language only touches the data file.
pub struct RuleTableClassifier {
    tables: HashMap<String, Vec<CompiledRule>>,
}

impl RuleTableClassifier {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: RulesFile = toml::from_str(text).context("parse modality rules")?;
        let mut tables = HashMap::new();
        for lang in file.lang {
            let mut rules = Vec::with_capacity(lang.rule.len());
            for spec in lang.rule {
                let mut patterns = Vec::with_capacity(spec.patterns.len());
                for p in &spec.patterns {
                    let re = Regex::new(p).with_context(|| {
                        format!("compile modality pattern ({}): {p}", lang.code)
                    })?;
                    patterns.push(re);
                }
                rules.push(CompiledRule {
                    class: spec.class,
                    patterns,
                });
            }
            tables.insert(lang.code.trim().to_ascii_lowercase(), rules);
        }
        Ok(Self { tables })
    }

    #[must_use]
    pub fn builtin() -> &'static RuleTableClassifier {
        &DEFAULT_TABLE
    }

    #[must_use]
    pub fn languages(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }
}

impl ModalityClassifier for RuleTableClassifier {
    fn classify(&self, text: &str, lang: LangCode) -> ModalityClass {
        let Some(rules) = self.tables.get(lang.code()) else {
            return ModalityClass::Statement;
        };
        let text = text.trim();
        for rule in rules {
            if rule.patterns.iter().any(|re| re.is_match(text)) {
                return rule.class;
            }
        }
        ModalityClass::Statement
    }
}

impl ModalityClassifier for &'static RuleTableClassifier {
    fn classify(&self, text: &str, lang: LangCode) -> ModalityClass {
        (**self).classify(text, lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str, lang: LangCode) -> ModalityClass {
        RuleTableClassifier::builtin().classify(text, lang)
    }

    #[test]
    fn japanese_request_forms() {
        assert_eq!(classify("ちょっと手伝ってくれる?", LangCode::Ja), ModalityClass::Request);
        assert_eq!(classify("明日送ってもらえますか？", LangCode::Ja), ModalityClass::Request);
        assert_eq!(classify("少し手伝ってもらえませんか？", LangCode::Ja), ModalityClass::Request);
    }

    #[test]
    fn japanese_other_moods() {
        assert_eq!(classify("明日送りましたか？", LangCode::Ja), ModalityClass::Confirmation);
        assert_eq!(classify("一緒に行きませんか？", LangCode::Ja), ModalityClass::Suggestion);
        assert_eq!(classify("明日までに出さなければならない。", LangCode::Ja), ModalityClass::Obligation);
        assert_eq!(classify("今日は晴れです。", LangCode::Ja), ModalityClass::Statement);
    }

    #[test]
    fn english_moods() {
        assert_eq!(classify("Can you send it tomorrow?", LangCode::En), ModalityClass::Request);
        assert_eq!(
            classify("Hey, could you send it over by tomorrow?", LangCode::En),
            ModalityClass::Request
        );
        assert_eq!(classify("Did you help me?", LangCode::En), ModalityClass::Confirmation);
        assert_eq!(classify("Let's send it tomorrow.", LangCode::En), ModalityClass::Suggestion);
        assert_eq!(classify("You must send it tomorrow.", LangCode::En), ModalityClass::Obligation);
        assert_eq!(classify("It arrived yesterday.", LangCode::En), ModalityClass::Statement);
    }

    #[test]
    fn request_to_confirmation_is_a_violation() {
        let check = check_modality(
            RuleTableClassifier::builtin(),
            "ちょっと手伝ってくれる?",
            LangCode::Ja,
            "Did you help me a little?",
            LangCode::En,
        );
        assert_eq!(check.source, ModalityClass::Request);
        assert_eq!(check.candidate, ModalityClass::Confirmation);
        assert!(check.violated());
    }

    #[test]
    fn request_becoming_statement_is_a_violation() {
        let check = check_modality(
            RuleTableClassifier::builtin(),
            "ちょっと手伝ってくれる?",
            LangCode::Ja,
            "I helped you a little.",
            LangCode::En,
        );
        assert_eq!(check.source, ModalityClass::Request);
        assert_eq!(check.candidate, ModalityClass::Statement);
        assert!(check.violated());
    }

    #[test]
    fn unmarked_source_constrains_nothing() {
        let check = ModalityCheck {
            source: ModalityClass::Statement,
            candidate: ModalityClass::Request,
        };
        assert!(!check.violated());
        let same = ModalityCheck {
            source: ModalityClass::Obligation,
            candidate: ModalityClass::Obligation,
        };
        assert!(!same.violated());
    }

    #[test]
    fn english_imperatives_are_requests() {
        assert_eq!(classify("Send it tomorrow.", LangCode::En), ModalityClass::Request);
        assert_eq!(classify("Send it tomorrow?", LangCode::En), ModalityClass::Request);
        assert_eq!(
            classify("Hey, give me a hand with this!", LangCode::En),
            ModalityClass::Request
        );
        assert_eq!(classify("Let me know by Friday.", LangCode::En), ModalityClass::Request);
        assert_eq!(classify("I need you to check this.", LangCode::En), ModalityClass::Request);
        assert_eq!(classify("I helped you a little.", LangCode::En), ModalityClass::Statement);
    }

    #[test]
    fn unknown_language_is_statement() {
        assert_eq!(classify("Kannst du mir helfen?", LangCode::De), ModalityClass::Statement);
    }

    #[test]
    fn custom_tables_load_from_data() {
        let rules = r#"
[[lang]]
code = "es"
[[lang.rule]]
class = "request"
patterns = ['(?i)^\s*(puedes|podrías)\b']
"#;
        let c = RuleTableClassifier::from_toml_str(rules).expect("rules");
        assert_eq!(c.languages(), vec!["es"]);
        assert_eq!(c.classify("¿Podrías ayudarme?", LangCode::Es), ModalityClass::Statement);
        assert_eq!(c.classify("Puedes ayudarme?", LangCode::Es), ModalityClass::Request);
    }
}
