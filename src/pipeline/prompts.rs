use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::{AppConfig, PromptsSection};
use crate::ir::{BandId, Level, Tone};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

static SLOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("template slot regex"));

#[derive(Clone, Debug)]
pub struct PromptSet {
    pub system: String,
    pub base: String,
    pub anchors: String,
    pub partial: String,
    pub full_simple: String,
    pub custom: String,
    pub verify: String,
    pub fix_meaning: String,
    pub fix_naturalness: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_TEXT.to_string(),
            base: DEFAULT_BASE_TEXT.to_string(),
            anchors: DEFAULT_ANCHORS_TEXT.to_string(),
            partial: DEFAULT_PARTIAL_TEXT.to_string(),
            full_simple: DEFAULT_FULL_SIMPLE_TEXT.to_string(),
            custom: DEFAULT_CUSTOM_TEXT.to_string(),
            verify: DEFAULT_VERIFY_TEXT.to_string(),
            fix_meaning: DEFAULT_FIX_MEANING_TEXT.to_string(),
            fix_naturalness: DEFAULT_FIX_NATURALNESS_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in templates, replaced by any file named in `[prompts]`.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        let d = Self::default();
        Ok(Self {
            system: read_prompt(config_dir, p, "system", d.system)?,
            base: read_prompt(config_dir, p, "base", d.base)?,
            anchors: read_prompt(config_dir, p, "anchors", d.anchors)?,
            partial: read_prompt(config_dir, p, "partial", d.partial)?,
            full_simple: read_prompt(config_dir, p, "full_simple", d.full_simple)?,
            custom: read_prompt(config_dir, p, "custom", d.custom)?,
            verify: read_prompt(config_dir, p, "verify", d.verify)?,
            fix_meaning: read_prompt(config_dir, p, "fix_meaning", d.fix_meaning)?,
            fix_naturalness: read_prompt(config_dir, p, "fix_naturalness", d.fix_naturalness)?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    p: &PromptsSection,
    key: &str,
    default_text: String,
) -> anyhow::Result<String> {
    let path = match key {
        "system" => p.system.clone(),
        "base" => p.base.clone(),
        "anchors" => p.anchors.clone(),
        "partial" => p.partial.clone(),
        "full_simple" => p.full_simple.clone(),
        "custom" => p.custom.clone(),
        "verify" => p.verify.clone(),
        "fix_meaning" => p.fix_meaning.clone(),
        "fix_naturalness" => p.fix_naturalness.clone(),
        other => return Err(anyhow!("unknown prompt key: {other}")),
    };
    let Some(path) = path.filter(|s| !s.trim().is_empty()) else {
        return Ok(default_text);
    };

    let mut p = PathBuf::from(path);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: tone-translator --init-config)",
            p.display()
        ));
    }
    std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    // Single pass over the template: substituted values are never re-scanned.
    SLOT_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match vars.iter().find(|(k, _)| *k == name) {
                Some((_, v)) => (*v).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Tone descriptor slotted into generation and verification prompts.
#[must_use]
pub fn tone_instruction(band: &BandId) -> String {
    match (band.tone, band.level) {
        (Tone::Custom, _) => band.custom_style.clone().unwrap_or_default(),
        (Tone::Casual, Level::Fifty) => {
            "casual and friendly, the way you talk to a colleague you know well".to_string()
        }
        (Tone::Casual, Level::Hundred) => {
            "very casual, the way you talk to a close friend, and clearly more casual than REFERENCE"
                .to_string()
        }
        (Tone::Business, Level::Fifty) => "polite and businesslike".to_string(),
        (Tone::Business, Level::Hundred) => {
            "very formal and deferential, and clearly more polite than REFERENCE".to_string()
        }
        _ => "neutral, neither casual nor formal".to_string(),
    }
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("system.txt", DEFAULT_SYSTEM_TEXT),
        ("base.txt", DEFAULT_BASE_TEXT),
        ("anchors.json.txt", DEFAULT_ANCHORS_TEXT),
        ("partial.txt", DEFAULT_PARTIAL_TEXT),
        ("full_simple.txt", DEFAULT_FULL_SIMPLE_TEXT),
        ("custom.txt", DEFAULT_CUSTOM_TEXT),
        ("verify.json.txt", DEFAULT_VERIFY_TEXT),
        ("fix_meaning.txt", DEFAULT_FIX_MEANING_TEXT),
        ("fix_naturalness.txt", DEFAULT_FIX_NATURALNESS_TEXT),
    ]
}

pub const NATIVE_RULE_TEXT: &str =
    "- Phrase it the way a native speaker would actually say it in conversation; avoid textbook wording.";

pub const DEFAULT_SYSTEM_TEXT: &str = r#"You are a careful conversational translator.
Do not think aloud. Do not explain.
Return STRICT JSON only (one JSON object). No markdown."#;

pub const DEFAULT_BASE_TEXT: &str = r#"Translate SOURCE from {{source_lang}} into {{target_lang}}.
Then translate your translation back into {{source_lang}} as reverse_translation.

Rules:
- translation must be written entirely in {{target_lang}}.
- reverse_translation must be written entirely in {{source_lang}}.
- Keep the speech act: a request stays a request, a question stays a question.
- Do NOT add or drop information. Keep names and numbers exactly.
- Use a neutral register (neither casual nor formal).
{{native_rule}}

Schema:
{"translation":"...","reverse_translation":"...","risk":"low|medium|high","detected_language":"..."}

SOURCE:
{{source}}"#;

pub const DEFAULT_ANCHORS_TEXT: &str = r#"For each WORD (taken from TRANSLATION), write one short definition of what it means in THIS sentence.
- Describe the state, action or feeling it expresses.
- For verbs between people, say who does what to whom.
- For named people, note their likely social role from context.

ORIGINAL ({{source_lang}}):
{{source}}

TRANSLATION ({{target_lang}}):
{{translation}}

WORDS:
{{words}}

Schema:
{"anchors":{"word":"definition"}}"#;

pub const DEFAULT_PARTIAL_TEXT: &str = r#"Rewrite REFERENCE so that it is {{tone_instruction}}.

Rules:
- Keep every FIXED word exactly as written.
- FLEXIBLE words may be re-phrased but must keep the meaning given in MEANING ANCHORS.
- FREE words may change freely.
- Keep the overall content and the speech act (request / question / suggestion / obligation) exactly.
- Change only phrasing and politeness. Write entirely in {{target_lang}}.
{{native_rule}}

FIXED: {{fixed_words}}
FLEXIBLE: {{flexible_words}}
FREE: {{free_words}}

{{anchors}}

ORIGINAL ({{source_lang}}):
{{source}}

REFERENCE ({{target_lang}}):
{{reference}}

Schema (reverse_translation is in {{source_lang}}):
{"translation":"...","reverse_translation":"...","risk":"low|medium|high"}"#;

pub const DEFAULT_FULL_SIMPLE_TEXT: &str = r#"Translate ORIGINAL into {{target_lang}} so that it is {{tone_instruction}}.

Rules:
- The result must go clearly further in that direction than FLOOR. Do NOT return FLOOR unchanged.
- Keep the meaning and the speech act (request / question / suggestion / obligation) of ORIGINAL.
- Write entirely in {{target_lang}}.
{{native_rule}}

{{anchors}}

ORIGINAL ({{source_lang}}):
{{source}}

FLOOR ({{target_lang}}):
{{reference}}

Schema (reverse_translation is in {{source_lang}}):
{"translation":"...","reverse_translation":"...","risk":"low|medium|high"}"#;

pub const DEFAULT_CUSTOM_TEXT: &str = r#"Translate ORIGINAL into {{target_lang}} in this style: {{style}}

Rules:
- Keep the meaning of REFERENCE; only the style changes.
- Keep the speech act of ORIGINAL.
- Write entirely in {{target_lang}}.
{{native_rule}}

ORIGINAL ({{source_lang}}):
{{source}}

REFERENCE ({{target_lang}}):
{{reference}}

Schema (reverse_translation is in {{source_lang}}):
{"translation":"...","reverse_translation":"...","risk":"low|medium|high"}"#;

pub const DEFAULT_VERIFY_TEXT: &str = r#"Check CANDIDATE, a translation of ORIGINAL written to be {{tone}}.

Report issues:
- meaning_shift: a word changed meaning (fields: word, expected, got)
- meaning_loss: information from ORIGINAL is missing (fields: word or phrase, reason)
- meaning_addition: information not in ORIGINAL was added (fields: phrase, reason)
- unnatural: CANDIDATE sounds unnatural for the requested tone (fields: phrase, reason)
- reverse_subject: CANDIDATE_REVERSE has the wrong subject or direction of action (fields: phrase, reason)
- reverse_unnatural: CANDIDATE_REVERSE is not natural {{source_lang}} (fields: phrase, reason)
Severity is high, medium or low. Tone-appropriate rewording is NOT an issue.

{{anchors}}

ORIGINAL ({{source_lang}}):
{{source}}

CANDIDATE ({{target_lang}}):
{{translation}}

CANDIDATE_REVERSE ({{source_lang}}):
{{reverse_translation}}

Schema:
{"pass":true,"issues":[{"type":"meaning_shift","severity":"high","word":"...","expected":"...","got":"...","phrase":"...","reason":"..."}]}"#;

pub const DEFAULT_FIX_MEANING_TEXT: &str = r#"Fix the meaning problems in CANDIDATE with the SMALLEST possible edit.
Keep the tone ({{tone}}) and the speech act unchanged. Write entirely in {{target_lang}}.

ISSUES:
{{issues}}

{{anchors}}

ORIGINAL ({{source_lang}}):
{{source}}

CANDIDATE ({{target_lang}}):
{{translation}}

Schema (reverse_translation is in {{source_lang}}):
{"translation":"...","reverse_translation":"..."}"#;

pub const DEFAULT_FIX_NATURALNESS_TEXT: &str = r#"Make CANDIDATE sound natural for the tone ({{tone}}) without changing its meaning.
Keep the speech act unchanged. Write entirely in {{target_lang}}.
If the reverse translation was flagged, produce a faithful natural reverse_translation in {{source_lang}}.

ISSUES:
{{issues}}

{{anchors}}

ORIGINAL ({{source_lang}}):
{{source}}

CANDIDATE ({{target_lang}}):
{{translation}}

Schema (reverse_translation is in {{source_lang}}):
{"translation":"...","reverse_translation":"..."}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_named_slots() {
        let out = render_template("{{a}} -> {{b}} ({{a}})", &[("a", "ja"), ("b", "en")]);
        assert_eq!(out, "ja -> en (ja)");
        assert_eq!(render_template("{{missing}} {{a}}", &[("a", "x")]), "{{missing}} x");
    }

    #[test]
    fn slot_syntax_inside_values_is_left_alone() {
        let out = render_template(
            "SOURCE: {{source}}\nREFERENCE: {{reference}}",
            &[
                ("source", "what does {{reference}} mean? {{style}}"),
                ("reference", "明日送ってくれる？"),
                ("style", "pirate"),
            ],
        );
        assert_eq!(
            out,
            "SOURCE: what does {{reference}} mean? {{style}}\nREFERENCE: 明日送ってくれる？"
        );
    }

    #[test]
    fn tone_descriptors_follow_the_band() {
        assert!(tone_instruction(&BandId::toned(Tone::Casual, Level::Hundred)).contains("REFERENCE"));
        assert_eq!(tone_instruction(&BandId::custom("like a pirate")), "like a pirate");
        assert!(tone_instruction(&BandId::base()).starts_with("neutral"));
    }

    #[test]
    fn missing_override_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = dir.path().join("tone-translator.toml");
        let mut cfg = AppConfig::default();
        cfg.prompts.partial = Some("prompts/nope.txt".to_string());
        let err = PromptSet::load(&cfg_path, &cfg).expect_err("missing file");
        assert!(err.to_string().contains("partial"));
    }

    #[test]
    fn override_file_replaces_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("mine.txt"), "CUSTOM {{style}}").expect("write");
        let mut cfg = AppConfig::default();
        cfg.prompts.custom = Some("mine.txt".to_string());
        let set = PromptSet::load(&dir.path().join("x.toml"), &cfg).expect("load");
        assert_eq!(set.custom, "CUSTOM {{style}}");
        assert_eq!(set.base, DEFAULT_BASE_TEXT);
    }
}
