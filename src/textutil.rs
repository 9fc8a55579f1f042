use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{3000}]{2,}").expect("ws regex"));
static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter"));

/// Language identity used by the guards and the analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LangCode {
    Ja,
    En,
    Ko,
    Zh,
    Es,
    Fr,
    De,
    It,
    Pt,
    Other,
}

impl LangCode {
    /// Accepts ISO codes, English names and Japanese names ("英語", "日本語").
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let n = name.trim();
        let lower = n.to_ascii_lowercase();
        match lower.as_str() {
            "ja" | "jp" | "japanese" | "日本語" => return Self::Ja,
            "en" | "english" | "英語" => return Self::En,
            "ko" | "korean" | "韓国語" => return Self::Ko,
            "zh" | "chinese" | "中国語" => return Self::Zh,
            "es" | "spanish" | "スペイン語" => return Self::Es,
            "fr" | "french" | "フランス語" => return Self::Fr,
            "de" | "german" | "ドイツ語" => return Self::De,
            "it" | "italian" | "イタリア語" => return Self::It,
            "pt" | "portuguese" | "ポルトガル語" => return Self::Pt,
            _ => {}
        }
        if lower.starts_with("en-") {
            Self::En
        } else if lower.starts_with("zh-") {
            Self::Zh
        } else if lower.starts_with("pt-") {
            Self::Pt
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Ja => "ja",
            Self::En => "en",
            Self::Ko => "ko",
            Self::Zh => "zh",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::De => "de",
            Self::It => "it",
            Self::Pt => "pt",
            Self::Other => "und",
        }
    }

    #[must_use]
    pub fn is_latin_script(self) -> bool {
        matches!(
            self,
            Self::En | Self::Es | Self::Fr | Self::De | Self::It | Self::Pt
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScriptCounts {
    pub non_ws: usize,
    pub han: usize,
    pub kana: usize,
    pub hangul: usize,
    pub latin_alpha: usize,
}

impl ScriptCounts {
    #[must_use]
    pub fn japanese(&self) -> usize {
        self.han + self.kana
    }

    #[must_use]
    pub fn cjk(&self) -> usize {
        self.han + self.kana + self.hangul
    }

    #[must_use]
    pub fn ratio(&self, count: usize) -> f32 {
        if self.non_ws == 0 {
            0.0
        } else {
            count as f32 / self.non_ws as f32
        }
    }
}

#[must_use]
pub fn script_counts(text: &str) -> ScriptCounts {
    let mut m = ScriptCounts::default();
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        m.non_ws = m.non_ws.saturating_add(1);
        if ch.is_ascii_alphabetic() {
            m.latin_alpha = m.latin_alpha.saturating_add(1);
        } else if is_han(ch) {
            m.han = m.han.saturating_add(1);
        } else if is_kana(ch) {
            m.kana = m.kana.saturating_add(1);
        } else if is_hangul(ch) {
            m.hangul = m.hangul.saturating_add(1);
        }
    }
    m
}

pub fn is_han(ch: char) -> bool {
    let u = ch as u32;
    (0x3400..=0x4DBF).contains(&u)
        || (0x4E00..=0x9FFF).contains(&u)
        || (0xF900..=0xFAFF).contains(&u)
        || (0x20000..=0x2A6DF).contains(&u)
}

pub fn is_kana(ch: char) -> bool {
    let u = ch as u32;
    (0x3040..=0x309F).contains(&u)
        || (0x30A0..=0x30FF).contains(&u)
        || (0x31F0..=0x31FF).contains(&u)
        || (0xFF66..=0xFF9F).contains(&u)
}

pub fn is_hangul(ch: char) -> bool {
    let u = ch as u32;
    (0xAC00..=0xD7AF).contains(&u)
        || (0x1100..=0x11FF).contains(&u)
        || (0x3130..=0x318F).contains(&u)
}

/// Collapses the runs of spaces left behind after characters are removed.
#[must_use]
pub fn tidy_spacing(text: &str) -> String {
    let collapsed = WS_RE.replace_all(text, " ");
    let mut out = collapsed.trim().to_string();
    for (bad, good) in [(" ,", ","), (" .", "."), (" ?", "?"), (" !", "!")] {
        out = out.replace(bad, good);
    }
    out
}

#[must_use]
pub fn has_letters(text: &str) -> bool {
    LETTER_RE.is_match(text)
}

/// Truncates on a char boundary for log lines.
#[must_use]
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_japanese_language_names() {
        assert_eq!(LangCode::parse("英語"), LangCode::En);
        assert_eq!(LangCode::parse("日本語"), LangCode::Ja);
        assert_eq!(LangCode::parse("en-US"), LangCode::En);
        assert_eq!(LangCode::parse("Klingon"), LangCode::Other);
    }

    #[test]
    fn counts_scripts() {
        let c = script_counts("今日はgood");
        assert_eq!(c.han, 2);
        assert_eq!(c.kana, 1);
        assert_eq!(c.latin_alpha, 4);
        assert_eq!(c.non_ws, 7);
    }

    #[test]
    fn tidy_spacing_collapses_gaps() {
        assert_eq!(tidy_spacing("Could you  help ?"), "Could you help?");
    }
}
