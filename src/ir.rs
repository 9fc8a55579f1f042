use std::fmt;

use serde::{Deserialize, Serialize};

/// One submitted source sentence plus everything that makes its bands cacheable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub native_mode: bool,
    pub prompt_version: String,
}

impl SourceRequest {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            native_mode: false,
            prompt_version: prompt_version.into(),
        }
    }

    #[must_use]
    pub fn with_native_mode(mut self, on: bool) -> Self {
        self.native_mode = on;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Base,
    Casual,
    Business,
    Custom,
}

impl Tone {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Casual => "casual",
            Self::Business => "business",
            Self::Custom => "custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Zero,
    Fifty,
    Hundred,
}

impl Level {
    #[must_use]
    pub fn percent(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Fifty => 50,
            Self::Hundred => 100,
        }
    }
}

/// A (tone, level) variant of one source sentence.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BandId {
    pub tone: Tone,
    pub level: Level,
    pub custom_style: Option<String>,
}

impl BandId {
    #[must_use]
    pub fn base() -> Self {
        Self {
            tone: Tone::Base,
            level: Level::Zero,
            custom_style: None,
        }
    }

    /// Casual or business band. `Level::Zero` of either tone is the base band.
    #[must_use]
    pub fn toned(tone: Tone, level: Level) -> Self {
        if level == Level::Zero || matches!(tone, Tone::Base | Tone::Custom) {
            return Self::base();
        }
        Self {
            tone,
            level,
            custom_style: None,
        }
    }

    /// Custom bands ignore the level: every UI level shares one result.
    #[must_use]
    pub fn custom(style: impl Into<String>) -> Self {
        Self {
            tone: Tone::Custom,
            level: Level::Zero,
            custom_style: Some(style.into()),
        }
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.tone == Tone::Base
    }

    /// The less extreme neighbour this band is compared against for no-change.
    #[must_use]
    pub fn reference(&self) -> Option<BandId> {
        match (self.tone, self.level) {
            (Tone::Casual | Tone::Business, Level::Fifty) => Some(Self::base()),
            (Tone::Casual | Tone::Business, Level::Hundred) => {
                Some(Self::toned(self.tone, Level::Fifty))
            }
            _ => None,
        }
    }

    /// Bands whose no-change flag depends on this band's text.
    #[must_use]
    pub fn dependents(&self) -> Vec<BandId> {
        match (self.tone, self.level) {
            (Tone::Base, _) => vec![
                Self::toned(Tone::Casual, Level::Fifty),
                Self::toned(Tone::Business, Level::Fifty),
            ],
            (Tone::Casual | Tone::Business, Level::Fifty) => {
                vec![Self::toned(self.tone, Level::Hundred)]
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tone.as_str(), self.level.percent())?;
        if let Some(style) = self.custom_style.as_deref() {
            write!(f, "_{style}")?;
        }
        Ok(())
    }
}

/// Deterministic cache key; two requests share an entry iff every field matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

pub const NATIVE_MARKER: &str = "native";

impl CacheKey {
    #[must_use]
    pub fn for_band(request: &SourceRequest, band: &BandId) -> Self {
        let mut key = format!(
            "{}|{}->{}|{}|{}",
            request.prompt_version, request.source_lang, request.target_lang, request.text, band
        );
        if request.native_mode {
            key.push('_');
            key.push_str(NATIVE_MARKER);
        }
        Self(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
}

impl Risk {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Model-reported risk; anything unrecognised reads as `Low`.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" | "med" => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl<'de> Deserialize<'de> for Risk {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::parse_lenient).unwrap_or_default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub translation: String,
    pub reverse_translation: String,
    pub no_change: bool,
    pub risk: Risk,
}

/// A band as handed to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BandResult {
    pub band: BandId,
    pub key: CacheKey,
    pub translation: String,
    pub reverse_translation: String,
    pub no_change: bool,
    pub risk: Risk,
    /// Set when generation failed and a prior band stands in; never cached.
    pub degraded: bool,
}

impl BandResult {
    #[must_use]
    pub fn from_entry(band: BandId, key: CacheKey, entry: CacheEntry) -> Self {
        Self {
            band,
            key,
            translation: entry.translation,
            reverse_translation: entry.reverse_translation,
            no_change: entry.no_change,
            risk: entry.risk,
            degraded: false,
        }
    }

    /// Stand-in for `band` built from a prior band after a generation failure.
    #[must_use]
    pub fn degraded_from(prior: &BandResult, band: BandId, key: CacheKey) -> Self {
        Self {
            band,
            key,
            translation: prior.translation.clone(),
            reverse_translation: prior.reverse_translation.clone(),
            no_change: true,
            risk: Risk::High,
            degraded: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandStatus {
    #[default]
    Idle,
    Verifying,
    Fixing,
    Passed,
}

impl BandStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::Fixing => "fixing",
            Self::Passed => "passed",
        }
    }
}

/// The five slider stops of the symmetric tone scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TonePosition {
    MoreCasual,
    Casual,
    Base,
    Polite,
    MorePolite,
}

impl TonePosition {
    pub const ALL: [TonePosition; 5] = [
        Self::MoreCasual,
        Self::Casual,
        Self::Base,
        Self::Polite,
        Self::MorePolite,
    ];

    /// Maps a continuous slider value in [-100, 100] to the nearest stop.
    #[must_use]
    pub fn snap(value: f32) -> Self {
        let v = if value.is_finite() {
            value.clamp(-100.0, 100.0)
        } else {
            0.0
        };
        if v <= -75.0 {
            Self::MoreCasual
        } else if v <= -25.0 {
            Self::Casual
        } else if v < 25.0 {
            Self::Base
        } else if v < 75.0 {
            Self::Polite
        } else {
            Self::MorePolite
        }
    }

    /// Accepts a slider value or a stop name (`polite`, `more-casual`, ...).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let t = text.trim();
        if let Ok(v) = t.parse::<f32>() {
            return v.is_finite().then(|| Self::snap(v));
        }
        let name = t.to_ascii_lowercase().replace(['_', ' '], "-");
        match name.as_str() {
            "more-casual" | "very-casual" => Some(Self::MoreCasual),
            "casual" => Some(Self::Casual),
            "base" | "neutral" => Some(Self::Base),
            "polite" | "business" => Some(Self::Polite),
            "more-polite" | "very-polite" => Some(Self::MorePolite),
            _ => None,
        }
    }

    #[must_use]
    pub fn value(self) -> f32 {
        match self {
            Self::MoreCasual => -100.0,
            Self::Casual => -50.0,
            Self::Base => 0.0,
            Self::Polite => 50.0,
            Self::MorePolite => 100.0,
        }
    }

    #[must_use]
    pub fn band(self) -> BandId {
        match self {
            Self::MoreCasual => BandId::toned(Tone::Casual, Level::Hundred),
            Self::Casual => BandId::toned(Tone::Casual, Level::Fifty),
            Self::Base => BandId::base(),
            Self::Polite => BandId::toned(Tone::Business, Level::Fifty),
            Self::MorePolite => BandId::toned(Tone::Business, Level::Hundred),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MoreCasual => "more casual",
            Self::Casual => "casual",
            Self::Base => "base",
            Self::Polite => "polite",
            Self::MorePolite => "more polite",
        }
    }
}

/// Every stop of the scale for one source sentence.
#[derive(Clone, Debug)]
pub struct ToneBandSet {
    pub more_casual: BandResult,
    pub casual: BandResult,
    pub base: BandResult,
    pub polite: BandResult,
    pub more_polite: BandResult,
}

impl ToneBandSet {
    #[must_use]
    pub fn get(&self, position: TonePosition) -> &BandResult {
        match position {
            TonePosition::MoreCasual => &self.more_casual,
            TonePosition::Casual => &self.casual,
            TonePosition::Base => &self.base,
            TonePosition::Polite => &self.polite,
            TonePosition::MorePolite => &self.more_polite,
        }
    }
}
