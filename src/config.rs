use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "tone-translator.toml";
pub const CONFIG_ENV_VAR: &str = "TONE_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub sampling: SamplingSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Bump whenever prompt wording changes output semantics; every cache
    /// entry of the previous version becomes unreachable.
    #[serde(default)]
    pub prompt_version: Option<String>,

    /// Default for requests that do not set native mode explicitly.
    #[serde(default)]
    pub native_mode: Option<bool>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,

    /// Where the locked slider position is persisted.
    #[serde(default)]
    pub lock_file: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub completion_endpoint: Option<String>,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
    #[serde(default)]
    pub verification_model: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub analyzer_endpoint: Option<String>,
    #[serde(default)]
    pub analyzer_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct SamplingSection {
    #[serde(default)]
    pub base_temperature: Option<f32>,
    #[serde(default)]
    pub partial_temperature: Option<f32>,
    #[serde(default)]
    pub full_simple_temperature: Option<f32>,
    #[serde(default)]
    pub custom_temperature: Option<f32>,
    #[serde(default)]
    pub anchors_temperature: Option<f32>,
    #[serde(default)]
    pub verify_temperature: Option<f32>,
    #[serde(default)]
    pub fix_temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub anchors: Option<String>,
    #[serde(default)]
    pub partial: Option<String>,
    #[serde(default)]
    pub full_simple: Option<String>,
    #[serde(default)]
    pub custom: Option<String>,
    #[serde(default)]
    pub verify: Option<String>,
    #[serde(default)]
    pub fix_meaning: Option<String>,
    #[serde(default)]
    pub fix_naturalness: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
[pipeline]
prompt_version = "v7"

[models]
completion_endpoint = "http://localhost:8080/complete"
generation_model = "gen-small"

[sampling]
partial_temperature = 0.55
"#,
        )
        .expect("toml");
        assert_eq!(cfg.pipeline.prompt_version.as_deref(), Some("v7"));
        assert_eq!(cfg.models.generation_model.as_deref(), Some("gen-small"));
        assert_eq!(cfg.sampling.partial_temperature, Some(0.55));
        assert!(cfg.models.analyzer_endpoint.is_none());
        assert!(cfg.prompts.partial.is_none());
    }

    #[test]
    fn finds_config_in_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILENAME), "").expect("write");
        let found = find_file_upwards(&nested, DEFAULT_CONFIG_FILENAME, 4).expect("found");
        assert_eq!(found, dir.path().join(DEFAULT_CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, "missing.toml", 4).is_none());
    }
}
