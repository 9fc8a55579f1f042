use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, AppConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILENAME,
};
use crate::models::analyzer::DEFAULT_ANALYZER_TIMEOUT;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};

pub const DEFAULT_PROMPT_VERSION: &str = "v1";

/// Model names and sampling parameters per call kind.
#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub generation_model: String,
    pub verification_model: String,
    pub base_temperature: f32,
    pub partial_temperature: f32,
    pub full_simple_temperature: f32,
    pub custom_temperature: f32,
    pub anchors_temperature: f32,
    pub verify_temperature: f32,
    pub fix_temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            generation_model: "gpt-4o-mini".to_string(),
            verification_model: "gpt-4o".to_string(),
            base_temperature: 0.3,
            partial_temperature: 0.5,
            full_simple_temperature: 0.7,
            custom_temperature: 0.7,
            anchors_temperature: 0.2,
            verify_temperature: 0.0,
            fix_temperature: 0.2,
            max_output_tokens: Some(800),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,

    pub prompt_version: String,
    pub native_mode: bool,

    pub completion_endpoint: String,
    pub api_key_env: String,
    pub request_timeout: Duration,
    pub analyzer_endpoint: Option<String>,
    pub analyzer_timeout: Duration,

    pub models: ModelSettings,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
    pub lock_file: PathBuf,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    /// Resolves the config file (argument, env var, upward search) and loads it.
    /// A missing file yields the built-in defaults.
    pub fn discover(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(DEFAULT_CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_CONFIG_FILENAME)
        });
        Self::from_app_config(cfg_path, &file_cfg)
    }

    pub fn from_app_config(cfg_path: PathBuf, file_cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = cfg_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolve = |p: &str| {
            let p = PathBuf::from(p);
            if p.is_relative() {
                config_dir.join(p)
            } else {
                p
            }
        };

        let pipeline = &file_cfg.pipeline;
        let prompt_version = pipeline
            .prompt_version
            .clone()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PROMPT_VERSION.to_string());
        let trace_dir = resolve(pipeline.trace_dir.as_deref().unwrap_or("_trace"));
        let lock_file = resolve(pipeline.lock_file.as_deref().unwrap_or(".tone-lock.json"));

        let m = &file_cfg.models;
        let defaults = ModelSettings::default();
        let s = &file_cfg.sampling;
        let models = ModelSettings {
            generation_model: m
                .generation_model
                .clone()
                .unwrap_or(defaults.generation_model),
            verification_model: m
                .verification_model
                .clone()
                .unwrap_or(defaults.verification_model),
            base_temperature: s.base_temperature.unwrap_or(defaults.base_temperature),
            partial_temperature: s.partial_temperature.unwrap_or(defaults.partial_temperature),
            full_simple_temperature: s
                .full_simple_temperature
                .unwrap_or(defaults.full_simple_temperature),
            custom_temperature: s.custom_temperature.unwrap_or(defaults.custom_temperature),
            anchors_temperature: s.anchors_temperature.unwrap_or(defaults.anchors_temperature),
            verify_temperature: s.verify_temperature.unwrap_or(defaults.verify_temperature),
            fix_temperature: s.fix_temperature.unwrap_or(defaults.fix_temperature),
            max_output_tokens: s.max_output_tokens.or(defaults.max_output_tokens),
        };

        let prompts = PromptSet::load(&cfg_path, file_cfg).context("load prompts")?;

        Ok(Self {
            config_path: cfg_path,
            prompt_version,
            native_mode: pipeline.native_mode.unwrap_or(false),
            completion_endpoint: m
                .completion_endpoint
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:8787/v1/complete".to_string()),
            api_key_env: m
                .api_key_env
                .clone()
                .unwrap_or_else(|| "TONE_TRANSLATOR_API_KEY".to_string()),
            request_timeout: Duration::from_secs(m.request_timeout_secs.unwrap_or(60).max(1)),
            analyzer_endpoint: m
                .analyzer_endpoint
                .clone()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            analyzer_timeout: m
                .analyzer_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ANALYZER_TIMEOUT),
            models,
            trace_dir,
            trace_prompts: pipeline.trace_prompts.unwrap_or(false),
            lock_file,
            prompts,
        })
    }

    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
# Bump after editing any prompt in a way that changes output; old cache entries
# are then never reused.
prompt_version = "v1"
native_mode = false
trace_dir = "_trace"
trace_prompts = false
lock_file = ".tone-lock.json"

[models]
completion_endpoint = "http://127.0.0.1:8787/v1/complete"
api_key_env = "TONE_TRANSLATOR_API_KEY"
generation_model = "gpt-4o-mini"
verification_model = "gpt-4o"
request_timeout_secs = 60
# analyzer_endpoint = "http://127.0.0.1:8788/analyze"
analyzer_timeout_ms = 3000

[sampling]
base_temperature = 0.3
partial_temperature = 0.5
full_simple_temperature = 0.7
custom_temperature = 0.7
anchors_temperature = 0.2
verify_temperature = 0.0
fix_temperature = 0.2
max_output_tokens = 800

[prompts]
system = "prompts/system.txt"
base = "prompts/base.txt"
anchors = "prompts/anchors.json.txt"
partial = "prompts/partial.txt"
full_simple = "prompts/full_simple.txt"
custom = "prompts/custom.txt"
verify = "prompts/verify.json.txt"
fix_meaning = "prompts/fix_meaning.txt"
fix_naturalness = "prompts/fix_naturalness.txt"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_discover_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = init_default_config(dir.path(), false).expect("init");
        assert!(dir.path().join("prompts").join("partial.txt").exists());

        let cfg = PipelineConfig::discover(Some(cfg_path.clone())).expect("load");
        assert_eq!(cfg.prompt_version, "v1");
        assert_eq!(cfg.analyzer_endpoint, None);
        assert_eq!(cfg.analyzer_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.lock_file, dir.path().join(".tone-lock.json"));
        assert!(cfg.prompts.partial.contains("FIXED"));
    }

    #[test]
    fn init_keeps_existing_files_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        std::fs::write(&cfg_path, "[pipeline]\nprompt_version = \"v9\"\n").expect("write");
        init_default_config(dir.path(), false).expect("init");
        let text = std::fs::read_to_string(&cfg_path).expect("read");
        assert!(text.contains("v9"));
    }

    #[test]
    fn defaults_without_file() {
        let cfg =
            PipelineConfig::from_app_config(PathBuf::from("/tmp/x/tone.toml"), &AppConfig::default())
                .expect("defaults");
        assert_eq!(cfg.prompt_version, DEFAULT_PROMPT_VERSION);
        assert!(!cfg.trace_prompts);
        assert_eq!(cfg.models.verify_temperature, 0.0);
    }
}
