use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::llm::Provider;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DATABASE_PATH: &str = "data/llm_eval.db";
const DEFAULT_MODELS_CONFIG: &str = "config.yaml";
const DEFAULT_TEST_CASES_PATH: &str = "data/evaluation_test_cases.json";
const DEFAULT_EVALUATION_TYPE: &str = "speech_to_text";
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_PACING_MS: u64 = 500;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub models_config: PathBuf,
    pub test_cases_path: PathBuf,
    pub evaluation_type: String,
    pub max_concurrent_runs: usize,
    pub heartbeat_secs: u64,
    pub pacing_ms: u64,
    pub cors_origins: Vec<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub google_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_path: env_string("DATABASE_PATH", DEFAULT_DATABASE_PATH),
            models_config: PathBuf::from(env_string("MODELS_CONFIG", DEFAULT_MODELS_CONFIG)),
            test_cases_path: PathBuf::from(env_string("TEST_CASES_PATH", DEFAULT_TEST_CASES_PATH)),
            evaluation_type: env_string("EVALUATION_TYPE", DEFAULT_EVALUATION_TYPE),
            max_concurrent_runs: env_parse("MAX_CONCURRENT_RUNS", DEFAULT_MAX_CONCURRENT_RUNS),
            heartbeat_secs: env_parse("HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS),
            pacing_ms: env_parse("PACING_MS", DEFAULT_PACING_MS),
            cors_origins: env_string("CORS_ORIGINS", DEFAULT_CORS_ORIGINS)
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            openai_base_url: env_string("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            anthropic_base_url: env_string("ANTHROPIC_BASE_URL", DEFAULT_ANTHROPIC_BASE_URL),
            google_base_url: env_string("GOOGLE_BASE_URL", DEFAULT_GOOGLE_BASE_URL),
        }
    }

    pub fn print_banner(&self, models: &ModelsConfig) {
        let keys = [
            ("openai", self.openai_api_key.is_some()),
            ("anthropic", self.anthropic_api_key.is_some()),
            ("google", self.google_api_key.is_some()),
        ]
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(",");

        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║             llm-eval v{:<27}║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Port:              {:<28}║", self.port);
        tracing::info!("║  Store:             {:<28}║", self.database_path);
        tracing::info!("║  Models file:       {:<28}║", self.models_config.display());
        tracing::info!("║  Evaluation type:   {:<28}║", self.evaluation_type);
        tracing::info!("║  Eval model:        {:<28}║", models.default.evaluation_model);
        tracing::info!("║  Scoring model:     {:<28}║", models.default.scoring_model);
        tracing::info!("║  Max concurrent:    {:<28}║", self.max_concurrent_runs);
        tracing::info!("║  Heartbeat:         {:<25}s ║", self.heartbeat_secs);
        tracing::info!("║  Pacing:            {:<24}ms ║", self.pacing_ms);
        tracing::info!("║  Cost tracking:     {:<28}║", if models.settings.track_costs { "enabled" } else { "disabled" });
        tracing::info!("║  API keys:          {:<28}║", if keys.is_empty() { "none" } else { keys.as_str() });
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefaults {
    pub evaluation_model: String,
    pub scoring_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub scoring_temperature: f32,
    #[serde(default = "default_scoring_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_prompt_template")]
    pub evaluation_prompt_template: String,
    #[serde(default = "default_track_costs")]
    pub track_costs: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            scoring_temperature: 0.0,
            system_prompt: default_scoring_system_prompt(),
            evaluation_prompt_template: default_prompt_template(),
            track_costs: default_track_costs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_track_costs() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_scoring_system_prompt() -> String {
    "You are an impartial evaluator. Decide whether the response satisfies the given criterion. \
     Start your answer with PASS or FAIL, then give a short justification."
        .to_string()
}

fn default_prompt_template() -> String {
    "Criterion: {criterion}\n\
     Description: {description}\n\n\
     Input:\n{input}\n\n\
     Response:\n{output}\n\n\
     Does the response satisfy the criterion? Answer PASS or FAIL on the first line, \
     followed by your explanation."
        .to_string()
}

/// Rate table, default model pair and scoring settings loaded from the models file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub models: BTreeMap<String, BTreeMap<String, ModelRates>>,
    pub default: ModelDefaults,
    #[serde(default)]
    pub settings: EvaluationSettings,
}

const BUILTIN_MODELS: &str = r#"
models:
  OpenAI:
    gpt-4o: { input: 2.5, output: 10.0 }
    gpt-4o-mini: { input: 0.15, output: 0.6 }
  Anthropic:
    claude-3-5-sonnet-20241022: { input: 3.0, output: 15.0 }
    claude-3-5-haiku-20241022: { input: 0.8, output: 4.0 }
  Google:
    gemini-1.5-pro: { input: 1.25, output: 5.0 }
    gemini-1.5-flash: { input: 0.075, output: 0.3 }
default:
  evaluation_model: gpt-4o-mini
  scoring_model: gpt-4o
"#;

impl ModelsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Models config not found, using built-in model table"
            );
            return Self::builtin();
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read models config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid models config {}", path.display()))
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_MODELS)
    }

    /// Accepts YAML or JSON.
    pub fn parse(raw: &str) -> Result<Self> {
        let cfg: ModelsConfig = serde_yaml::from_str(raw).context("Failed to parse models config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        for provider in self.models.keys() {
            Provider::from_str(provider)?;
        }
        for model in [&self.default.evaluation_model, &self.default.scoring_model] {
            if !self.models.values().any(|m| m.contains_key(model.as_str())) {
                anyhow::bail!("Default model {} is not listed under any provider", model);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::from_env();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_concurrent_runs, DEFAULT_MAX_CONCURRENT_RUNS);
        assert_eq!(cfg.heartbeat_secs, 30);
        assert_eq!(cfg.pacing_ms, 500);
        assert_eq!(cfg.cors_origins.len(), 2);
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_parse::<u16>("NONEXISTENT_VAR_XYZ", 42), 42);
    }

    #[test]
    fn test_builtin_models() {
        let cfg = ModelsConfig::builtin().unwrap();
        assert_eq!(cfg.models.len(), 3);
        assert_eq!(cfg.default.evaluation_model, "gpt-4o-mini");
        assert_eq!(cfg.models["OpenAI"]["gpt-4o"].output, 10.0);
        assert!(cfg.settings.track_costs);
        assert!(cfg.settings.evaluation_prompt_template.contains("{output}"));
    }

    #[test]
    fn test_parse_json_models() {
        let raw = r#"{
            "models": {"OpenAI": {"gpt-4o": {"input": 5.0, "output": 15.0}}},
            "default": {"evaluation_model": "gpt-4o", "scoring_model": "gpt-4o"},
            "settings": {"temperature": 0.2, "track_costs": false}
        }"#;
        let cfg = ModelsConfig::parse(raw).unwrap();
        assert_eq!(cfg.settings.temperature, 0.2);
        assert!(!cfg.settings.track_costs);
        assert_eq!(cfg.settings.max_tokens, 4096);
    }

    #[test]
    fn test_parse_rejects_unknown_provider() {
        let raw = r#"
models:
  Mistral:
    mistral-large: { input: 2.0, output: 6.0 }
default:
  evaluation_model: mistral-large
  scoring_model: mistral-large
"#;
        let err = ModelsConfig::parse(raw).unwrap_err();
        assert!(format!("{:#}", err).contains("Unsupported provider: Mistral"));
    }

    #[test]
    fn test_parse_rejects_unlisted_default() {
        let raw = r#"
models:
  OpenAI:
    gpt-4o: { input: 2.5, output: 10.0 }
default:
  evaluation_model: gpt-4o
  scoring_model: claude-3-opus
"#;
        assert!(ModelsConfig::parse(raw).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_builtin() {
        let cfg = ModelsConfig::load(Path::new("/nonexistent/models.yaml")).unwrap();
        assert_eq!(cfg.default.scoring_model, "gpt-4o");
    }
}
