//! `sift.toml` settings.
//!
//! Every field has a default, so the file is optional and may be partial:
//!
//! ```toml
//! [paths]
//! profiles = "configs"
//! results = "results"
//! tokens = "github_tokens.json"
//!
//! [llm]
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [engine]
//! strategy = "probe"      # or "fixed"
//! fixed_span_days = 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use engine::{ExecutorSettings, RunSettings};
use github::GitHubConfig;
use llm::LlmConfig;
use pipeline::{BackoffPolicy, DiffLimits, PlanStrategy, SEARCH_RESULT_CAP};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "sift.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub github: GitHubSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_profiles_dir")]
    pub profiles: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results: PathBuf,
    #[serde(default = "default_token_file")]
    pub tokens: PathBuf,
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("configs")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_token_file() -> PathBuf {
    PathBuf::from("github_tokens.json")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            profiles: default_profiles_dir(),
            results: default_results_dir(),
            tokens: default_token_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_github_timeout() -> u64 {
    30
}
fn default_per_page() -> u32 {
    100
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_github_timeout(),
            per_page: default_per_page(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_attempts")]
    pub max_attempts: u32,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_attempts() -> u32 {
    3
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            max_attempts: default_llm_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySetting {
    /// Bisect the range by probing result counts.
    Probe,
    /// Fixed-length windows, no probing.
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_strategy")]
    pub strategy: StrategySetting,
    #[serde(default = "default_result_cap")]
    pub result_cap: u64,
    #[serde(default = "default_span_days")]
    pub fixed_span_days: u64,
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
    #[serde(default = "default_max_file_patch_chars")]
    pub max_file_patch_chars: usize,
    #[serde(default = "default_max_diff_files")]
    pub max_diff_files: usize,
    #[serde(default = "default_max_rotations")]
    pub max_rotations: u32,
    #[serde(default = "default_max_waits")]
    pub max_waits: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Longest single sleep, for back-off and for waiting on a rate-limit reset.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_strategy() -> StrategySetting {
    StrategySetting::Probe
}
fn default_result_cap() -> u64 {
    SEARCH_RESULT_CAP
}
fn default_span_days() -> u64 {
    7
}
fn default_max_diff_chars() -> usize {
    DiffLimits::default().max_diff_chars
}
fn default_max_file_patch_chars() -> usize {
    DiffLimits::default().max_file_patch_chars
}
fn default_max_diff_files() -> usize {
    DiffLimits::default().max_diff_files
}
fn default_max_rotations() -> u32 {
    ExecutorSettings::default().max_rotations
}
fn default_max_waits() -> u32 {
    ExecutorSettings::default().max_waits
}
fn default_max_attempts() -> u32 {
    ExecutorSettings::default().backoff.max_attempts
}
fn default_base_delay() -> u64 {
    ExecutorSettings::default().backoff.base_delay.as_secs()
}
fn default_max_wait() -> u64 {
    ExecutorSettings::default().backoff.max_delay.as_secs()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            result_cap: default_result_cap(),
            fixed_span_days: default_span_days(),
            max_diff_chars: default_max_diff_chars(),
            max_file_patch_chars: default_max_file_patch_chars(),
            max_diff_files: default_max_diff_files(),
            max_rotations: default_max_rotations(),
            max_waits: default_max_waits(),
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from `sift.toml` in the working
    /// directory when present. An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.github.per_page == 0 || self.github.per_page > 100 {
            bail!("github.per_page must be between 1 and 100");
        }
        if self.engine.result_cap == 0 {
            bail!("engine.result_cap must be > 0");
        }
        if self.engine.fixed_span_days == 0 {
            bail!("engine.fixed_span_days must be > 0");
        }
        if self.engine.max_attempts == 0 || self.llm.max_attempts == 0 {
            bail!("max_attempts must be >= 1");
        }
        Ok(())
    }

    pub fn run_settings(&self) -> RunSettings {
        let e = &self.engine;
        RunSettings {
            planner: match e.strategy {
                StrategySetting::Probe => PlanStrategy::Probe { cap: e.result_cap },
                StrategySetting::Fixed => PlanStrategy::FixedSpan {
                    days: e.fixed_span_days,
                },
            },
            executor: ExecutorSettings {
                per_page: self.github.per_page,
                max_rotations: e.max_rotations,
                max_waits: e.max_waits,
                backoff: BackoffPolicy {
                    max_attempts: e.max_attempts,
                    base_delay: Duration::from_secs(e.base_delay_secs),
                    max_delay: Duration::from_secs(e.max_wait_secs),
                    ..ExecutorSettings::default().backoff
                },
            },
            limits: DiffLimits {
                max_diff_chars: e.max_diff_chars,
                max_file_patch_chars: e.max_file_patch_chars,
                max_diff_files: e.max_diff_files,
            },
        }
    }

    pub fn github_config(&self) -> GitHubConfig {
        GitHubConfig {
            api_url: self.github.api_url.clone(),
            timeout: Duration::from_secs(self.github.timeout_secs),
            ..GitHubConfig::default()
        }
    }

    /// Provider settings, or `None` when the API key variable is unset.
    pub fn llm_config(&self) -> Option<LlmConfig> {
        let key = std::env::var(&self.llm.api_key_env).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        let defaults = LlmConfig::with_api_key(key.trim());
        Some(LlmConfig {
            base_url: self.llm.base_url.clone(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            timeout: Duration::from_secs(self.llm.timeout_secs),
            retry: BackoffPolicy {
                max_attempts: self.llm.max_attempts,
                ..defaults.retry
            },
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.paths.results, PathBuf::from("results"));
        assert_eq!(settings.run_settings(), RunSettings::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::parse(
            r#"
            [engine]
            strategy = "fixed"
            fixed_span_days = 3
            max_diff_chars = 20000

            [llm]
            model = "qwen2.5-coder"
            "#,
        )
        .unwrap();
        let run = settings.run_settings();
        assert_eq!(run.planner, PlanStrategy::FixedSpan { days: 3 });
        assert_eq!(run.limits.max_diff_chars, 20_000);
        assert_eq!(run.limits.max_file_patch_chars, 5_000);
        assert_eq!(settings.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.github.per_page, 100);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Settings::parse("[github]\nper_page = 500").is_err());
        assert!(Settings::parse("[engine]\nstrategy = \"random\"").is_err());
        assert!(Settings::parse("[unknown]\nx = 1").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn settings_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sift.toml");
        std::fs::write(&path, "[paths]\ntokens = \"secrets/tokens.json\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.paths.tokens, PathBuf::from("secrets/tokens.json"));
        assert_eq!(settings.paths.profiles, PathBuf::from("configs"));
    }
}
