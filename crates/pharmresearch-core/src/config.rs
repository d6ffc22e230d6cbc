use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;

use crate::agents::SpecialistTimeouts;
use crate::error::ResearchError;
use crate::llm::{ExtractiveModel, LanguageModel};
use crate::logging::{DEFAULT_LOG_DIR, DEFAULT_RETENTION_DAYS, RunLogSettings};
use crate::orchestrator::OrchestratorConfig;

const DEFAULT_CONFIG_PATH: &str = "pharmresearch.toml";
const CONFIG_PATH_ENV: &str = "PHARMRESEARCH_CONFIG";
const KNOWN_PROVIDERS: &[&str] = &["extractive"];

/// Top-level configuration structure. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub orchestrator: OrchestratorSection,
    pub specialists: SpecialistsSection,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let section = &self.orchestrator;
        OrchestratorConfig {
            max_concurrency: section.max_concurrency,
            max_retries: section.max_retries,
            initial_backoff_ms: section.initial_backoff_ms,
            max_backoff_ms: section.max_backoff_ms,
            node_timeout_ms: section.node_timeout_ms,
        }
    }

    pub fn specialist_timeouts(&self) -> SpecialistTimeouts {
        SpecialistTimeouts {
            retrieval: Duration::from_millis(self.specialists.retrieval_timeout_ms),
            model: Duration::from_millis(self.specialists.model_timeout_ms),
        }
    }

    /// Instantiate the configured language model.
    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>, ResearchError> {
        match self.llm.provider.as_str() {
            "extractive" => Ok(Arc::new(ExtractiveModel::new(self.llm.max_summary_points))),
            other => Err(ResearchError::InvalidConfiguration(format!(
                "unknown llm provider '{other}'"
            ))),
        }
    }

    pub fn run_log_settings(&self) -> RunLogSettings {
        RunLogSettings {
            dir: self.logging.run_log_dir.clone(),
            retention_days: self.logging.retention_days,
        }
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `PHARMRESEARCH_CONFIG` environment variable.
    /// 3. `pharmresearch.toml` in the current working directory.
    ///
    /// A missing file is only an error when it was named explicitly; an absent
    /// default file yields the built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let from_env = env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let (candidate, explicit) = resolve_path(path, from_env);

        if !explicit && !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found; using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Config, ResearchError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ResearchError> {
        let invalid = |msg: &str| Err(ResearchError::InvalidConfiguration(msg.into()));
        let orchestrator = &config.orchestrator;

        if orchestrator.max_concurrency == 0 {
            return invalid("orchestrator.max_concurrency must be at least 1");
        }
        if orchestrator.node_timeout_ms == 0 {
            return invalid("orchestrator.node_timeout_ms must be positive");
        }
        if orchestrator.initial_backoff_ms > orchestrator.max_backoff_ms {
            return invalid("orchestrator.initial_backoff_ms exceeds max_backoff_ms");
        }
        if config.specialists.retrieval_timeout_ms == 0 || config.specialists.model_timeout_ms == 0
        {
            return invalid("specialist timeouts must be positive");
        }
        if !KNOWN_PROVIDERS.contains(&config.llm.provider.as_str()) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "llm.provider '{}' is not one of {KNOWN_PROVIDERS:?}",
                config.llm.provider
            )));
        }
        if config.llm.max_summary_points == 0 {
            return invalid("llm.max_summary_points must be at least 1");
        }
        Ok(())
    }
}

/// Returns the path to read and whether the caller named it explicitly.
fn resolve_path(path: Option<PathBuf>, from_env: Option<String>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }
    if let Some(from_env) = from_env {
        return (PathBuf::from(from_env), true);
    }
    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub node_timeout_ms: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            max_concurrency: defaults.max_concurrency,
            max_retries: defaults.max_retries,
            initial_backoff_ms: defaults.initial_backoff_ms,
            max_backoff_ms: defaults.max_backoff_ms,
            node_timeout_ms: defaults.node_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecialistsSection {
    pub retrieval_timeout_ms: u64,
    pub model_timeout_ms: u64,
}

impl Default for SpecialistsSection {
    fn default() -> Self {
        Self {
            retrieval_timeout_ms: 10_000,
            model_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: String,
    pub max_summary_points: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "extractive".to_string(),
            max_summary_points: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub run_log_dir: PathBuf,
    pub retention_days: u64,
    pub trace_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            run_log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            retention_days: DEFAULT_RETENTION_DAYS,
            trace_dir: None,
        }
    }
}
