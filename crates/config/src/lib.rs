//! Configuration loading, validation, and management for AppForge.
//!
//! Loads configuration from `~/.appforge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use appforge_core::{Mode, ModelConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.appforge/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the LLM endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// LLM endpoint and model capabilities
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Orchestration loop limits and defaults
    #[serde(default)]
    pub agent: AgentConfig,

    /// Project workspace and command execution
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("agent", &self.agent)
            .field("workspace", &self.workspace)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name of the endpoint ("openrouter", "openai", "ollama", ...)
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// OpenAI-compatible base URL (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: Option<u32>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Native tool calling; when false the tagged-text fallback is used
    #[serde(default = "default_true")]
    pub supports_tool_use: bool,

    /// Whether screenshots may be sent back to the model
    #[serde(default)]
    pub supports_vision: bool,
}

fn default_provider_name() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_max_output_tokens() -> Option<u32> {
    Some(16384)
}
fn default_temperature() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            supports_tool_use: true,
            supports_vision: false,
        }
    }
}

impl ProviderConfig {
    /// The model settings the orchestration loop runs with.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            supports_tool_use: self.supports_tool_use,
            supports_vision: self.supports_vision,
        }
    }

    /// Local endpoints (Ollama, LM Studio, ...) need no API key.
    pub fn is_local(&self) -> bool {
        let url = self.base_url.to_ascii_lowercase();
        ["://localhost", "://127.0.0.1", "://[::1]", "://0.0.0.0"]
            .iter()
            .any(|host| url.contains(host))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: Mode,

    /// In auto mode, run QA after building instead of pausing for approval
    #[serde(default = "default_true")]
    pub auto_test: bool,

    /// Hard cap on turns per loop invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive transport/tool failures before the loop gives up
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Consecutive no-tool-call turns that may be nudged
    #[serde(default = "default_max_nudges")]
    pub max_nudges: u32,

    /// Estimated token budget for the request view
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// Tool results longer than this are truncated in the middle
    #[serde(default = "default_tool_result_max_chars")]
    pub tool_result_max_chars: usize,

    /// Consecutive exploration-only turns before the search guard fires
    #[serde(default = "default_search_loop_threshold")]
    pub search_loop_threshold: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_iterations() -> u32 {
    200
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_max_nudges() -> u32 {
    5
}
fn default_context_token_budget() -> usize {
    100_000
}
fn default_tool_result_max_chars() -> usize {
    8000
}
fn default_search_loop_threshold() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    8000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            auto_test: true,
            max_iterations: default_max_iterations(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_nudges: default_max_nudges(),
            context_token_budget: default_context_token_budget(),
            tool_result_max_chars: default_tool_result_max_chars(),
            search_loop_threshold: default_search_loop_threshold(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Project directory; the current directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Command prefixes `run_command` refuses (long-running dev servers)
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_blocked_commands() -> Vec<String> {
    [
        "npm run dev",
        "npm start",
        "npx vite",
        "vite",
        "node server",
        "yarn dev",
        "pnpm dev",
        "npx serve",
        "http-server",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_command_timeout_secs() -> u64 {
    60
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            blocked_commands: default_blocked_commands(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.appforge/config.toml).
    ///
    /// Also checks environment variables:
    /// - `APPFORGE_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `APPFORGE_BASE_URL`, `APPFORGE_MODEL`, `APPFORGE_MODE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = lookup("APPFORGE_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"))
                .filter(|key| !key.trim().is_empty());
        }

        if let Some(base_url) = lookup("APPFORGE_BASE_URL") {
            self.provider.base_url = base_url;
        }

        if let Some(model) = lookup("APPFORGE_MODEL") {
            self.provider.model = model;
        }

        if let Some(mode) = lookup("APPFORGE_MODE") {
            self.agent.mode = mode.parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".appforge")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.base_url must not be empty".into(),
            ));
        }

        let agent = &self.agent;
        if agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }
        if agent.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_consecutive_errors must be > 0".into(),
            ));
        }
        if agent.context_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "agent.context_token_budget must be > 0".into(),
            ));
        }
        if agent.backoff_max_ms < agent.backoff_base_ms {
            return Err(ConfigError::ValidationError(
                "agent.backoff_max_ms must be >= agent.backoff_base_ms".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.agent.max_iterations, 200);
        assert_eq!(config.agent.max_consecutive_errors, 5);
        assert_eq!(config.agent.context_token_budget, 100_000);
        assert!(config.agent.auto_test);
        assert_eq!(config.workspace.command_timeout_secs, 60);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.workspace.blocked_commands, config.workspace.blocked_commands);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[provider]\nbase_url = \"http://localhost:11434/v1\"\nsupports_tool_use = false\n\n[agent]\nmode = \"auto\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert!(!config.provider.supports_tool_use);
        assert!(config.provider.is_local());
        assert_eq!(config.agent.mode, Mode::Auto);
        assert_eq!(config.agent.max_nudges, 5);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_cap_below_base_rejected() {
        let mut config = AppConfig::default();
        config.agent.backoff_base_ms = 2000;
        config.agent.backoff_max_ms = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_max_ms"));
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmode = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.name, "openrouter");
    }

    #[test]
    fn env_key_priority() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("OPENAI_API_KEY", "sk-openai"),
                ("OPENROUTER_API_KEY", "sk-or"),
            ]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-or"));

        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(env(&[("APPFORGE_API_KEY", "sk-env")])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn env_overrides_model_and_mode() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("APPFORGE_MODEL", "gpt-4o"), ("APPFORGE_MODE", "plan")]))
            .unwrap();
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.agent.mode, Mode::Plan);

        let err = config.apply_env(env(&[("APPFORGE_MODE", "yolo")])).unwrap_err();
        assert!(err.to_string().contains("unknown mode"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret-value".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn model_config_carries_capabilities() {
        let mut config = AppConfig::default();
        config.provider.supports_vision = true;
        let model = config.provider.model_config();
        assert_eq!(model.model, "anthropic/claude-sonnet-4");
        assert!(model.supports_vision);
        assert_eq!(model.max_output_tokens, Some(16384));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[provider]"));
        assert!(toml_str.contains("openrouter.ai"));
        assert!(toml_str.contains("max_iterations = 200"));
    }
}
