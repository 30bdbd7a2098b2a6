//! Configuration loading, validation, and management for Voxloop.
//!
//! Loads configuration from `~/.voxloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The root configuration structure.
///
/// Maps directly to `~/.voxloop/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base system prompt (the assistant's standing instructions)
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,

    /// Default model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// IANA timezone for the local-time stamp in the system prompt
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Tool exposure settings
    #[serde(default)]
    pub exposure: ExposureConfig,

    /// Token budget settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_base_prompt() -> String {
    "You are a helpful voice assistant. Keep answers short and conversational.".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_timezone() -> String {
    "Europe/Berlin".into()
}

/// How tools are exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Number of follow-up turns a keyword-matched tool stays exposed
    /// without a fresh match.
    #[serde(default = "default_decay")]
    pub decay: u32,

    /// Follow-up turns granted to a tool after it was executed, so the
    /// conversation can keep using it past the one-turn re-call prune.
    #[serde(default = "default_post_execution_grants")]
    pub post_execution_grants: u32,

    /// Expose every tool on every turn, ignoring keywords.
    #[serde(default)]
    pub force_all: bool,
}

fn default_decay() -> u32 {
    4
}
fn default_post_execution_grants() -> u32 {
    1
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            decay: default_decay(),
            post_execution_grants: default_post_execution_grants(),
            force_all: false,
        }
    }
}

/// Token budget partition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Headroom reserved for the model's own reply.
    #[serde(default = "default_completion_reserve")]
    pub completion_reserve: usize,

    /// Maximum tokens a single history entry may occupy.
    #[serde(default = "default_per_message_cap")]
    pub per_message_cap: usize,

    /// Maximum tokens a single tool-result entry may occupy.
    #[serde(default = "default_per_function_cap")]
    pub per_function_cap: usize,

    /// Context window assumed for models missing from `context_windows`.
    #[serde(default = "default_context_window")]
    pub default_context_window: usize,

    /// Per-model context window overrides, keyed by model identifier.
    #[serde(default)]
    pub context_windows: HashMap<String, usize>,
}

fn default_completion_reserve() -> usize {
    1000
}
fn default_per_message_cap() -> usize {
    1000
}
fn default_per_function_cap() -> usize {
    500
}
fn default_context_window() -> usize {
    4096
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            completion_reserve: default_completion_reserve(),
            per_message_cap: default_per_message_cap(),
            per_function_cap: default_per_function_cap(),
            default_context_window: default_context_window(),
            context_windows: HashMap::new(),
        }
    }
}

/// Deadlines for the two blocking operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum seconds a tool handler may run.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Maximum seconds a model call may take.
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

fn default_tool_timeout() -> u64 {
    30
}
fn default_model_timeout() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            model_timeout_secs: default_model_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_prompt: default_base_prompt(),
            model: default_model(),
            timezone: default_timezone(),
            exposure: ExposureConfig::default(),
            budget: BudgetConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl EngineConfig {
    /// Load configuration from the default path (~/.voxloop/config.toml).
    ///
    /// `VOXLOOP_CONFIG` overrides the path; `VOXLOOP_MODEL` overrides the
    /// model identifier.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = match std::env::var("VOXLOOP_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_dir().join("config.toml"),
        };
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("VOXLOOP_MODEL") {
            config.model = model;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        home_dir().join(".voxloop")
    }

    /// Validate all settings. Called at startup; a bad value here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.default_context_window == 0 {
            return Err(ConfigError::ValidationError(
                "default_context_window must be > 0".into(),
            ));
        }

        if self.budget.completion_reserve >= self.budget.default_context_window {
            return Err(ConfigError::ValidationError(
                "completion_reserve must be smaller than the context window".into(),
            ));
        }

        if self.budget.per_message_cap == 0 {
            return Err(ConfigError::ValidationError(
                "per_message_cap must be > 0".into(),
            ));
        }

        if self.timeouts.tool_timeout_secs == 0 || self.timeouts.model_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0".into(),
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "'{}' is not a known IANA timezone",
                self.timezone
            )));
        }

        for (model, window) in &self.budget.context_windows {
            if *window == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "context window override for '{model}' must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// The configured timezone. Falls back to UTC for an unparseable name,
    /// which `validate` rejects at startup anyway.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }

    /// The context window for the given model, falling back to the
    /// conservative default for unknown identifiers.
    pub fn context_window(&self, model: &str) -> usize {
        self.budget
            .context_windows
            .get(model)
            .copied()
            .unwrap_or(self.budget.default_context_window)
    }
}

fn home_dir() -> PathBuf {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exposure.decay, 4);
        assert_eq!(config.budget.default_context_window, 4096);
        assert_eq!(config.timeouts.tool_timeout_secs, 30);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.exposure.decay, config.exposure.decay);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().budget.per_message_cap, 1000);
    }

    #[test]
    fn zero_completion_window_rejected() {
        let mut config = EngineConfig::default();
        config.budget.default_context_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserve_larger_than_window_rejected() {
        let mut config = EngineConfig::default();
        config.budget.completion_reserve = 8000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_timezone_rejected() {
        let mut config = EngineConfig::default();
        config.timezone = "Atlantis/Central".into();
        assert!(config.validate().is_err());

        config.timezone = "Asia/Tokyo".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.tz(), chrono_tz::Tz::Asia__Tokyo);
    }

    #[test]
    fn context_window_lookup_falls_back() {
        let mut config = EngineConfig::default();
        config.budget.context_windows.insert("gpt-4o".into(), 128_000);
        assert_eq!(config.context_window("gpt-4o"), 128_000);
        assert_eq!(config.context_window("mystery-model"), 4096);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = \"gpt-4o-mini\"\n\n[exposure]\ndecay = 6").unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.exposure.decay, 6);
        // Untouched sections keep defaults
        assert_eq!(config.budget.completion_reserve, 1000);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [unclosed").unwrap();

        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
