//! Configuration loading, validation, and management for Switchyard.
//!
//! Loads configuration from `~/.switchyard/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.switchyard/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend selection and fallback
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Global generation defaults (string-stored)
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Loop and catalog limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// External tool-server sessions
    #[serde(default)]
    pub mcp: McpConfig,

    /// Code tool sandbox
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Web tool requests
    #[serde(default)]
    pub http_tools: HttpToolsConfig,

    /// End-user media delivery
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- gateway ---

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hosted aggregator endpoint (OpenAI-compatible)
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,

    /// Aggregator API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Models starting with any of these always go to the aggregator
    #[serde(default = "default_aggregator_prefixes")]
    pub aggregator_prefixes: Vec<String>,

    /// `aggregator` or `local`
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Retry a failed local call on the aggregator
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Self-hosted backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalBackendConfig>,
}

fn default_aggregator_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_aggregator_prefixes() -> Vec<String> {
    [
        "google/gemini",
        "anthropic/claude",
        "openai/gpt",
        "mistralai/mistral",
        "cohere/command",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_backend() -> String {
    "aggregator".into()
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            aggregator_url: default_aggregator_url(),
            api_key: None,
            aggregator_prefixes: default_aggregator_prefixes(),
            default_backend: default_backend(),
            fallback_enabled: true,
            request_timeout_secs: default_request_timeout(),
            local: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("aggregator_url", &self.aggregator_url)
            .field("api_key", &redact(&self.api_key))
            .field("aggregator_prefixes", &self.aggregator_prefixes)
            .field("default_backend", &self.default_backend)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("local", &self.local)
            .finish()
    }
}

/// A self-hosted, OpenAI-compatible backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// `lm_studio`, `ollama` or `llama_cpp`
    #[serde(default = "default_local_kind")]
    pub kind: String,

    /// Overrides the kind's conventional URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_local_kind() -> String {
    "lm_studio".into()
}

impl LocalBackendConfig {
    /// The configured URL, or the kind's conventional one.
    pub fn resolved_base_url(&self) -> Option<String> {
        if let Some(url) = &self.base_url {
            return Some(url.clone());
        }
        let url = match self.kind.as_str() {
            "lm_studio" => "http://localhost:1234/v1",
            "ollama" => "http://localhost:11434/v1",
            "llama_cpp" => "http://localhost:8080/v1",
            _ => return None,
        };
        Some(url.into())
    }
}

impl std::fmt::Debug for LocalBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackendConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("active", &self.active)
            .finish()
    }
}

// --- generation ---

/// Global generation defaults. Stored as strings like the admin settings
/// table; each run parses them and falls back on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: String,
    #[serde(default = "default_top_p")]
    pub top_p: String,
}

fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_temperature() -> String {
    "0.7".into()
}
fn default_max_tokens() -> String {
    "2000".into()
}
fn default_top_p() -> String {
    "1.0".into()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

// --- orchestrator ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Model calls per run before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Prior turns included in the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Tools invoked by one chain, head included
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default = "default_max_tools_per_agent")]
    pub max_tools_per_agent: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_history_window() -> usize {
    10
}
fn default_max_chain_depth() -> usize {
    5
}
fn default_max_tools_per_agent() -> usize {
    20
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            max_chain_depth: default_max_chain_depth(),
            max_tools_per_agent: default_max_tools_per_agent(),
        }
    }
}

// --- mcp ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_agent: usize,

    /// Protocol version offered in the handshake
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_call_timeout() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    5
}
fn default_protocol_version() -> String {
    "2024-11-05".into()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_sessions_per_agent: default_max_sessions(),
            protocol_version: default_protocol_version(),
        }
    }
}

// --- sandbox ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_memory")]
    pub max_memory_bytes: usize,

    /// VM instructions before the script is aborted
    #[serde(default = "default_sandbox_instructions")]
    pub max_instructions: u64,

    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Helper tables exposed to scripts: `clock`, `json`, `http`
    #[serde(default = "default_sandbox_helpers")]
    pub allowed_helpers: Vec<String>,
}

fn default_sandbox_memory() -> usize {
    16 * 1024 * 1024
}
fn default_sandbox_instructions() -> u64 {
    10_000_000
}
fn default_sandbox_timeout() -> u64 {
    30
}
fn default_sandbox_helpers() -> Vec<String> {
    vec!["clock".into(), "json".into(), "http".into()]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_sandbox_memory(),
            max_instructions: default_sandbox_instructions(),
            timeout_secs: default_sandbox_timeout(),
            allowed_helpers: default_sandbox_helpers(),
        }
    }
}

// --- http tools / delivery ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolsConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Image and audio downloads
    #[serde(default = "default_media_timeout")]
    pub media_timeout_secs: u64,

    /// Video and document downloads
    #[serde(default = "default_large_media_timeout")]
    pub large_media_timeout_secs: u64,
}

fn default_media_timeout() -> u64 {
    30
}
fn default_large_media_timeout() -> u64 {
    60
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            media_timeout_secs: default_media_timeout(),
            large_media_timeout_secs: default_large_media_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchyard/config.toml).
    ///
    /// Environment overrides:
    /// - `SWITCHYARD_API_KEY`, then `OPENROUTER_API_KEY` (aggregator key)
    /// - `SWITCHYARD_MODEL` (default model)
    /// - `SWITCHYARD_BACKEND` (`aggregator` | `local`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file path, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if self.gateway.api_key.is_none() {
            self.gateway.api_key = std::env::var("SWITCHYARD_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .filter(|k| !k.is_empty());
        }
        if let Ok(model) = std::env::var("SWITCHYARD_MODEL") {
            self.generation.model = model;
        }
        if let Ok(backend) = std::env::var("SWITCHYARD_BACKEND") {
            self.gateway.default_backend = backend;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchyard")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }

        if self.orchestrator.max_chain_depth == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_chain_depth must be at least 1".into(),
            ));
        }

        match self.gateway.default_backend.as_str() {
            "aggregator" => {}
            "local" => {
                let url = self.gateway.local.as_ref().and_then(|l| l.resolved_base_url());
                if url.is_none() {
                    return Err(ConfigError::ValidationError(
                        "gateway.default_backend = \"local\" needs [gateway.local] with a known kind or base_url"
                            .into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown gateway.default_backend '{other}' (expected aggregator or local)"
                )));
            }
        }

        if self.sandbox.max_memory_bytes < 1024 * 1024 {
            return Err(ConfigError::ValidationError(
                "sandbox.max_memory_bytes must be at least 1 MiB".into(),
            ));
        }

        Ok(())
    }

    /// Check if an aggregator key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.gateway.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
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

impl From<ConfigError> for switchyard_core::Error {
    fn from(e: ConfigError) -> Self {
        switchyard_core::Error::config(e.to_string())
    }
}
