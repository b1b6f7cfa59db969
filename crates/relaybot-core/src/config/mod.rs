use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::GenerationParams;

pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_MODEL_API_BASE: &str = "https://integrate.api.nvidia.com/v1";
pub const DEFAULT_MODEL: &str = "meta/llama3-70b-instruct";
pub const DEFAULT_PORT: u16 = 5000;

/// Root configuration for relaybot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub line: LineConfig,
    pub provider: ProviderConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Check that the secrets needed to serve webhooks are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line.channel_secret.is_empty() {
            return Err(ConfigError::Missing("CHANNEL_SECRET"));
        }
        if self.line.channel_access_token.is_empty() {
            return Err(ConfigError::Missing("CHANNEL_ACCESS_TOKEN"));
        }
        if self.provider.api_key.is_empty() {
            return Err(ConfigError::Missing("NVIDIA_API_KEY"));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0..=2, got {}",
                self.provider.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.provider.top_p) {
            return Err(ConfigError::Invalid(format!(
                "topP must be within 0..=1, got {}",
                self.provider.top_p
            )));
        }
        Ok(())
    }

    /// Sampling parameters for the reply generator.
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            top_p: self.provider.top_p,
            max_tokens: self.provider.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
    pub api_base: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            channel_access_token: String::new(),
            api_base: DEFAULT_LINE_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_MODEL_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Get the default config file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaybot")
        .join("config.json")
}

/// Scratch directory for static assets, relative to the working directory.
pub fn static_tmp_path() -> PathBuf {
    PathBuf::from("static").join("tmp")
}

/// Load configuration from file or fall back to defaults.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Load configuration for a deployed process.
///
/// `RELAYBOT_CONFIG` may carry the whole config as JSON. Otherwise the config
/// file (or defaults) is loaded and individual environment variables are
/// layered on top.
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("RELAYBOT_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse RELAYBOT_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(None);
    apply_env_overrides(&mut cfg);
    cfg
}

fn apply_env_overrides(cfg: &mut Config) {
    // LINE
    if let Ok(v) = std::env::var("CHANNEL_SECRET") {
        cfg.line.channel_secret = v;
    }
    if let Ok(v) = std::env::var("CHANNEL_ACCESS_TOKEN") {
        cfg.line.channel_access_token = v;
    }

    // Model provider; the NVIDIA key wins over a generic OpenAI key
    if let Ok(v) = std::env::var("OPENAI_API_KEY") {
        if !v.is_empty() {
            cfg.provider.api_key = v;
        }
    }
    if let Ok(v) = std::env::var("NVIDIA_API_KEY") {
        if !v.is_empty() {
            cfg.provider.api_key = v;
        }
    }
    if let Ok(v) = std::env::var("MODEL") {
        cfg.provider.model = v;
    }
    if let Ok(v) = std::env::var("API_BASE") {
        cfg.provider.api_base = v;
    }

    // Server
    if let Ok(v) = std::env::var("PORT") {
        match v.parse() {
            Ok(port) => cfg.server.port = port,
            Err(e) => tracing::warn!("Ignoring invalid PORT {:?}: {}", v, e),
        }
    }
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
