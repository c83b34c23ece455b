//! Configuration management for Storyweave
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, StoryweaveError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Storyweave
///
/// This structure holds all configuration needed for the server,
/// including HTTP listener settings, the Ollama backend, and story
/// session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Ollama backend configuration
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Story session configuration
    #[serde(default)]
    pub story: StoryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory containing the static web assets
    #[serde(default = "default_web_dir")]
    pub web_dir: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_web_dir() -> String {
    "web".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            web_dir: default_web_dir(),
        }
    }
}

/// Ollama backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server host
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Model to use for generation
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Timeout for buffered generation requests (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for the readiness probe (seconds)
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "gemma3:latest".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_readiness_timeout() -> u64 {
    2
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            request_timeout_secs: default_request_timeout(),
            readiness_timeout_secs: default_readiness_timeout(),
        }
    }
}

/// Story session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Maximum number of sessions kept resident in memory
    ///
    /// When the registry grows past this cap, the least-recently-touched
    /// entry is dropped; its durable copy in SQLite remains authoritative
    /// and is reloaded on the next access.
    #[serde(default = "default_max_resident_sessions")]
    pub max_resident_sessions: usize,
}

fn default_max_resident_sessions() -> usize {
    1024
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            max_resident_sessions: default_max_resident_sessions(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StoryweaveError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| StoryweaveError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(listen_addr) = std::env::var("STORYWEAVE_LISTEN_ADDR") {
            self.server.listen_addr = listen_addr;
        }

        if let Ok(ollama_host) = std::env::var("STORYWEAVE_OLLAMA_HOST") {
            self.ollama.host = ollama_host;
        }

        if let Ok(ollama_model) = std::env::var("STORYWEAVE_OLLAMA_MODEL") {
            self.ollama.model = ollama_model;
        }

        if let Ok(max_resident) = std::env::var("STORYWEAVE_MAX_RESIDENT_SESSIONS") {
            if let Ok(value) = max_resident.parse() {
                self.story.max_resident_sessions = value;
            } else {
                tracing::warn!("Invalid STORYWEAVE_MAX_RESIDENT_SESSIONS: {}", max_resident);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(listen_addr) = &cli.listen {
            self.server.listen_addr = listen_addr.clone();
        }

        if let Some(model) = &cli.model {
            self.ollama.model = model.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any required field is empty or malformed
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(StoryweaveError::Config("listen_addr cannot be empty".to_string()).into());
        }

        if self.ollama.host.is_empty() {
            return Err(StoryweaveError::Config("ollama.host cannot be empty".to_string()).into());
        }

        if self.ollama.model.is_empty() {
            return Err(StoryweaveError::Config("ollama.model cannot be empty".to_string()).into());
        }

        if self.story.max_resident_sessions == 0 {
            return Err(StoryweaveError::Config(
                "story.max_resident_sessions must be at least 1".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ollama: OllamaConfig::default(),
            story: StoryConfig::default(),
        }
    }
}
