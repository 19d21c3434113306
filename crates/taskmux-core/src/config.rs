//! Configuration management for taskmux
//!
//! Handles loading and saving the multiplexer's tunables: buffer capacity,
//! the completion fallback delay, display preferences, history retention and
//! the initial provider selection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::provider::ProviderBinding;

/// Default maximum number of lines kept per session buffer
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Default delay before a session is finalized locally when the stream's
/// `complete` event never shows up
pub const DEFAULT_FALLBACK_SECS: u64 = 3;

/// Default number of finished sessions kept in history
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Main multiplexer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuxConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Stream buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Lines kept per session before the oldest are dropped
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Completion fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Seconds to wait for the stream's `complete` after the session channel
    /// reported completion
    pub fallback_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            fallback_secs: DEFAULT_FALLBACK_SECS,
        }
    }
}

impl CompletionConfig {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_secs(self.fallback_secs)
    }
}

/// Display preferences that affect what gets buffered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Buffer the model's reasoning stream
    pub show_thinking: bool,
}

/// Session history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Most recent sessions kept
    pub limit: usize,
    /// History file; defaults to the platform data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
            path: None,
        }
    }
}

/// Initial provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub backend: String,
    /// Empty means "infer from the model name"
    pub provider: String,
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: "api".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the configured triple into a binding
    pub fn binding(&self) -> ProviderBinding {
        let provider = (!self.provider.is_empty()).then_some(self.provider.as_str());
        crate::provider::resolve_binding(&self.backend, provider, &self.model)
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: MuxConfig,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            MuxConfig::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("taskmux").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<MuxConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the current configuration
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut MuxConfig {
        &mut self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Toggle the reasoning display preference
    pub fn set_show_thinking(&mut self, show: bool) {
        self.config.display.show_thinking = show;
    }

    /// Change the provider selection stored in the config
    pub fn set_provider(&mut self, backend: &str, provider: &str, model: &str) {
        self.config.provider = ProviderConfig {
            backend: backend.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        };
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config_path: PathBuf::from("config.toml"),
            config: MuxConfig::default(),
        })
    }
}
